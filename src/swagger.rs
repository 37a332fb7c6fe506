use actix_web::web;
use utoipa::OpenApi;
use utoipa::{
    Modify,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::entities::{
    BalanceTransactionKind, DonationStatus, PayoutMethod, PayoutStatus, Rarity, StaffRole,
};
use crate::handlers;
use crate::models::*;
use crate::utils::Role;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        )
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::emote::list_emotes,
        handlers::user::get_profile,
        handlers::user::get_emotes,
        handlers::user::get_donations,
        handlers::user::get_transactions,
        handlers::user::request_payout,
        handlers::admin::create_emote,
        handlers::admin::create_user,
        handlers::admin::set_role,
        handlers::admin::override_emote_count,
        handlers::admin::payment_confirmed,
        handlers::admin::payment_failed,
    ),
    components(
        schemas(
            Rarity,
            StaffRole,
            Role,
            DonationStatus,
            BalanceTransactionKind,
            PayoutMethod,
            PayoutStatus,
            EmoteResponse,
            EmoteSummary,
            CreateEmoteRequest,
            CreateEmoteResponse,
            UserResponse,
            CreateUserRequest,
            OnboardResponse,
            SetRoleRequest,
            SetRoleResponse,
            OverrideCountRequest,
            HoldingResponse,
            DonationResponse,
            DonationOutcomeResponse,
            PaymentConfirmedRequest,
            PaymentFailedRequest,
            BalanceTransactionResponse,
            PayoutRequest,
            PayoutResponse,
            ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "emotes", description = "Emote catalog"),
        (name = "users", description = "Current user, holdings and balance"),
        (name = "admin", description = "Catalog, identity and payment administration"),
    ),
    info(
        title = "EmoteRush Backend API",
        version = "0.1.0",
        description = "Emote allocation and donation API"
    ),
    servers(
        (url = "/api/v1", description = "Local server")
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_admin_routes_and_bearer_scheme() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/admin/payments/confirmed"));
        assert!(doc.paths.paths.contains_key("/users/me/emotes"));
        let components = doc.components.unwrap();
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
