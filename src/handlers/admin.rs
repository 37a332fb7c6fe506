use crate::error::AppError;
use crate::middlewares::current_principal;
use crate::models::*;
use crate::services::{
    DonationProcessor, EmoteService, PaymentConfirmed, PaymentEvent, PaymentFailed, UserService,
};
use crate::utils::{JwtService, Role};
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};

fn require_admin(req: &HttpRequest) -> Result<(), AppError> {
    current_principal(req)?.require_admin()
}

#[utoipa::path(
    post,
    path = "/admin/emotes",
    tag = "admin",
    request_body = CreateEmoteRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Emote created; special emotes are granted to eligible users", body = CreateEmoteResponse),
        (status = 400, description = "Invalid name or instance count"),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Name already taken")
    )
)]
pub async fn create_emote(
    service: web::Data<EmoteService>,
    req: HttpRequest,
    body: web::Json<CreateEmoteRequest>,
) -> Result<HttpResponse> {
    if let Err(e) = require_admin(&req) {
        return Ok(e.error_response());
    }
    match service.create_emote(body.into_inner()).await {
        Ok(created) => Ok(HttpResponse::Ok().json(ApiResponse::ok(created))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/admin/users",
    tag = "admin",
    request_body = CreateUserRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "User onboarded", body = OnboardResponse),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Username already registered to another external id")
    )
)]
/// Identity onboarding. Returns a token the identity provider hands to the user.
pub async fn create_user(
    service: web::Data<UserService>,
    jwt_service: web::Data<JwtService>,
    req: HttpRequest,
    body: web::Json<CreateUserRequest>,
) -> Result<HttpResponse> {
    if let Err(e) = require_admin(&req) {
        return Ok(e.error_response());
    }
    let (user, granted) = match service.onboard_user(body.into_inner()).await {
        Ok(v) => v,
        Err(e) => return Ok(e.error_response()),
    };
    let role = if user.is_admin {
        Role::Admin
    } else {
        Role::Member
    };
    let access_token = match jwt_service.generate_access_token(user.id, role) {
        Ok(t) => t,
        Err(e) => return Ok(e.error_response()),
    };
    let data = OnboardResponse {
        user: user.into(),
        granted: granted.into_iter().map(Into::into).collect(),
        access_token,
        expires_in: jwt_service.get_access_token_expires_in(),
    };
    Ok(HttpResponse::Ok().json(ApiResponse::ok(data)))
}

#[utoipa::path(
    put,
    path = "/admin/users/{user_id}/roles",
    tag = "admin",
    params(("user_id" = i64, Path, description = "User id")),
    request_body = SetRoleRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Role updated", body = SetRoleResponse),
        (status = 403, description = "Admin only"),
        (status = 404, description = "User not found")
    )
)]
pub async fn set_role(
    service: web::Data<UserService>,
    req: HttpRequest,
    path: web::Path<i64>,
    body: web::Json<SetRoleRequest>,
) -> Result<HttpResponse> {
    if let Err(e) = require_admin(&req) {
        return Ok(e.error_response());
    }
    let SetRoleRequest { role, enabled } = body.into_inner();
    match service.set_role(path.into_inner(), role, enabled).await {
        Ok((user, granted)) => {
            let data = SetRoleResponse {
                user: user.into(),
                granted: granted.into_iter().map(Into::into).collect(),
            };
            Ok(HttpResponse::Ok().json(ApiResponse::ok(data)))
        }
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    put,
    path = "/admin/users/{user_id}/emotes/{emote_id}",
    tag = "admin",
    params(
        ("user_id" = i64, Path, description = "User id"),
        ("emote_id" = i64, Path, description = "Special emote id")
    ),
    request_body = OverrideCountRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Count overridden", body = HoldingResponse),
        (status = 400, description = "Not a special emote or count below 1"),
        (status = 403, description = "Admin only")
    )
)]
pub async fn override_emote_count(
    service: web::Data<UserService>,
    req: HttpRequest,
    path: web::Path<(i64, i64)>,
    body: web::Json<OverrideCountRequest>,
) -> Result<HttpResponse> {
    if let Err(e) = require_admin(&req) {
        return Ok(e.error_response());
    }
    let (user_id, emote_id) = path.into_inner();
    match service
        .override_special_count(user_id, emote_id, body.count)
        .await
    {
        Ok(h) => Ok(HttpResponse::Ok().json(ApiResponse::ok(h))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/admin/payments/confirmed",
    tag = "admin",
    request_body = PaymentConfirmedRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Donation processed", body = DonationOutcomeResponse),
        (status = 400, description = "Invalid donation"),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Payment reference pending or failed")
    )
)]
pub async fn payment_confirmed(
    processor: web::Data<DonationProcessor>,
    req: HttpRequest,
    body: web::Json<PaymentConfirmedRequest>,
) -> Result<HttpResponse> {
    if let Err(e) = require_admin(&req) {
        return Ok(e.error_response());
    }
    let body = body.into_inner();
    let event = PaymentEvent::Confirmed(PaymentConfirmed {
        donor_id: body.donor_id,
        recipient_id: body.recipient_id,
        amount_cents: body.amount_cents,
        payment_ref: body.payment_ref,
    });
    match processor.handle_event(event).await {
        Ok(outcome) => {
            let data = DonationOutcomeResponse::from(outcome);
            Ok(HttpResponse::Ok().json(ApiResponse::ok(data)))
        }
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/admin/payments/failed",
    tag = "admin",
    request_body = PaymentFailedRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Payment recorded as failed", body = DonationOutcomeResponse),
        (status = 403, description = "Admin only")
    )
)]
pub async fn payment_failed(
    processor: web::Data<DonationProcessor>,
    req: HttpRequest,
    body: web::Json<PaymentFailedRequest>,
) -> Result<HttpResponse> {
    if let Err(e) = require_admin(&req) {
        return Ok(e.error_response());
    }
    let body = body.into_inner();
    let event = PaymentEvent::Failed(PaymentFailed {
        payment_ref: body.payment_ref,
        reason: body.reason,
    });
    match processor.handle_event(event).await {
        Ok(outcome) => {
            let data = DonationOutcomeResponse::from(outcome);
            Ok(HttpResponse::Ok().json(ApiResponse::ok(data)))
        }
        Err(e) => Ok(e.error_response()),
    }
}

pub fn admin_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .route("/emotes", web::post().to(create_emote))
            .route("/users", web::post().to(create_user))
            .route("/users/{user_id}/roles", web::put().to(set_role))
            .route(
                "/users/{user_id}/emotes/{emote_id}",
                web::put().to(override_emote_count),
            )
            .route("/payments/confirmed", web::post().to(payment_confirmed))
            .route("/payments/failed", web::post().to(payment_failed)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::database::{NewUser, Stores};
    use crate::middlewares::AuthMiddleware;
    use crate::services::AppServices;
    use actix_web::{App, test};
    use serde_json::{Value, json};

    async fn seed_user(stores: &Stores, name: &str, is_admin: bool) -> i64 {
        stores
            .users
            .insert_user(NewUser {
                external_id: format!("ext-{name}"),
                username: name.to_string(),
                display_name: None,
                is_artist: false,
                is_developer: false,
                is_founder: false,
                is_admin,
            })
            .await
            .unwrap()
            .id
    }

    macro_rules! admin_app {
        ($services:expr, $jwt:expr) => {
            test::init_service(
                App::new()
                    .wrap(AuthMiddleware::new($jwt.clone()))
                    .app_data(web::Data::new($services.emotes.clone()))
                    .app_data(web::Data::new($services.users.clone()))
                    .app_data(web::Data::new($services.donations.clone()))
                    .app_data(web::Data::new($jwt.clone()))
                    .service(web::scope("/api/v1").configure(admin_config)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_member_cannot_create_emotes() {
        let stores = Stores::in_memory();
        let services = AppServices::new(&stores, &Config::in_memory("secret"));
        let jwt = JwtService::new("secret", 3600);
        let member = seed_user(&stores, "member", false).await;
        let app = admin_app!(services, jwt);

        let token = jwt.generate_access_token(member, Role::Member).unwrap();
        let req = test::TestRequest::post()
            .uri("/api/v1/admin/emotes")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .set_json(json!({ "name": "Nope", "rarity": "common" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }

    #[actix_web::test]
    async fn test_admin_creates_emote_and_confirms_payment() {
        let stores = Stores::in_memory();
        let services = AppServices::new(&stores, &Config::in_memory("secret"));
        let jwt = JwtService::new("secret", 3600);
        let admin = seed_user(&stores, "boss", true).await;
        let donor = seed_user(&stores, "donor", false).await;
        let streamer = seed_user(&stores, "streamer", false).await;
        let app = admin_app!(services, jwt);
        let auth = format!(
            "Bearer {}",
            jwt.generate_access_token(admin, Role::Admin).unwrap()
        );

        let req = test::TestRequest::post()
            .uri("/api/v1/admin/emotes")
            .insert_header(("Authorization", auth.clone()))
            .set_json(json!({ "name": "PogWave", "rarity": "common", "max_instances": 2 }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["emote"]["remaining_instances"], 2);

        let req = test::TestRequest::post()
            .uri("/api/v1/admin/payments/confirmed")
            .insert_header(("Authorization", auth.clone()))
            .set_json(json!({
                "donor_id": donor,
                "recipient_id": streamer,
                "amount_cents": 500,
                "payment_ref": "pi_admin_1"
            }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["donation"]["status"], "completed");
        assert_eq!(body["data"]["donation"]["roll_count"], 5);
        // only two instances exist
        assert_eq!(body["data"]["awarded"].as_array().unwrap().len(), 2);
    }

    #[actix_web::test]
    async fn test_onboarding_returns_usable_token() {
        let stores = Stores::in_memory();
        let services = AppServices::new(&stores, &Config::in_memory("secret"));
        let jwt = JwtService::new("secret", 3600);
        let admin = seed_user(&stores, "boss", true).await;
        let app = admin_app!(services, jwt);

        let req = test::TestRequest::post()
            .uri("/api/v1/admin/users")
            .insert_header((
                "Authorization",
                format!("Bearer {}", jwt.generate_access_token(admin, Role::Admin).unwrap()),
            ))
            .set_json(json!({ "external_id": "twitch|1", "username": "newbie" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let token = body["data"]["access_token"].as_str().unwrap();
        let principal = jwt.verify_access_token(token).unwrap();
        assert_eq!(Some(principal.user_id), body["data"]["user"]["id"].as_i64());
        assert_eq!(principal.role, Role::Member);

        // signing in again maps to the same user and still yields a token
        let req = test::TestRequest::post()
            .uri("/api/v1/admin/users")
            .insert_header((
                "Authorization",
                format!("Bearer {}", jwt.generate_access_token(admin, Role::Admin).unwrap()),
            ))
            .set_json(json!({ "external_id": "twitch|1", "username": "newbie_2" }))
            .to_request();
        let again: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(again["data"]["user"]["id"], body["data"]["user"]["id"]);
        assert_eq!(again["data"]["user"]["username"], "newbie_2");
        assert!(again["data"]["access_token"].as_str().is_some());
    }
}
