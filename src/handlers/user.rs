use crate::middlewares::current_principal;
use crate::models::*;
use crate::services::{PayoutService, UserService};
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};

#[utoipa::path(
    get,
    path = "/users/me",
    tag = "users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn get_profile(service: web::Data<UserService>, req: HttpRequest) -> Result<HttpResponse> {
    let principal = match current_principal(&req) {
        Ok(p) => p,
        Err(e) => return Ok(e.error_response()),
    };
    match service.get_profile(principal.user_id).await {
        Ok(user) => Ok(HttpResponse::Ok().json(ApiResponse::ok(user))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/users/me/emotes",
    tag = "users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Owned emotes with counts", body = [HoldingResponse]),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn get_emotes(service: web::Data<UserService>, req: HttpRequest) -> Result<HttpResponse> {
    let principal = match current_principal(&req) {
        Ok(p) => p,
        Err(e) => return Ok(e.error_response()),
    };
    match service.get_holdings(principal.user_id).await {
        Ok(list) => Ok(HttpResponse::Ok().json(ApiResponse::ok(list))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/users/me/donations",
    tag = "users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Donations made by the current user, newest first", body = [DonationResponse]),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn get_donations(
    service: web::Data<UserService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let principal = match current_principal(&req) {
        Ok(p) => p,
        Err(e) => return Ok(e.error_response()),
    };
    match service.get_donations(principal.user_id).await {
        Ok(list) => Ok(HttpResponse::Ok().json(ApiResponse::ok(list))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/users/me/transactions",
    tag = "users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Balance ledger, newest first", body = [BalanceTransactionResponse]),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn get_transactions(
    service: web::Data<UserService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let principal = match current_principal(&req) {
        Ok(p) => p,
        Err(e) => return Ok(e.error_response()),
    };
    match service.get_transactions(principal.user_id).await {
        Ok(list) => Ok(HttpResponse::Ok().json(ApiResponse::ok(list))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/users/me/payouts",
    tag = "users",
    request_body = PayoutRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Payout requested", body = PayoutResponse),
        (status = 400, description = "Amount below minimum or above balance"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn request_payout(
    service: web::Data<PayoutService>,
    req: HttpRequest,
    body: web::Json<PayoutRequest>,
) -> Result<HttpResponse> {
    let principal = match current_principal(&req) {
        Ok(p) => p,
        Err(e) => return Ok(e.error_response()),
    };
    match service
        .request_payout(principal.user_id, body.into_inner())
        .await
    {
        Ok(payout) => Ok(HttpResponse::Ok().json(ApiResponse::ok(payout))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn user_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/users/me")
            .route("", web::get().to(get_profile))
            .route("/emotes", web::get().to(get_emotes))
            .route("/donations", web::get().to(get_donations))
            .route("/transactions", web::get().to(get_transactions))
            .route("/payouts", web::post().to(request_payout)),
    );
}
