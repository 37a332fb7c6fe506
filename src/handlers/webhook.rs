use crate::external::StripeService;
use crate::services::DonationProcessor;
use actix_web::{HttpRequest, HttpResponse, Result, web};
use log::{error, info, warn};
use serde_json::json;

/// Stripe webhook. Signature failures are rejected, domain rejections are
/// acknowledged so Stripe stops retrying, storage outages return 500 so it retries.
pub async fn stripe_webhook(
    req: HttpRequest,
    body: web::Bytes,
    stripe_service: web::Data<StripeService>,
    processor: web::Data<DonationProcessor>,
) -> Result<HttpResponse> {
    let signature = match req.headers().get("stripe-signature") {
        Some(sig) => sig.to_str().unwrap_or(""),
        None => {
            warn!("Missing Stripe-Signature header");
            return Ok(HttpResponse::BadRequest().json(json!({
                "error": "Missing Stripe-Signature header"
            })));
        }
    };

    let payload = match std::str::from_utf8(&body) {
        Ok(p) => p,
        Err(_) => {
            error!("Invalid UTF-8 in webhook payload");
            return Ok(HttpResponse::BadRequest().json(json!({
                "error": "Invalid payload encoding"
            })));
        }
    };

    let event = match stripe_service.verify_webhook_signature(payload, signature) {
        Ok(event) => event,
        Err(e) => {
            error!("Webhook signature verification failed: {e}");
            return Ok(HttpResponse::Unauthorized().json(json!({
                "error": "Invalid signature"
            })));
        }
    };

    info!("Received Stripe webhook event: {} ({})", event.type_, event.id);

    let payment = match stripe_service.to_payment_event(event) {
        Ok(Some(payment)) => payment,
        Ok(None) => {
            return Ok(HttpResponse::Ok().json(json!({ "received": true, "ignored": true })));
        }
        Err(e) => {
            warn!("Unusable payment event: {e}");
            return Ok(HttpResponse::Ok().json(json!({
                "received": true,
                "error": format!("Processing failed: {}", e)
            })));
        }
    };

    match processor.handle_event(payment).await {
        Ok(outcome) => {
            info!(
                "Processed donation {} ({:?}), {} emote(s) awarded",
                outcome.donation.payment_ref,
                outcome.donation.status,
                outcome.awarded.len()
            );
            Ok(HttpResponse::Ok().json(json!({ "received": true })))
        }
        Err(e) if e.is_persistence_failure() => {
            error!("Storage failure while processing webhook event: {e}");
            Ok(HttpResponse::InternalServerError().json(json!({
                "received": false,
                "error": "Storage unavailable"
            })))
        }
        Err(e) => {
            error!("Failed to process webhook event: {e}");
            Ok(HttpResponse::Ok().json(json!({
                "received": true,
                "error": format!("Processing failed: {}", e)
            })))
        }
    }
}

pub fn webhook_config(cfg: &mut web::ServiceConfig) {
    cfg.route("/webhook/stripe", web::post().to(stripe_webhook));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StripeConfig};
    use crate::database::Stores;
    use crate::services::AppServices;
    use actix_web::{App, test};

    fn app_parts(secret: &str) -> (StripeService, DonationProcessor) {
        let services = AppServices::new(&Stores::in_memory(), &Config::in_memory("secret"));
        let stripe = StripeService::new(StripeConfig {
            secret_key: String::new(),
            webhook_secret: secret.to_string(),
        });
        (stripe, services.donations)
    }

    #[actix_web::test]
    async fn test_missing_signature_is_bad_request() {
        let (stripe, processor) = app_parts("whsec_test");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(stripe))
                .app_data(web::Data::new(processor))
                .configure(webhook_config),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/webhook/stripe")
            .set_payload("{}")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn test_bad_signature_is_unauthorized() {
        let (stripe, processor) = app_parts("whsec_test");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(stripe))
                .app_data(web::Data::new(processor))
                .configure(webhook_config),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/webhook/stripe")
            .insert_header(("stripe-signature", "t=1,v1=deadbeef"))
            .set_payload("{}")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }
}
