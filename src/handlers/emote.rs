use crate::models::*;
use crate::services::EmoteService;
use actix_web::{HttpResponse, ResponseError, Result, web};

#[utoipa::path(
    get,
    path = "/emotes",
    tag = "emotes",
    responses(
        (status = 200, description = "Emote catalog with remaining stock and odds", body = [EmoteResponse])
    )
)]
/// Full catalog, special tiers included
pub async fn list_emotes(service: web::Data<EmoteService>) -> Result<HttpResponse> {
    match service.list_catalog().await {
        Ok(list) => Ok(HttpResponse::Ok().json(ApiResponse::ok(list))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn emote_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/emotes").route("", web::get().to(list_emotes)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::database::{NewEmote, Stores};
    use crate::entities::Rarity;
    use crate::middlewares::AuthMiddleware;
    use crate::services::AppServices;
    use crate::utils::JwtService;
    use actix_web::{App, test};
    use serde_json::Value;

    #[actix_web::test]
    async fn test_catalog_is_public() {
        let stores = Stores::in_memory();
        let services = AppServices::new(&stores, &Config::in_memory("secret"));
        stores
            .inventory
            .insert_emote(NewEmote {
                name: "Sparkle".to_string(),
                rarity: Rarity::Legendary,
                artist_id: None,
                max_instances: 10,
            })
            .await
            .unwrap();

        let app = test::init_service(
            App::new()
                .wrap(AuthMiddleware::new(JwtService::new("secret", 60)))
                .app_data(web::Data::new(services.emotes.clone()))
                .service(web::scope("/api/v1").configure(emote_config)),
        )
        .await;
        let req = test::TestRequest::get().uri("/api/v1/emotes").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let first = &body["data"][0];
        assert_eq!(first["name"], "Sparkle");
        assert_eq!(first["remaining_instances"], 10);
        assert_eq!(first["odds"], "0.01% (about 1 in 10,000)");
    }
}
