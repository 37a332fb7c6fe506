use actix_web::{App, HttpServer, middleware::Logger, web};
use chrono::Local;
use env_logger::{Env, Target};
use std::io::Write;

use emoterush_backend::{
    config::Config,
    database::open_stores,
    external::StripeService,
    handlers,
    middlewares::{AuthMiddleware, create_cors},
    services::AppServices,
    swagger::swagger_config,
    utils::JwtService,
};

fn startup_error(context: &str, e: impl std::fmt::Display) -> std::io::Error {
    log::error!("{context}: {e}");
    std::io::Error::other(format!("{context}: {e}"))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    let config = Config::from_toml().map_err(|e| startup_error("Failed to load configuration", e))?;

    // Postgres runs its migrations here; memory:// skips them
    let stores = open_stores(&config.database)
        .await
        .map_err(|e| startup_error("Failed to open the emote store", e))?;

    let jwt_service = JwtService::new(&config.jwt.secret, config.jwt.access_token_expires_in);
    let stripe_service = StripeService::new(config.stripe.clone());
    if config.stripe.webhook_secret.is_empty() {
        log::warn!("STRIPE_WEBHOOK_SECRET is empty, Stripe webhooks will be rejected");
    }

    let services = AppServices::new(&stores, &config);

    log::info!(
        "Starting HTTP server at {}:{}",
        config.server.host,
        config.server.port
    );

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(create_cors())
            .wrap(AuthMiddleware::new(jwt_service.clone()))
            .app_data(web::Data::new(jwt_service.clone()))
            .app_data(web::Data::new(stripe_service.clone()))
            .app_data(web::Data::new(services.donations.clone()))
            .app_data(web::Data::new(services.emotes.clone()))
            .app_data(web::Data::new(services.users.clone()))
            .app_data(web::Data::new(services.payouts.clone()))
            .configure(swagger_config)
            .configure(handlers::webhook_config)
            .service(
                web::scope("/api/v1")
                    .configure(handlers::emote_config)
                    .configure(handlers::user_config)
                    .configure(handlers::admin_config),
            )
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await
}
