use actix_cors::Cors;

pub fn create_cors() -> Cors {
    Cors::default()
        // TODO: restrict to the configured frontend origin once it is known
        .allowed_origin_fn(|_, _req_head| true)
        .allowed_methods(vec!["GET", "POST", "PUT", "OPTIONS"])
        .allow_any_header()
        .max_age(3600)
}
