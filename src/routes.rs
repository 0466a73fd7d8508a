use actix_web::web;
use crate::handlers;

/// Configures the menu ingestion API. Mounted under the "/api" scope in
/// main.rs.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/menu") // Base path: /api/menu
            .route("/upload", web::post().to(handlers::upload_handlers::upload_menu))
            .route("/process", web::post().to(handlers::menu_handlers::process_menu)),
    );
}
