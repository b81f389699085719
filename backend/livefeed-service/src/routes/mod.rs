use actix_web::web;

use crate::handlers;

pub mod wsroute;

/// Register every HTTP and WebSocket endpoint of the service.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(handlers::list_posts)
        .service(handlers::list_data)
        .service(handlers::create_post)
        .service(handlers::delete_post)
        .service(handlers::save_posts)
        .service(handlers::health)
        .service(handlers::serve_upload)
        .service(wsroute::ws_handler);
}
