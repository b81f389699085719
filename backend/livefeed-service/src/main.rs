/// Livefeed Service - HTTP + WebSocket server
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use livefeed_service::{config::CorsConfig, error::AppError, logging, routes, AppState, Config};

fn build_cors(cfg: &CorsConfig) -> Cors {
    let cors = Cors::default()
        .allow_any_method()
        .allow_any_header()
        .max_age(3600);

    if cfg.allowed_origins.iter().any(|o| o == "*") {
        return cors.allow_any_origin();
    }

    cfg.allowed_origins
        .iter()
        .fold(cors, |cors, origin| cors.allowed_origin(origin))
}

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    let config = Config::from_env()?;
    let bind_addr = format!("{}:{}", config.app.host, config.app.port);

    let state = AppState::from_config(config);
    state.pipeline.bootstrap().await?;

    tracing::info!(
        %bind_addr,
        data_file = %state.config.storage.data_file.display(),
        uploads_dir = %state.config.storage.uploads_dir.display(),
        "starting livefeed-service"
    );

    let server_state = state.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&server_state.config.cors))
            .wrap(tracing_actix_web::TracingLogger::default())
            .app_data(web::Data::new(server_state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind {bind_addr}: {e}")))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(format!("HTTP server: {e}")))?;

    tracing::info!("livefeed-service shutting down");
    Ok(())
}
