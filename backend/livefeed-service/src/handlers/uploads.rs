use actix_web::{get, http::header, web, HttpResponse};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Serve a stored attachment back by its reference path.
///
/// Only reachable at `/uploads/{name}`; a custom `LIVEFEED_UPLOADS_URL_PREFIX`
/// is expected to be routed to this path by whatever sits in front.
#[get("/uploads/{name}")]
pub async fn serve_upload(
    state: web::Data<AppState>,
    name: web::Path<String>,
) -> AppResult<HttpResponse> {
    let attachments = state.pipeline.attachments();
    let reference = format!("{}/{}", attachments.url_prefix(), name.as_str());

    let path = attachments
        .resolve(&reference)
        .ok_or_else(|| AppError::NotFound(format!("attachment {}", name.as_str())))?;

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound(format!("attachment {}", name.as_str())));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, content_type_for(name.as_str())))
        .insert_header((header::CACHE_CONTROL, "public, max-age=31536000, immutable"))
        .body(bytes))
}
