/// Post handlers - HTTP endpoints for the feed
use actix_multipart::Multipart;
use actix_web::{delete, get, post, web, HttpResponse};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::handlers::multipart::read_post_form;
use crate::models::Post;
use crate::state::AppState;

/// Whole feed, served from the cache
#[get("/api/posts")]
pub async fn list_posts(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(&state.cache().get().posts)
}

/// Same as `GET /api/posts`, kept for older clients
#[get("/api/data")]
pub async fn list_data(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(&state.cache().get().posts)
}

/// Create a post from a multipart form with an optional image
#[post("/api/posts")]
pub async fn create_post(
    state: web::Data<AppState>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let form = read_post_form(payload, state.config.storage.max_upload_bytes).await?;
    let post = state.pipeline.create(form).await?;

    Ok(HttpResponse::Ok().json(post))
}

#[delete("/api/posts/{id}")]
pub async fn delete_post(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> AppResult<HttpResponse> {
    // An id that does not parse cannot name any post.
    let post_id = Uuid::parse_str(&id)
        .map_err(|_| AppError::NotFound(format!("post {}", id.as_str())))?;

    let removed = state.pipeline.delete(post_id).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Post deleted",
        "id": removed.id,
    })))
}

/// Replace the whole feed with the posted array
#[post("/api/save")]
pub async fn save_posts(
    state: web::Data<AppState>,
    body: web::Json<Vec<Post>>,
) -> AppResult<HttpResponse> {
    state.pipeline.replace_all(body.into_inner()).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Data saved" })))
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "posts": state.cache().len(),
        "subscribers": state.hub().subscriber_count(),
    }))
}
