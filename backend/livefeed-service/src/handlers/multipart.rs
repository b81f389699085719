/// Multipart form reading for post submissions
///
/// Accepts `author` (or `name`), `message` (or `text`) and an optional
/// `image` file part. Unknown parts are drained and ignored.
use actix_multipart::{Field, Multipart};
use futures_util::TryStreamExt;

use crate::error::{AppError, AppResult};
use crate::models::{NewPost, Upload};

const MAX_TEXT_BYTES: usize = 64 * 1024;

pub async fn read_post_form(mut payload: Multipart, max_upload_bytes: usize) -> AppResult<NewPost> {
    let mut form = NewPost::default();
    let mut parts = 0usize;

    while let Some(mut field) = payload.try_next().await? {
        parts += 1;
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "author" | "name" => form.author = Some(read_text(&mut field, &name).await?),
            "message" | "text" => form.message = Some(read_text(&mut field, &name).await?),
            "image" => {
                let original_name = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .unwrap_or_default()
                    .to_string();
                let bytes = read_bytes(&mut field, max_upload_bytes, "image").await?;

                // Browsers send an empty file part when no file was picked.
                if !bytes.is_empty() {
                    form.image = Some(Upload {
                        bytes,
                        original_name,
                    });
                }
            }
            other => {
                tracing::debug!(part = other, "ignoring unknown multipart part");
                while field.try_next().await?.is_some() {}
            }
        }
    }

    if parts == 0 {
        return Err(AppError::Validation("multipart body has no parts".into()));
    }

    Ok(form)
}

async fn read_text(field: &mut Field, name: &str) -> AppResult<String> {
    let bytes = read_bytes(field, MAX_TEXT_BYTES, name).await?;
    String::from_utf8(bytes).map_err(|_| AppError::Validation(format!("{name} is not valid UTF-8")))
}

async fn read_bytes(field: &mut Field, limit: usize, name: &str) -> AppResult<Vec<u8>> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.try_next().await? {
        if buf.len() + chunk.len() > limit {
            return Err(AppError::Validation(format!(
                "{name} exceeds the {limit} byte limit"
            )));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}
