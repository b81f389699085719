/// HTTP handlers for the feed endpoints
pub mod multipart;
pub mod posts;
pub mod uploads;

pub use posts::{create_post, delete_post, health, list_data, list_posts, save_posts};
pub use uploads::serve_upload;
