//! Livefeed Service
//!
//! Real-time feed of posts. Posts are persisted to a single JSON document,
//! mirrored in an in-memory cache and pushed to every connected WebSocket
//! client after each change.

pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod storage;
pub mod websocket;

// Public re-exports
pub use config::Config;
pub use error::{AppError, AppResult};
pub use state::AppState;
