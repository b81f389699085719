/// Configuration management for livefeed-service
///
/// Loads configuration from environment variables with sensible defaults.
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;
use crate::storage::records::SeedPolicy;

#[derive(Clone, Debug)]
pub struct Config {
    pub app: AppConfig,
    pub cors: CorsConfig,
    pub storage: StorageConfig,
    pub websocket: WebSocketConfig,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// JSON document holding the whole feed
    pub data_file: PathBuf,
    /// Directory attachments are written to
    pub uploads_dir: PathBuf,
    /// Public path prefix attachment references are built from
    pub uploads_url_prefix: String,
    pub seed: SeedPolicy,
    pub max_upload_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct WebSocketConfig {
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            client_timeout: Duration::from_secs(30),
        }
    }
}

const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        let port = match std::env::var("LIVEFEED_PORT").or_else(|_| std::env::var("PORT")) {
            Ok(raw) => parse_var("LIVEFEED_PORT", &raw)?,
            Err(_) => 3000,
        };

        let seed = match std::env::var("LIVEFEED_SEED_SLOTS") {
            Ok(raw) if !raw.trim().is_empty() => {
                SeedPolicy::FixedSlots(parse_var("LIVEFEED_SEED_SLOTS", &raw)?)
            }
            _ => SeedPolicy::Empty,
        };

        let max_upload_bytes = match std::env::var("LIVEFEED_MAX_UPLOAD_BYTES") {
            Ok(raw) => parse_var("LIVEFEED_MAX_UPLOAD_BYTES", &raw)?,
            Err(_) => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let defaults = WebSocketConfig::default();
        let heartbeat_interval = match std::env::var("LIVEFEED_WS_HEARTBEAT_SECS") {
            Ok(raw) => Duration::from_secs(parse_var("LIVEFEED_WS_HEARTBEAT_SECS", &raw)?),
            Err(_) => defaults.heartbeat_interval,
        };
        let client_timeout = match std::env::var("LIVEFEED_WS_CLIENT_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(parse_var("LIVEFEED_WS_CLIENT_TIMEOUT_SECS", &raw)?),
            Err(_) => defaults.client_timeout,
        };

        Ok(Config {
            app: AppConfig {
                host: std::env::var("LIVEFEED_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port,
            },
            cors: CorsConfig {
                allowed_origins: parse_list(
                    &std::env::var("LIVEFEED_CORS_ALLOWED_ORIGINS")
                        .unwrap_or_else(|_| "*".to_string()),
                ),
            },
            storage: StorageConfig {
                data_file: std::env::var("LIVEFEED_DATA_FILE")
                    .unwrap_or_else(|_| "data/posts.json".to_string())
                    .into(),
                uploads_dir: std::env::var("LIVEFEED_UPLOADS_DIR")
                    .unwrap_or_else(|_| "uploads".to_string())
                    .into(),
                uploads_url_prefix: std::env::var("LIVEFEED_UPLOADS_URL_PREFIX")
                    .unwrap_or_else(|_| "/uploads".to_string()),
                seed,
                max_upload_bytes,
            },
            websocket: WebSocketConfig {
                heartbeat_interval,
                client_timeout,
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw:?}")))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
