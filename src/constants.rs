//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! To change a default endpoint or interval, only edit this file.

/// Default control plane URL (backend `/ml` API root)
///
/// For development: http://localhost:8484/ml
pub const DEFAULT_CONTROL_PLANE_URL: &str = "http://localhost:8484/ml";

/// Default bind address of the serving shell
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";

/// Header every control plane request carries
pub const SERVICE_HEADER: (&str, &str) = ("X-Service", "M");

/// Artifact extension (ONNX export of the classifier)
pub const MODEL_FILE_EXTENSION: &str = "onnx";

/// Registry database file name inside the data dir
pub const REGISTRY_DB_FILE: &str = "models.db";

/// Default training-due check interval (seconds)
pub const DEFAULT_TRAIN_CHECK_INTERVAL: u64 = 60;

/// Default change watcher poll interval (seconds)
pub const DEFAULT_WATCH_INTERVAL: u64 = 60;

/// Notification batch size (flush threshold)
pub const DEFAULT_NOTIFY_BATCH_SIZE: usize = 10;

/// Straggler flush interval (seconds)
pub const DEFAULT_NOTIFY_FLUSH_INTERVAL: u64 = 30;

/// Max recursive decode passes
pub const DEFAULT_DECODE_MAX_DEPTH: usize = 5;

/// HTTP timeout for control plane calls (seconds)
pub const DEFAULT_HTTP_TIMEOUT: u64 = 30;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "waf-ml-service";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Get control plane URL from environment or use default
pub fn get_control_plane_url() -> String {
    std::env::var("CONTROL_PLANE_URL")
        .map(|s| s.trim_end_matches('/').to_string())
        .unwrap_or_else(|_| DEFAULT_CONTROL_PLANE_URL.to_string())
}

/// Get bind address from environment or use default
pub fn get_bind_addr() -> String {
    std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
}

/// Read a numeric env var with fallback
pub fn get_env_number<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Read an optional path env var
pub fn get_env_path(key: &str) -> Option<std::path::PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(std::path::PathBuf::from)
}
