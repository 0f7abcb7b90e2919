//! Service Configuration
//!
//! Loaded once at startup from environment variables (with `.env` support).
//! Defaults live in `crate::constants`.

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{self, get_env_number, get_env_path};

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Control plane base URL (no trailing slash)
    pub control_plane_url: String,

    /// Serving shell bind address
    pub bind_addr: String,

    /// Root data directory (registry db, datasets)
    pub data_dir: PathBuf,

    /// Directory holding one artifact per model
    pub models_dir: PathBuf,

    /// Word list directory (`bad_words.txt`, `words_by_type/`)
    pub words_dir: Option<PathBuf>,

    /// Secondary (threat type) model artifact
    pub type_model_path: Option<PathBuf>,

    /// Baseline CSV merged into every training dataset
    pub baseline_dataset: Option<PathBuf>,

    /// External trainer program + leading args
    pub trainer_command: Option<Vec<String>>,

    pub train_check_interval: Duration,
    pub watch_interval: Duration,
    pub notify_batch_size: usize,
    pub notify_flush_interval: Duration,
    pub decode_max_depth: usize,
    pub http_timeout: Duration,
}

impl ServiceConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let data_dir = get_env_path("DATA_DIR").unwrap_or_else(default_data_dir);
        let models_dir = get_env_path("MODELS_DIR").unwrap_or_else(|| data_dir.join("models"));

        let trainer_command = std::env::var("TRAINER_COMMAND")
            .ok()
            .map(|s| s.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|parts| !parts.is_empty());

        Self {
            control_plane_url: constants::get_control_plane_url(),
            bind_addr: constants::get_bind_addr(),
            words_dir: get_env_path("WORDS_DIR"),
            type_model_path: get_env_path("TYPE_MODEL_PATH"),
            baseline_dataset: get_env_path("BASELINE_DATASET"),
            trainer_command,
            train_check_interval: Duration::from_secs(get_env_number(
                "TRAIN_CHECK_INTERVAL_SECS",
                constants::DEFAULT_TRAIN_CHECK_INTERVAL,
            )),
            watch_interval: Duration::from_secs(get_env_number(
                "WATCH_INTERVAL_SECS",
                constants::DEFAULT_WATCH_INTERVAL,
            )),
            notify_batch_size: get_env_number("NOTIFY_BATCH_SIZE", constants::DEFAULT_NOTIFY_BATCH_SIZE)
                .max(1),
            notify_flush_interval: Duration::from_secs(get_env_number(
                "NOTIFY_FLUSH_INTERVAL_SECS",
                constants::DEFAULT_NOTIFY_FLUSH_INTERVAL,
            )),
            decode_max_depth: get_env_number("DECODE_MAX_DEPTH", constants::DEFAULT_DECODE_MAX_DEPTH),
            http_timeout: Duration::from_secs(get_env_number(
                "HTTP_TIMEOUT_SECS",
                constants::DEFAULT_HTTP_TIMEOUT,
            )),
            data_dir,
            models_dir,
        }
    }

    /// Registry database path
    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join(constants::REGISTRY_DB_FILE)
    }

    /// Directory for generated training datasets
    pub fn dataset_dir(&self) -> PathBuf {
        self.data_dir.join("dataset")
    }
}

/// Default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("waf-ml")
}
