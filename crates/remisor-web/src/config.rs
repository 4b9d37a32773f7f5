use std::path::PathBuf;
use std::str::FromStr;

use remisor_core::PipelineConfig;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_MAX_UPLOAD_MB: usize = 512;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Largest accepted request body, in bytes
    pub max_upload_bytes: usize,
    pub pipeline: PipelineConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let root = std::env::var_os("REMISOR_HOME").map_or_else(default_root, PathBuf::from);
        let defaults = PipelineConfig::with_root(&root);

        let mut pipeline = defaults
            .clone()
            .with_batch_size(env_or("REMISOR_BATCH_SIZE", defaults.batch_size))
            .with_load_mode(env_or("REMISOR_LOAD_MODE", defaults.load_mode))
            .with_preview_rows(env_or("REMISOR_PREVIEW_ROWS", defaults.preview_rows));

        if let Some(db) = std::env::var_os("REMISOR_DB") {
            pipeline = pipeline.with_database_path(db);
        }

        Self {
            port: env_or("REMISOR_PORT", DEFAULT_PORT),
            max_upload_bytes: env_or("REMISOR_MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB)
                .saturating_mul(1024 * 1024),
            pipeline,
        }
    }

    pub const fn with_pipeline(pipeline: PipelineConfig) -> Self {
        Self {
            port: DEFAULT_PORT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
            pipeline,
        }
    }
}

fn default_root() -> PathBuf {
    dirs::data_dir().map_or_else(|| PathBuf::from("."), |d| d.join("remisor"))
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring invalid setting");
            default
        }),
        Err(_) => default,
    }
}
