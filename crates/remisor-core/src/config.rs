use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::query::DEFAULT_QUERY;

/// Rows per batch when no size is configured
pub const DEFAULT_BATCH_SIZE: usize = 2000;

/// Rows returned as a query preview when no size is configured
pub const DEFAULT_PREVIEW_ROWS: usize = 10;

/// How a clean CSV becomes a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Positional `col_N` columns, first batch replaces the table, later batches append
    #[default]
    Chunked,
    /// Header-derived, deduplicated columns; rows with the wrong width are dropped
    HeaderDedup,
}

impl LoadMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Chunked => "chunked",
            Self::HeaderDedup => "header_dedup",
        }
    }
}

impl std::fmt::Display for LoadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LoadMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chunked" | "chunked_replace" => Ok(Self::Chunked),
            "header_dedup" | "header" => Ok(Self::HeaderDedup),
            _ => Err(crate::Error::InvalidLoadMode(s.to_string())),
        }
    }
}

/// Where files live and how they are processed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Raw uploaded originals
    pub upload_dir: PathBuf,
    /// Normalized text and clean CSV files
    pub cleaned_dir: PathBuf,
    /// Generated reports
    pub results_dir: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub load_mode: LoadMode,
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_query")]
    pub default_query: String,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_preview_rows() -> usize {
    DEFAULT_PREVIEW_ROWS
}

const fn default_delimiter() -> char {
    '|'
}

fn default_query() -> String {
    DEFAULT_QUERY.to_string()
}

impl PipelineConfig {
    /// Standard layout under a single root directory
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            database_path: root.join("database.db"),
            upload_dir: root.join("uploads"),
            cleaned_dir: root.join("cleaned"),
            results_dir: root.join("resultado"),
            batch_size: DEFAULT_BATCH_SIZE,
            load_mode: LoadMode::default(),
            preview_rows: DEFAULT_PREVIEW_ROWS,
            delimiter: default_delimiter(),
            default_query: default_query(),
        }
    }

    #[must_use]
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    #[must_use]
    pub const fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    #[must_use]
    pub const fn with_load_mode(mut self, mode: LoadMode) -> Self {
        self.load_mode = mode;
        self
    }

    #[must_use]
    pub const fn with_preview_rows(mut self, rows: usize) -> Self {
        self.preview_rows = rows;
        self
    }

    #[must_use]
    pub fn with_default_query(mut self, sql: impl Into<String>) -> Self {
        self.default_query = sql.into();
        self
    }

    /// Create the upload, cleaned and results directories
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.upload_dir)?;
        std::fs::create_dir_all(&self.cleaned_dir)?;
        std::fs::create_dir_all(&self.results_dir)?;
        if let Some(parent) = self.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::with_root(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_mode_from_str() {
        assert_eq!("chunked".parse::<LoadMode>().unwrap(), LoadMode::Chunked);
        assert_eq!(
            " Header_Dedup ".parse::<LoadMode>().unwrap(),
            LoadMode::HeaderDedup
        );
        assert!("upsert".parse::<LoadMode>().is_err());
    }

    #[test]
    fn test_layout_under_root() {
        let config = PipelineConfig::with_root("/srv/remisor");

        assert_eq!(config.database_path, PathBuf::from("/srv/remisor/database.db"));
        assert_eq!(config.cleaned_dir, PathBuf::from("/srv/remisor/cleaned"));
        assert_eq!(config.results_dir, PathBuf::from("/srv/remisor/resultado"));
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.delimiter, '|');
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{
                "database_path": "db.sqlite",
                "upload_dir": "up",
                "cleaned_dir": "clean",
                "results_dir": "out",
                "load_mode": "header_dedup"
            }"#,
        )
        .unwrap();

        assert_eq!(config.load_mode, LoadMode::HeaderDedup);
        assert_eq!(config.preview_rows, DEFAULT_PREVIEW_ROWS);
        assert_eq!(config.default_query, DEFAULT_QUERY);
    }
}
