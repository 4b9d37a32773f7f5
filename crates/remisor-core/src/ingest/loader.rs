use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::batch::BatchExt;
use crate::config::LoadMode;
use crate::frame::Frame;
use crate::source::collapse_non_word;
use crate::storage::Storage;
use crate::Result;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub table: String,
    pub columns: Vec<String>,
    pub rows_loaded: u64,
    /// Rows excluded because their width differed from the header
    pub rows_dropped: u64,
    /// Rows padded or truncated to the header width
    pub rows_coerced: u64,
    pub batches: usize,
}

impl LoadReport {
    fn new(table: &str, columns: Vec<String>) -> Self {
        Self {
            table: table.to_string(),
            columns,
            rows_loaded: 0,
            rows_dropped: 0,
            rows_coerced: 0,
            batches: 0,
        }
    }
}

/// Moves a clean CSV file into a table of the store
#[async_trait::async_trait]
pub trait Loader: Send + Sync {
    fn mode(&self) -> LoadMode;

    async fn load(&self, storage: &Storage, table: &str, csv_path: &Path) -> Result<LoadReport>;
}

#[must_use]
pub fn loader_for(mode: LoadMode, batch_size: usize) -> Box<dyn Loader> {
    match mode {
        LoadMode::Chunked => Box::new(ChunkedReplaceLoader::new(batch_size)),
        LoadMode::HeaderDedup => Box::new(HeaderDedupLoader::new(batch_size)),
    }
}

fn csv_reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    Ok(csv::ReaderBuilder::new().flexible(true).from_path(path)?)
}

/// `\W+` runs to `_`, lower-cased; blank names fall back to `col_<position>`
#[must_use]
pub fn positional_column_names<'a>(headers: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    headers
        .into_iter()
        .enumerate()
        .map(|(i, h)| {
            let name = collapse_non_word(h.trim()).to_lowercase();
            if name.is_empty() || name == "_" {
                format!("col_{}", i + 1)
            } else {
                name
            }
        })
        .collect()
}

/// Header text with whitespace runs as `_`; blank headers become `col_<position>`.
///
/// Repeats get `_1`, `_2`, ... in order of appearance. Names are compared
/// case-insensitively because SQLite identifiers are.
#[must_use]
pub fn header_column_names<'a>(headers: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut taken = HashSet::new();
    let mut names = Vec::new();

    for (i, header) in headers.into_iter().enumerate() {
        let trimmed = header.trim();
        let base = if trimmed.is_empty() {
            format!("col_{}", i + 1)
        } else {
            WHITESPACE.replace_all(trimmed, "_").into_owned()
        };

        let mut name = base.clone();
        let mut suffix = 0;
        while taken.contains(&name.to_lowercase()) {
            suffix += 1;
            name = format!("{base}_{suffix}");
        }

        taken.insert(name.to_lowercase());
        names.push(name);
    }

    names
}

/// First batch replaces the table, every later batch appends in its own transaction
pub struct ChunkedReplaceLoader {
    batch_size: usize,
}

impl ChunkedReplaceLoader {
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait::async_trait]
impl Loader for ChunkedReplaceLoader {
    fn mode(&self) -> LoadMode {
        LoadMode::Chunked
    }

    async fn load(&self, storage: &Storage, table: &str, csv_path: &Path) -> Result<LoadReport> {
        let mut reader = csv_reader(csv_path)?;
        let columns = positional_column_names(reader.headers()?.iter());
        Frame::empty(columns.clone())?;

        let mut report = LoadReport::new(table, columns.clone());

        for batch in reader.records().batched(self.batch_size) {
            let batch = batch?;

            let mut frame = Frame::empty(columns.clone())?;
            for record in &batch {
                if record.len() != columns.len() {
                    report.rows_coerced += 1;
                }
                frame.push_coerced(record.iter().map(str::to_string).collect());
            }
            drop(batch);

            let mut writer = if report.batches == 0 {
                storage.replace_table(table, &columns).await?
            } else {
                storage.append_to(table, &columns).await?
            };
            writer.write(&frame).await?;
            writer.commit().await?;

            report.rows_loaded += frame.len() as u64;
            report.batches += 1;
            debug!(table, batch = report.batches, rows = frame.len(), "loaded batch");
            drop(frame);
        }

        if report.batches == 0 {
            storage.replace_table(table, &columns).await?.commit().await?;
        }

        info!(
            table,
            rows = report.rows_loaded,
            batches = report.batches,
            "chunked load complete"
        );
        Ok(report)
    }
}

/// Whole file as one replace; rows not matching the header width are dropped
pub struct HeaderDedupLoader {
    batch_size: usize,
}

impl HeaderDedupLoader {
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait::async_trait]
impl Loader for HeaderDedupLoader {
    fn mode(&self) -> LoadMode {
        LoadMode::HeaderDedup
    }

    async fn load(&self, storage: &Storage, table: &str, csv_path: &Path) -> Result<LoadReport> {
        let mut reader = csv_reader(csv_path)?;
        let columns = header_column_names(reader.headers()?.iter());
        Frame::empty(columns.clone())?;

        let mut report = LoadReport::new(table, columns.clone());
        let mut writer = storage.replace_table(table, &columns).await?;

        for batch in reader.records().batched(self.batch_size) {
            let batch = batch?;

            let mut frame = Frame::empty(columns.clone())?;
            for record in batch {
                if record.len() == columns.len() {
                    frame.push_row(record.iter().map(str::to_string).collect())?;
                } else {
                    report.rows_dropped += 1;
                }
            }

            writer.write(&frame).await?;
            report.batches += 1;
            debug!(table, batch = report.batches, rows = frame.len(), "staged batch");
        }

        report.rows_loaded = writer.commit().await?;

        info!(
            table,
            rows = report.rows_loaded,
            dropped = report.rows_dropped,
            "header load complete"
        );
        Ok(report)
    }
}
