use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Local};
use tracing::info;

use crate::frame::Frame;
use crate::Result;

const REPORT_PREFIX: &str = "reporte_resultado_";

/// Remembers the most recent report; starts empty with each process
#[derive(Debug, Default)]
pub struct ReportRegistry {
    latest: RwLock<Option<PathBuf>>,
}

impl ReportRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, path: PathBuf) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(path);
    }

    pub fn get(&self) -> Option<PathBuf> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The latest report, if one was set and is still on disk
    pub fn available(&self) -> Option<PathBuf> {
        self.get().filter(|path| path.is_file())
    }

    pub fn clear(&self) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// `reporte_resultado_<YYYY-MM-DD_HH-MM-SS>.csv`, suffixed `_1`, `_2`, ... if taken
#[must_use]
pub fn report_path(dir: &Path, at: DateTime<Local>) -> PathBuf {
    let stamp = at.format("%Y-%m-%d_%H-%M-%S");
    let path = dir.join(format!("{REPORT_PREFIX}{stamp}.csv"));
    if !path.exists() {
        return path;
    }

    (1..)
        .map(|n| dir.join(format!("{REPORT_PREFIX}{stamp}_{n}.csv")))
        .find(|p| !p.exists())
        .unwrap_or(path)
}

/// Write the whole frame as UTF-8 CSV with a header row
pub fn write_report(dir: &Path, frame: &Frame) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = report_path(dir, Local::now());

    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(frame.columns())?;
    for row in frame.rows() {
        writer.write_record(row)?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = frame.len(), "wrote report");
    Ok(path)
}
