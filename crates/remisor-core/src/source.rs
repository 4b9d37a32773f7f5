use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").expect("valid regex"));

/// The three feeds the default join expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Detaller,
    Pedidos,
    Remision,
}

impl SourceKind {
    pub const ALL: [Self; 3] = [Self::Detaller, Self::Pedidos, Self::Remision];

    /// Logical source name, also the table name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Detaller => "tabla_detaller",
            Self::Pedidos => "tabla_pedidos",
            Self::Remision => "tabla_remision",
        }
    }

    /// Match a claimed upload filename, ignoring case and extension
    #[must_use]
    pub fn from_filename(filename: &str) -> Option<Self> {
        logical_source_name(filename).parse().ok()
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tabla_detaller" => Ok(Self::Detaller),
            "tabla_pedidos" => Ok(Self::Pedidos),
            "tabla_remision" => Ok(Self::Remision),
            _ => Err(crate::Error::UnknownSource(s.to_string())),
        }
    }
}

/// Final path component of a claimed filename, never a path
#[must_use]
pub fn safe_file_name(claimed: &str) -> String {
    let last = claimed.rsplit(['/', '\\']).next().unwrap_or(claimed);
    match last.trim() {
        "" | "." | ".." => "unnamed".to_string(),
        name => name.to_string(),
    }
}

/// Filename without its last extension, lower-cased
#[must_use]
pub fn logical_source_name(filename: &str) -> String {
    let name = safe_file_name(filename);
    Path::new(&name)
        .file_stem()
        .map_or_else(|| name.clone(), |s| s.to_string_lossy().into_owned())
        .to_lowercase()
}

/// Table name for a filename: stem lower-cased, non-word runs collapsed to `_`
#[must_use]
pub fn table_name(filename: &str) -> String {
    collapse_non_word(&logical_source_name(filename))
        .trim_matches('_')
        .to_string()
}

pub(crate) fn collapse_non_word(text: &str) -> String {
    NON_WORD.replace_all(text, "_").into_owned()
}

/// Outcome of checking a batch submission's filenames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionCheck {
    pub missing: Vec<SourceKind>,
    pub unexpected: Vec<String>,
    pub duplicated: Vec<SourceKind>,
}

impl SubmissionCheck {
    /// Check that `filenames` name each expected source exactly once
    #[must_use]
    pub fn of<S: AsRef<str>>(filenames: &[S]) -> Self {
        let mut check = Self::default();
        let mut seen = Vec::new();

        for filename in filenames {
            let filename = filename.as_ref();
            match SourceKind::from_filename(filename) {
                Some(kind) if seen.contains(&kind) => {
                    if !check.duplicated.contains(&kind) {
                        check.duplicated.push(kind);
                    }
                }
                Some(kind) => seen.push(kind),
                None => check.unexpected.push(filename.to_string()),
            }
        }

        check.missing = SourceKind::ALL
            .into_iter()
            .filter(|k| !seen.contains(k))
            .collect();
        check
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.duplicated.is_empty()
    }

    /// Human-readable reason the submission was rejected
    #[must_use]
    pub fn message(&self) -> String {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("missing files: {}", join(&self.missing)));
        }
        if !self.unexpected.is_empty() {
            parts.push(format!(
                "unexpected files: {}",
                self.unexpected.join(", ")
            ));
        }
        if !self.duplicated.is_empty() {
            parts.push(format!("duplicated files: {}", join(&self.duplicated)));
        }
        if parts.is_empty() {
            return "submission is complete".to_string();
        }
        format!(
            "{} (required: {})",
            parts.join("; "),
            join(&SourceKind::ALL)
        )
    }
}

fn join(kinds: &[SourceKind]) -> String {
    kinds
        .iter()
        .map(SourceKind::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// An uploaded byte stream and the filename it claims
pub struct RawSource {
    pub filename: String,
    payload: Payload,
}

enum Payload {
    Reader(Box<dyn Read + Send>),
    /// Already written to disk by the caller
    Staged(PathBuf),
}

impl RawSource {
    #[must_use]
    pub fn new(filename: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            filename: filename.into(),
            payload: Payload::Reader(Box::new(reader)),
        }
    }

    #[must_use]
    pub fn from_bytes(
        filename: impl Into<String>,
        data: impl AsRef<[u8]> + Send + 'static,
    ) -> Self {
        Self::new(filename, Cursor::new(data))
    }

    /// Upload already spooled to `path`; ingestion moves the file instead of copying it
    #[must_use]
    pub fn staged(filename: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            payload: Payload::Staged(path.into()),
        }
    }

    #[must_use]
    pub fn staged_path(&self) -> Option<&Path> {
        match &self.payload {
            Payload::Staged(path) => Some(path),
            Payload::Reader(_) => None,
        }
    }

    /// Write the upload to `dest`, returning the bytes written
    pub fn persist(self, dest: &Path) -> io::Result<u64> {
        match self.payload {
            Payload::Staged(path) => {
                std::fs::rename(&path, dest)?;
                Ok(std::fs::metadata(dest)?.len())
            }
            Payload::Reader(mut reader) => {
                let mut out = BufWriter::new(File::create(dest)?);
                let written = io::copy(&mut reader, &mut out)?;
                out.flush()?;
                Ok(written)
            }
        }
    }
}

impl std::fmt::Debug for RawSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawSource")
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}
