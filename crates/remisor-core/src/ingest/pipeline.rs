use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter};
use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::loader::{loader_for, LoadReport, Loader};
use super::normalizer::{normalize_to, NormalizeStats};
use super::repartition::{HeaderPolicy, RepartitionStats, Repartitioner};
use crate::config::{LoadMode, PipelineConfig};
use crate::source::{safe_file_name, table_name, RawSource, SourceKind, SubmissionCheck};
use crate::storage::Storage;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{0}")]
    Validation(String),
    #[error("{file} could not be cleaned: {source}")]
    Transform {
        file: String,
        #[source]
        source: crate::Error,
    },
    #[error("{file} could not be loaded: {source}")]
    Load {
        file: String,
        #[source]
        source: crate::Error,
    },
    #[error("Store unavailable: {0}")]
    Store(#[source] crate::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Cleaning task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Files written while cleaning one upload
#[derive(Debug, Clone, Serialize)]
pub struct PreparedFile {
    pub filename: String,
    pub table: String,
    pub original_path: PathBuf,
    pub normalized_path: PathBuf,
    pub clean_path: PathBuf,
    pub normalize: NormalizeStats,
    pub repartition: RepartitionStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutput {
    pub filename: String,
    pub table: String,
    pub clean_path: PathBuf,
    pub normalize: NormalizeStats,
    pub repartition: RepartitionStats,
    pub load: LoadReport,
    pub duration_ms: u64,
}

pub struct IngestPipeline {
    config: PipelineConfig,
    loader: Box<dyn Loader>,
}

impl IngestPipeline {
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        let loader = loader_for(config.load_mode, config.batch_size);
        Self { config, loader }
    }

    #[must_use]
    pub fn with_loader(mut self, loader: Box<dyn Loader>) -> Self {
        self.loader = loader;
        self
    }

    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn header_policy(&self) -> HeaderPolicy {
        match self.loader.mode() {
            LoadMode::Chunked => HeaderPolicy::Synthetic,
            LoadMode::HeaderDedup => HeaderPolicy::FirstRecord,
        }
    }

    /// Save the original, then write `limpio_txt_<name>` and `limpio_<name>`
    pub async fn prepare(&self, source: RawSource) -> IngestResult<PreparedFile> {
        let job = CleaningJob {
            filename: safe_file_name(&source.filename),
            upload_dir: self.config.upload_dir.clone(),
            cleaned_dir: self.config.cleaned_dir.clone(),
            repartitioner: Repartitioner::new(
                self.config.delimiter,
                self.config.batch_size,
                self.header_policy(),
            ),
        };

        tokio::task::spawn_blocking(move || job.run(source)).await?
    }

    /// Clean one upload and load it into its table
    pub async fn ingest_file(
        &self,
        storage: &Storage,
        source: RawSource,
    ) -> IngestResult<IngestOutput> {
        let start = Instant::now();
        let prepared = self.prepare(source).await?;

        let load = self
            .loader
            .load(storage, &prepared.table, &prepared.clean_path)
            .await
            .map_err(|e| IngestError::Load {
                file: prepared.filename.clone(),
                source: e,
            })?;

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            file = %prepared.filename,
            table = %prepared.table,
            rows = load.rows_loaded,
            duration_ms,
            "ingested file"
        );

        Ok(IngestOutput {
            filename: prepared.filename,
            table: prepared.table,
            clean_path: prepared.clean_path,
            normalize: prepared.normalize,
            repartition: prepared.repartition,
            load,
            duration_ms,
        })
    }

    /// Full submission: all three feeds, fresh database.
    ///
    /// A rejected submission touches nothing. Otherwise each file succeeds or
    /// fails on its own and the failures are collected.
    pub async fn ingest_batch(&self, sources: Vec<RawSource>) -> IngestResult<BatchIngestResult> {
        let check = SubmissionCheck::of(
            &sources
                .iter()
                .map(|s| safe_file_name(&s.filename))
                .collect::<Vec<_>>(),
        );
        if !check.is_complete() {
            return Err(IngestError::Validation(check.message()));
        }

        self.config.ensure_dirs()?;
        Storage::reset(&self.config.database_path).map_err(IngestError::Store)?;
        let storage = Storage::open(&self.config.database_path)
            .await
            .map_err(IngestError::Store)?;

        let mut result = BatchIngestResult::new();
        for source in sources {
            let filename = safe_file_name(&source.filename);
            match self.ingest_file(&storage, source).await {
                Ok(output) => result.add_success(output),
                Err(e) => {
                    warn!(file = %filename, error = %e, "ingest failed");
                    result.add_failure(filename, e);
                }
            }
        }

        storage.close().await;
        Ok(result)
    }

    /// One feed; only its table is replaced
    pub async fn ingest_single(&self, source: RawSource) -> IngestResult<IngestOutput> {
        let filename = safe_file_name(&source.filename);
        if SourceKind::from_filename(&filename).is_none() {
            let required = SourceKind::ALL.map(|k| k.as_str()).join(", ");
            return Err(IngestError::Validation(format!(
                "'{filename}' is not one of the required files: {required}"
            )));
        }

        self.config.ensure_dirs()?;
        let storage = Storage::open(&self.config.database_path)
            .await
            .map_err(IngestError::Store)?;

        let result = self.ingest_file(&storage, source).await;
        storage.close().await;
        result
    }

    /// Feeds whose table is not in the store yet
    pub async fn missing_sources(&self) -> IngestResult<Vec<SourceKind>> {
        if !self.config.database_path.exists() {
            return Ok(SourceKind::ALL.to_vec());
        }

        let storage = Storage::open(&self.config.database_path)
            .await
            .map_err(IngestError::Store)?;
        let tables = storage.list_tables().await;
        storage.close().await;
        let tables = tables.map_err(IngestError::Store)?;

        Ok(SourceKind::ALL
            .into_iter()
            .filter(|k| !tables.iter().any(|t| t == k.as_str()))
            .collect())
    }
}

struct CleaningJob {
    filename: String,
    upload_dir: PathBuf,
    cleaned_dir: PathBuf,
    repartitioner: Repartitioner,
}

impl CleaningJob {
    fn run(self, source: RawSource) -> IngestResult<PreparedFile> {
        self.write_files(source).map_err(|e| IngestError::Transform {
            file: self.filename.clone(),
            source: e,
        })
    }

    fn write_files(&self, source: RawSource) -> crate::Result<PreparedFile> {
        let original_path = self.upload_dir.join(&self.filename);
        let normalized_path = self.cleaned_dir.join(format!("limpio_txt_{}", self.filename));
        let clean_path = self.cleaned_dir.join(format!("limpio_{}", self.filename));

        source.persist(&original_path)?;

        let normalize = normalize_to(
            BufReader::new(File::open(&original_path)?),
            BufWriter::new(File::create(&normalized_path)?),
        )?;

        let lines = BufReader::new(File::open(&normalized_path)?).lines();
        let repartition = self
            .repartitioner
            .repartition(lines, BufWriter::new(File::create(&clean_path)?))?;

        info!(
            file = %self.filename,
            lines_read = normalize.lines_read,
            records = repartition.records_written,
            width = repartition.width,
            skipped = repartition.skipped_malformed + repartition.skipped_blank,
            "cleaned file"
        );

        Ok(PreparedFile {
            filename: self.filename.clone(),
            table: table_name(&self.filename),
            original_path,
            normalized_path,
            clean_path,
            normalize,
            repartition,
        })
    }
}

/// Per-file outcomes of one submission
#[derive(Debug)]
pub struct BatchIngestResult {
    pub successful: Vec<IngestOutput>,
    pub failed: Vec<(String, IngestError)>,
}

impl BatchIngestResult {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            successful: Vec::new(),
            failed: Vec::new(),
        }
    }

    fn add_success(&mut self, output: IngestOutput) {
        self.successful.push(output);
    }

    fn add_failure(&mut self, file: String, error: IngestError) {
        self.failed.push((file, error));
    }

    #[must_use]
    pub fn success_count(&self) -> usize {
        self.successful.len()
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.successful.iter().map(|o| o.load.rows_loaded).sum()
    }

    /// One line per file, failures included
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.successful
            .iter()
            .map(|o| {
                format!(
                    "'{}' cleaned and loaded into {} ({} rows)",
                    o.filename, o.table, o.load.rows_loaded
                )
            })
            .chain(self.failed.iter().map(|(_, e)| e.to_string()))
            .collect()
    }
}

impl Default for BatchIngestResult {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        pipeline: IngestPipeline,
    }

    fn fixture(mode: LoadMode) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::with_root(dir.path())
            .with_batch_size(2)
            .with_load_mode(mode);
        config.ensure_dirs().unwrap();
        Fixture {
            _dir: dir,
            pipeline: IngestPipeline::new(config),
        }
    }

    fn feeds() -> Vec<RawSource> {
        vec![
            RawSource::from_bytes("tabla_remision.txt", "R1|P1\nR2|P2\n"),
            RawSource::from_bytes("tabla_pedidos.txt", "1|x|y|P1|ACME\n"),
            RawSource::from_bytes("tabla_detaller.txt", "R1|a|b|c|d|5,5\n"),
        ]
    }

    #[tokio::test]
    async fn test_prepare_writes_intermediate_files() {
        let f = fixture(LoadMode::Chunked);
        let source = RawSource::from_bytes(
            "tabla_pedidos.txt",
            "\"A\"|1,5|x:y\n\n  \nB|2\nC|3|z|extra\n",
        );

        let prepared = f.pipeline.prepare(source).await.unwrap();

        assert!(prepared.original_path.exists());
        assert_eq!(
            prepared.normalized_path.file_name().unwrap(),
            "limpio_txt_tabla_pedidos.txt"
        );
        assert_eq!(
            std::fs::read_to_string(&prepared.normalized_path).unwrap(),
            "A|1.5|xy\nB|2\nC|3|z|extra\n"
        );
        assert_eq!(
            std::fs::read_to_string(&prepared.clean_path).unwrap(),
            "col_1,col_2,col_3\nA,1.5,xy\nB,2,\n"
        );
        assert_eq!(prepared.repartition.skipped_malformed, 1);
        assert_eq!(prepared.table, "tabla_pedidos");
    }

    #[tokio::test]
    async fn test_staged_upload_is_moved_into_place() {
        let f = fixture(LoadMode::Chunked);
        let staged = f.pipeline.config().upload_dir.join(".0-tabla_remision.txt.part");
        std::fs::write(&staged, "R1|P1\nR2|P2\n").unwrap();

        let source = RawSource::staged("tabla_remision.txt", &staged);
        assert_eq!(source.staged_path(), Some(staged.as_path()));

        let prepared = f.pipeline.prepare(source).await.unwrap();

        assert!(!staged.exists());
        assert_eq!(
            std::fs::read_to_string(&prepared.original_path).unwrap(),
            "R1|P1\nR2|P2\n"
        );
        assert_eq!(prepared.repartition.records_written, 2);
    }

    #[tokio::test]
    async fn test_batch_rejects_incomplete_submission() {
        let f = fixture(LoadMode::Chunked);
        let sources = vec![RawSource::from_bytes("tabla_remision.txt", "a|b\n")];

        let err = f.pipeline.ingest_batch(sources).await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("tabla_pedidos"));
        assert!(message.contains("tabla_detaller"));
        assert!(!f.pipeline.config().database_path.exists());
    }

    #[tokio::test]
    async fn test_batch_loads_all_feeds() {
        let f = fixture(LoadMode::Chunked);

        let result = f.pipeline.ingest_batch(feeds()).await.unwrap();

        assert_eq!(result.success_count(), 3);
        assert_eq!(result.failure_count(), 0);
        assert_eq!(result.total_rows(), 4);
        assert!(f.pipeline.missing_sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_failure_does_not_stop_siblings() {
        let f = fixture(LoadMode::Chunked);
        let mut sources = feeds();
        sources[1] = RawSource::from_bytes("tabla_pedidos.txt", "\n \n\"\"\n");

        let result = f.pipeline.ingest_batch(sources).await.unwrap();

        assert_eq!(result.success_count(), 2);
        assert_eq!(result.failure_count(), 1);
        assert_eq!(result.failed[0].0, "tabla_pedidos.txt");
        assert!(result.messages().iter().any(|m| m.contains("tabla_pedidos.txt")));
        assert_eq!(
            f.pipeline.missing_sources().await.unwrap(),
            vec![SourceKind::Pedidos]
        );
    }

    #[tokio::test]
    async fn test_single_rejects_unknown_file() {
        let f = fixture(LoadMode::Chunked);
        let err = f
            .pipeline
            .ingest_single(RawSource::from_bytes("clientes.txt", "a|b\n"))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Validation(_)));
    }

    #[tokio::test]
    async fn test_single_replaces_only_its_table() {
        let f = fixture(LoadMode::Chunked);
        f.pipeline.ingest_batch(feeds()).await.unwrap();

        let output = f
            .pipeline
            .ingest_single(RawSource::from_bytes("TABLA_REMISION.TXT", "R9|P9\n"))
            .await
            .unwrap();
        assert_eq!(output.table, "tabla_remision");

        let storage = Storage::open(&f.pipeline.config().database_path).await.unwrap();
        let remision = storage.query_frame("SELECT col_1 FROM tabla_remision").await.unwrap();
        assert_eq!(remision.rows(), &[vec!["R9".to_string()]]);
        assert_eq!(storage.count_rows("tabla_pedidos").await.unwrap(), 1);
        storage.close().await;
    }

    #[tokio::test]
    async fn test_header_dedup_mode_uses_first_record() {
        let f = fixture(LoadMode::HeaderDedup);
        let source = RawSource::from_bytes(
            "tabla_pedidos.txt",
            "cliente|fecha|cliente\nA|1|B\nC|2\nD|3|E\n",
        );

        let output = f.pipeline.ingest_single(source).await.unwrap();

        assert_eq!(output.load.columns, vec!["cliente", "fecha", "cliente_1"]);
        assert_eq!(output.load.rows_loaded, 2);
        assert_eq!(output.load.rows_dropped, 1);
    }

    #[tokio::test]
    async fn test_missing_sources_without_database() {
        let f = fixture(LoadMode::Chunked);
        assert_eq!(
            f.pipeline.missing_sources().await.unwrap(),
            SourceKind::ALL.to_vec()
        );
    }
}
