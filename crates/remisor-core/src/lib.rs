pub mod batch;
pub mod config;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod query;
pub mod report;
pub mod source;
pub mod storage;

pub use config::{LoadMode, PipelineConfig};
pub use error::{Error, Result};
pub use frame::{Frame, FrameError};
pub use ingest::{
    BatchIngestResult, IngestError, IngestOutput, IngestPipeline, IngestResult, LoadReport,
};
pub use query::{QueryError, QueryExecutor, QueryOutcome, QueryReport, DEFAULT_QUERY};
pub use report::ReportRegistry;
pub use source::{RawSource, SourceKind, SubmissionCheck};
pub use storage::Storage;
