mod loader;
mod normalizer;
mod pipeline;
mod repartition;

pub use loader::{
    header_column_names, loader_for, positional_column_names, ChunkedReplaceLoader,
    HeaderDedupLoader, LoadReport, Loader,
};
pub use normalizer::{normalize_line, normalize_to, NormalizeStats, NormalizedLines};
pub use pipeline::{
    BatchIngestResult, IngestError, IngestOutput, IngestPipeline, IngestResult, PreparedFile,
};
pub use repartition::{HeaderPolicy, RepartitionStats, Repartitioner};
