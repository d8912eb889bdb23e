//! Import of Google Drive images into a media repository.
//!
//! [`ImportPipeline`] copies one Drive file at a time: metadata lookup, MIME
//! whitelist check, streamed download into a temporary file, and ingest into
//! a [`MediaRepository`]. [`BatchImporter`] resolves links and folders into
//! file ids and runs the pipeline over them in order.

pub mod batch;
pub mod filename;
pub mod pipeline;
pub mod repository;

pub use batch::{BatchEntry, BatchEvent, BatchImporter, BatchReport, Progress, Silent};
pub use pipeline::{ImportError, ImportPipeline, ImportResult, PipelineOptions};
pub use repository::{
    IngestRequest, IngestedAsset, LocalRepository, MediaRepository, RepositoryError,
};
