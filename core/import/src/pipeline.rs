//! Single-file import from Google Drive into a media repository.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use drivemedia_common::{AuthError, ClientError, DriveId, ErrorKind, ImageMime};
use drivemedia_drive::DriveClient;

use crate::filename;
use crate::repository::{IngestRequest, MediaRepository, RepositoryError};

/// Prefix of downloaded temporary files.
const TEMP_PREFIX: &str = "drivemedia-";

/// Outcome of importing one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImportResult {
    /// The file is stored in the repository.
    Imported {
        repository_id: String,
        url: String,
        filename: String,
    },
    /// The import stopped; nothing was stored.
    Failed { kind: ErrorKind, message: String },
}

impl ImportResult {
    /// Whether the file was imported.
    pub fn is_success(&self) -> bool {
        matches!(self, ImportResult::Imported { .. })
    }
}

/// Pipeline settings.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Directory for downloaded temporary files. System default when `None`.
    pub temp_dir: Option<PathBuf>,
    /// Owner passed to the repository with every asset.
    pub owner: Option<String>,
}

/// Reasons an import stops.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("not authenticated with Google Drive: {0}")]
    NotAuthenticated(AuthError),

    #[error("metadata fetch failed for {file_id}: {source}")]
    Metadata {
        file_id: DriveId,
        source: ClientError,
    },

    #[error("unsupported MIME type {mime_type} for {file_id}")]
    UnsupportedMime { file_id: DriveId, mime_type: String },

    #[error("download failed for {file_id}: {message}")]
    Download { file_id: DriveId, message: String },

    #[error("{0}")]
    Ingest(#[from] RepositoryError),
}

impl ImportError {
    /// Classify this error for per-file reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::NotAuthenticated(e) => e.kind(),
            ImportError::Metadata { source, .. } => source.kind(),
            ImportError::UnsupportedMime { .. } => ErrorKind::UnsupportedMimeType,
            ImportError::Download { .. } => ErrorKind::DownloadFailed,
            ImportError::Ingest(_) => ErrorKind::IngestFailed,
        }
    }
}

impl From<ImportError> for ImportResult {
    fn from(e: ImportError) -> Self {
        ImportResult::Failed {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Copies Drive images into a [`MediaRepository`], one file per call.
pub struct ImportPipeline {
    drive: Arc<DriveClient>,
    repository: Arc<dyn MediaRepository>,
    options: PipelineOptions,
}

impl ImportPipeline {
    /// Create a pipeline.
    pub fn new(
        drive: Arc<DriveClient>,
        repository: Arc<dyn MediaRepository>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            drive,
            repository,
            options,
        }
    }

    /// The Drive client used for metadata and downloads.
    pub fn drive(&self) -> &Arc<DriveClient> {
        &self.drive
    }

    /// Import one Drive file.
    ///
    /// Every failure is reported in the returned result. The downloaded
    /// temporary file is removed before this returns.
    pub async fn import_one(&self, file_id: &DriveId) -> ImportResult {
        match self.try_import(file_id).await {
            Ok(result) => result,
            Err(e) => {
                warn!(file_id = %file_id, kind = %e.kind(), "Import failed: {}", e);
                e.into()
            }
        }
    }

    async fn try_import(&self, file_id: &DriveId) -> Result<ImportResult, ImportError> {
        debug!(file_id = %file_id, "Starting import");

        let remote = self.drive.file_metadata(file_id).await.map_err(|e| match e {
            ClientError::Auth(auth) => ImportError::NotAuthenticated(auth),
            source => ImportError::Metadata {
                file_id: file_id.clone(),
                source,
            },
        })?;
        debug!(file_id = %file_id, mime_type = %remote.mime_type, "Metadata fetched");

        let mime = ImageMime::from_mime(&remote.mime_type).ok_or_else(|| {
            ImportError::UnsupportedMime {
                file_id: file_id.clone(),
                mime_type: remote.mime_type.clone(),
            }
        })?;
        debug!(file_id = %file_id, "MIME type accepted");

        let temp = self.download_to_temp(file_id).await?;
        debug!(file_id = %file_id, path = %temp.path().display(), "Downloaded");

        let filename = filename::derive(&remote.name, file_id, mime);
        let ingested = self
            .repository
            .ingest(IngestRequest {
                temp_path: temp.path(),
                mime,
                filename: &filename,
                owner: self.options.owner.as_deref(),
            })
            .await;

        if let Err(e) = temp.close() {
            warn!(file_id = %file_id, "Failed to remove temporary file: {}", e);
        }

        let asset = ingested?;
        info!(
            file_id = %file_id,
            repository = self.repository.name(),
            "Imported {} as {}",
            filename,
            asset.repository_id
        );

        Ok(ImportResult::Imported {
            repository_id: asset.repository_id,
            url: asset.url,
            filename,
        })
    }

    /// Stream the file content into a new temporary file.
    async fn download_to_temp(&self, file_id: &DriveId) -> Result<NamedTempFile, ImportError> {
        let download_error = |message: String| ImportError::Download {
            file_id: file_id.clone(),
            message,
        };

        let mut stream = self.drive.download(file_id).await.map_err(|e| match e {
            ClientError::Auth(auth) => ImportError::NotAuthenticated(auth),
            other => download_error(download_detail(other)),
        })?;

        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX);
        let temp = match &self.options.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| download_error(format!("cannot create temporary file: {}", e)))?;

        let handle = temp
            .as_file()
            .try_clone()
            .map_err(|e| download_error(format!("cannot open temporary file: {}", e)))?;
        let mut file = tokio::fs::File::from_std(handle);

        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| download_error(download_detail(e)))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| download_error(format!("write failed: {}", e)))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| download_error(format!("write failed: {}", e)))?;

        debug!(file_id = %file_id, bytes = written, "Download complete");
        Ok(temp)
    }
}

/// Error text without the client's own "download failed" prefix.
fn download_detail(e: ClientError) -> String {
    match e {
        ClientError::Download(message) => message,
        other => other.to_string(),
    }
}
