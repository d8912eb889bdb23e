//! Media repository abstraction and the local filesystem repository.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use drivemedia_common::ImageMime;

/// Highest numeric suffix tried when a file name is taken.
const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// Errors raised by a media repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file to ingest has no content.
    #[error("file is empty: {0}")]
    EmptyFile(String),

    /// The repository refused the file.
    #[error("{0}")]
    Rejected(String),
}

/// A file handed to the repository for permanent storage.
#[derive(Debug, Clone, Copy)]
pub struct IngestRequest<'a> {
    /// Local file holding the content. Removed by the caller afterwards.
    pub temp_path: &'a Path,
    /// Validated image format.
    pub mime: ImageMime,
    /// Desired file name, already sanitised.
    pub filename: &'a str,
    /// Owner the asset is attached to, if any.
    pub owner: Option<&'a str>,
}

/// A stored asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestedAsset {
    /// Stable identifier assigned by the repository.
    pub repository_id: String,
    /// Fetchable URL of the asset.
    pub url: String,
}

/// Permanent storage for imported media.
///
/// Implementations must finish reading `temp_path` before returning: the
/// file is deleted as soon as `ingest` completes.
#[async_trait]
pub trait MediaRepository: Send + Sync {
    /// Repository name for logging (e.g., "local").
    fn name(&self) -> &str;

    /// Store the file and return its identifier and URL.
    ///
    /// # Errors
    /// - The content cannot be read or stored
    /// - The repository rejects the file
    async fn ingest(&self, request: IngestRequest<'_>) -> Result<IngestedAsset, RepositoryError>;
}

/// Media repository on the local filesystem.
///
/// Assets are stored under `<root>/<YYYY>/<MM>/<filename>`. Taken names get a
/// `-1`, `-2`, ... suffix before the extension.
pub struct LocalRepository {
    root: PathBuf,
    base_url: String,
}

impl LocalRepository {
    /// Create a repository rooted at `root`, serving files under `base_url`.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    pub fn new(
        root: impl AsRef<Path>,
        base_url: impl Into<String>,
    ) -> Result<Self, RepositoryError> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self {
            root,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Root directory of the repository.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create an empty file under a free name in `dir`.
    async fn claim_name(
        &self,
        dir: &Path,
        filename: &str,
    ) -> Result<(PathBuf, fs::File), RepositoryError> {
        let (stem, ext) = match filename.rfind('.') {
            Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
            _ => (filename, ""),
        };

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = if attempt == 0 {
                filename.to_string()
            } else {
                format!("{}-{}{}", stem, attempt, ext)
            };
            let path = dir.join(&candidate);

            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(RepositoryError::Rejected(format!(
            "no free file name for {}",
            filename
        )))
    }
}

#[async_trait]
impl MediaRepository for LocalRepository {
    fn name(&self) -> &str {
        "local"
    }

    async fn ingest(&self, request: IngestRequest<'_>) -> Result<IngestedAsset, RepositoryError> {
        let size = fs::metadata(request.temp_path).await?.len();
        if size == 0 {
            return Err(RepositoryError::EmptyFile(request.filename.to_string()));
        }

        let now = Utc::now();
        let relative = format!("{:04}/{:02}", now.year(), now.month());
        let dir = self.root.join(now.year().to_string()).join(format!("{:02}", now.month()));
        fs::create_dir_all(&dir).await?;

        let (path, mut dest) = self.claim_name(&dir, request.filename).await?;

        let copied = async {
            let mut source = fs::File::open(request.temp_path).await?;
            tokio::io::copy(&mut source, &mut dest).await?;
            dest.flush().await
        }
        .await;

        if let Err(e) = copied {
            drop(dest);
            let _ = fs::remove_file(&path).await;
            return Err(e.into());
        }

        let stored_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| request.filename.to_string());

        let asset = IngestedAsset {
            repository_id: Uuid::new_v4().to_string(),
            url: format!("{}/{}/{}", self.base_url, relative, stored_name),
        };

        debug!(owner = ?request.owner, mime = %request.mime, bytes = size, "Stored asset");
        info!("Stored {} as {}", stored_name, asset.repository_id);
        Ok(asset)
    }
}
