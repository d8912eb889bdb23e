//! Google Drive API client.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use drivemedia_common::{ClientError, DriveId, ImageMime};

use crate::auth::{Endpoints, TokenStore};

/// Fields requested for single-file metadata.
const METADATA_FIELDS: &str = "id,name,mimeType,size";
/// Fields requested for folder listings.
const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,size)";
/// Results per listing page.
const PAGE_SIZE: &str = "100";

/// Streamed file content.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// Transport settings for Drive requests.
#[derive(Debug, Clone)]
pub struct DriveOptions {
    /// Timeout for metadata, listing and thumbnail requests.
    pub request_timeout: Duration,
    /// Timeout for a whole content download, body included.
    pub download_timeout: Duration,
    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for DriveOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(120),
            user_agent: format!("drivemedia/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl DriveOptions {
    /// Build the shared HTTP client.
    pub fn http_client(&self) -> Result<Client, ClientError> {
        Client::builder()
            .user_agent(self.user_agent.as_str())
            .connect_timeout(self.request_timeout)
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to create HTTP client: {}", e)))
    }
}

/// A Drive file as returned by metadata and listing calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// File ID.
    pub id: String,
    /// File name.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// Size in bytes, when Drive reports one.
    pub size: Option<u64>,
}

impl RemoteFile {
    /// The whitelisted image format of this file, if any.
    pub fn image_mime(&self) -> Option<ImageMime> {
        ImageMime::from_mime(&self.mime_type)
    }
}

/// Drive file resource on the wire.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
    /// Drive encodes sizes as decimal strings.
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    thumbnail_link: Option<String>,
}

impl From<DriveFile> for RemoteFile {
    fn from(file: DriveFile) -> Self {
        RemoteFile {
            size: file.size.as_deref().and_then(|s| s.parse().ok()),
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
        }
    }
}

/// Response from listing files.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// A provider-rendered preview image.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    /// Content-Type reported by the thumbnail host.
    pub content_type: String,
    /// Image bytes.
    pub body: Bytes,
}

/// Drive search query selecting whitelisted images directly inside `folder_id`.
fn folder_images_query(folder_id: &DriveId) -> String {
    let mimes = ImageMime::ALL
        .iter()
        .map(|m| format!("mimeType='{}'", m.as_str()))
        .collect::<Vec<_>>()
        .join(" or ");
    format!("'{}' in parents and ({}) and trashed=false", folder_id, mimes)
}

/// Google Drive API client.
///
/// Every call first asks the [`TokenStore`] for an access token; when that
/// fails the call fails without touching the network.
pub struct DriveClient {
    http: Client,
    tokens: Arc<TokenStore>,
    api_base: String,
    options: DriveOptions,
}

impl DriveClient {
    /// Create a new Drive client.
    pub fn new(
        tokens: Arc<TokenStore>,
        endpoints: &Endpoints,
        http: Client,
        options: DriveOptions,
    ) -> Self {
        Self {
            http,
            tokens,
            api_base: endpoints.api_base.trim_end_matches('/').to_string(),
            options,
        }
    }

    /// The token store backing this client.
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Get authorization header.
    async fn auth_header(&self) -> Result<String, ClientError> {
        let token = self.tokens.access_token().await?;
        Ok(format!("Bearer {}", token))
    }

    fn file_url(&self, file_id: &DriveId) -> String {
        format!("{}/files/{}", self.api_base, file_id)
    }

    async fn get_file(&self, file_id: &DriveId, fields: &str) -> Result<DriveFile, ClientError> {
        let auth = self.auth_header().await?;

        debug!(file_id = %file_id, "Fetching file metadata");
        let response = self
            .http
            .get(self.file_url(file_id))
            .header(header::AUTHORIZATION, auth)
            .query(&[("fields", fields), ("supportsAllDrives", "true")])
            .timeout(self.options.request_timeout)
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("failed to get file: {}", e)))?;

        let file: DriveFile = self.handle_response(response, file_id.as_str()).await?;
        if file.id.is_empty() {
            return Err(ClientError::NotFound(file_id.to_string()));
        }
        Ok(file)
    }

    /// Get file metadata by ID.
    ///
    /// # Errors
    /// - `NotFound` for a 404 or a response without an `id`
    /// - `Auth` if no access token is available
    pub async fn file_metadata(&self, file_id: &DriveId) -> Result<RemoteFile, ClientError> {
        self.get_file(file_id, METADATA_FIELDS).await.map(RemoteFile::from)
    }

    /// List the whitelisted images directly inside a folder.
    ///
    /// Follows `nextPageToken` until Drive stops returning one and
    /// concatenates pages in arrival order. A failed page discards everything
    /// gathered so far. An empty folder yields an empty vector.
    pub async fn list_folder_images(
        &self,
        folder_id: &DriveId,
    ) -> Result<Vec<RemoteFile>, ClientError> {
        let url = format!("{}/files", self.api_base);
        let query = folder_images_query(folder_id);
        let mut all_files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let auth = self.auth_header().await?;

            let mut request = self
                .http
                .get(&url)
                .header(header::AUTHORIZATION, auth)
                .query(&[
                    ("q", query.as_str()),
                    ("fields", LIST_FIELDS),
                    ("pageSize", PAGE_SIZE),
                    ("supportsAllDrives", "true"),
                    ("includeItemsFromAllDrives", "true"),
                ])
                .timeout(self.options.request_timeout);

            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| ClientError::Transport(format!("failed to list folder: {}", e)))?;

            let page: FileListResponse = self.handle_response(response, folder_id.as_str()).await?;
            debug!(
                folder_id = %folder_id,
                page_files = page.files.len(),
                "Fetched listing page"
            );
            all_files.extend(page.files.into_iter().map(RemoteFile::from));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(all_files)
    }

    /// Download file content as a stream.
    ///
    /// The download timeout bounds the whole transfer, body included.
    pub async fn download(&self, file_id: &DriveId) -> Result<ByteStream, ClientError> {
        let auth = self.auth_header().await?;

        debug!(file_id = %file_id, "Starting download");
        let response = self
            .http
            .get(self.file_url(file_id))
            .header(header::AUTHORIZATION, auth)
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .timeout(self.options.download_timeout)
            .send()
            .await
            .map_err(|e| ClientError::Download(format!("failed to start download: {}", e)))?;

        if !response.status().is_success() {
            return Err(match self.status_error(response, file_id.as_str()).await {
                ClientError::Api { status, message } => {
                    ClientError::Download(format!("{} - {}", status, message))
                }
                other => other,
            });
        }

        let stream = response
            .bytes_stream()
            .map(|result| {
                result.map_err(|e| ClientError::Download(format!("stream read error: {}", e)))
            });

        Ok(Box::pin(stream))
    }

    /// Fetch the provider-rendered thumbnail of a file.
    ///
    /// # Errors
    /// - `NotFound` if Drive offers no thumbnail for the file
    pub async fn thumbnail(&self, file_id: &DriveId) -> Result<Thumbnail, ClientError> {
        let file = self.get_file(file_id, "id,thumbnailLink").await?;
        let link = file
            .thumbnail_link
            .filter(|l| !l.is_empty())
            .ok_or_else(|| ClientError::NotFound(format!("no thumbnail for {}", file_id)))?;

        let auth = self.auth_header().await?;
        let response = self
            .http
            .get(&link)
            .header(header::AUTHORIZATION, auth)
            .timeout(self.options.request_timeout)
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("failed to fetch thumbnail: {}", e)))?;

        if !response.status().is_success() {
            return Err(self.status_error(response, file_id.as_str()).await);
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();

        let body = response
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(format!("failed to read thumbnail: {}", e)))?;

        Ok(Thumbnail { content_type, body })
    }

    /// Handle API response with error checking.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: Response,
        resource: &str,
    ) -> Result<T, ClientError> {
        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| {
                    ClientError::InvalidResponse(format!("failed to parse response: {}", e))
                })
        } else {
            Err(self.status_error(response, resource).await)
        }
    }

    /// Map a non-success response to an error.
    async fn status_error(&self, response: Response, resource: &str) -> ClientError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.error.message)
            .unwrap_or(body);

        match status {
            StatusCode::NOT_FOUND => ClientError::NotFound(resource.to_string()),
            StatusCode::UNAUTHORIZED => ClientError::Unauthorized,
            StatusCode::FORBIDDEN => ClientError::PermissionDenied(message),
            _ => ClientError::Api {
                status: status.as_u16(),
                message,
            },
        }
    }
}
