//! Error types for drivemedia operations.
//!
//! Each layer surfaces its own typed error: [`AuthError`] from the token
//! store, [`ClientError`] from the Drive client and [`StoreError`] from the
//! settings persistence. [`ErrorKind`] is the flat classification reported
//! per file by the import pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised by the OAuth token store.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Client id or client secret is missing.
    #[error("Google API client credentials are not configured")]
    NotConfigured,

    /// No credential is stored.
    #[error("not connected to Google Drive")]
    NotConnected,

    /// Authorization code exchange failed.
    #[error("authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    /// Access token refresh failed.
    #[error("access token refresh failed: {0}")]
    RefreshFailed(String),

    /// Client configuration or endpoint URL is malformed.
    #[error("invalid OAuth configuration: {0}")]
    InvalidConfig(String),

    /// The credential could not be persisted.
    #[error("credential persistence failed: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by the Drive API client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No valid access token could be obtained.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The file or folder does not exist or is not visible.
    #[error("not found: {0}")]
    NotFound(String),

    /// Drive rejected the bearer token.
    #[error("Drive rejected the access token")]
    Unauthorized,

    /// The account cannot read the resource.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Any other non-success status.
    #[error("Drive API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The content download failed mid-way.
    #[error("download failed: {0}")]
    Download(String),

    /// The response body did not match the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Classify this error for per-file reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Auth(e) => e.kind(),
            ClientError::NotFound(_) => ErrorKind::NotFound,
            ClientError::Download(_) => ErrorKind::DownloadFailed,
            ClientError::Transport(_)
            | ClientError::Unauthorized
            | ClientError::PermissionDenied(_)
            | ClientError::Api { .. }
            | ClientError::InvalidResponse(_) => ErrorKind::TransportError,
        }
    }
}

impl AuthError {
    /// Classify this error for per-file reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::NotConfigured | AuthError::InvalidConfig(_) => ErrorKind::NotConfigured,
            AuthError::NotConnected => ErrorKind::NotConnected,
            AuthError::ExchangeFailed(_) => ErrorKind::AuthExchangeFailed,
            AuthError::RefreshFailed(_) | AuthError::Store(_) => ErrorKind::RefreshFailed,
        }
    }
}

/// Errors raised while reading or writing persisted settings.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The record was written by a newer schema.
    #[error("settings version {found} is newer than supported version {supported}")]
    IncompatibleVersion { found: u32, supported: u32 },
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Flat error classification carried by failed import results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotConfigured,
    NotConnected,
    AuthExchangeFailed,
    RefreshFailed,
    TransportError,
    NotFound,
    UnsupportedMimeType,
    DownloadFailed,
    IngestFailed,
}

impl ErrorKind {
    /// Whether the failure stems from missing or broken authentication.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ErrorKind::NotConfigured
                | ErrorKind::NotConnected
                | ErrorKind::AuthExchangeFailed
                | ErrorKind::RefreshFailed
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotConfigured => "not configured",
            ErrorKind::NotConnected => "not connected",
            ErrorKind::AuthExchangeFailed => "auth exchange failed",
            ErrorKind::RefreshFailed => "refresh failed",
            ErrorKind::TransportError => "transport error",
            ErrorKind::NotFound => "not found",
            ErrorKind::UnsupportedMimeType => "unsupported mime type",
            ErrorKind::DownloadFailed => "download failed",
            ErrorKind::IngestFailed => "ingest failed",
        };
        f.write_str(s)
    }
}
