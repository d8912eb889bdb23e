//! Google Drive access for drivemedia.
//!
//! This crate provides:
//! - OAuth2 credential lifecycle with refresh ahead of expiry ([`TokenStore`])
//! - Versioned settings persistence ([`SettingsStore`])
//! - An authenticated Drive v3 client with cursor pagination and streamed
//!   downloads ([`DriveClient`])
//!
//! # Design Principles
//! - One credential, owned by the token store; callers only see access tokens
//! - No network call without client credentials, no API call without a
//!   stored credential
//! - Large files are handled via streams

pub mod auth;
pub mod client;
pub mod settings;

pub use auth::{ClientConfig, Credential, Endpoints, TokenStore, DEFAULT_REDIRECT_URL};
pub use client::{ByteStream, DriveClient, DriveOptions, RemoteFile, Thumbnail};
pub use settings::{JsonFileStore, MemoryStore, Settings, SettingsStore, SettingsVersion};
