//! Common utilities and types shared across drivemedia crates.
//!
//! This crate provides the error taxonomy, the Drive id newtype with link
//! parsing, and the image MIME whitelist used by both listing and import.

pub mod error;
pub mod types;

pub use error::{AuthError, ClientError, ErrorKind, StoreError};
pub use types::{DriveId, DriveLink, ImageMime, InvalidDriveId};
