//! Common types used throughout drivemedia.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimum length of a bare id pasted without a surrounding link.
const BARE_ID_MIN_LEN: usize = 20;

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Identifier of a Drive file or folder.
///
/// Only `[A-Za-z0-9_-]` characters are accepted, which keeps ids safe to
/// splice into request paths and Drive search queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DriveId(String);

impl DriveId {
    /// Validate and wrap a Drive id.
    ///
    /// # Errors
    /// - Returns `InvalidDriveId` if `id` is empty or contains other characters
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidDriveId> {
        let id = id.into();
        if id.is_empty() || !id.chars().all(is_id_char) {
            return Err(InvalidDriveId(id));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DriveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DriveId {
    type Err = InvalidDriveId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DriveId {
    type Error = InvalidDriveId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DriveId> for String {
    fn from(id: DriveId) -> Self {
        id.0
    }
}

/// Rejected Drive id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid Drive id: {0:?}")]
pub struct InvalidDriveId(pub String);

/// A pasted Drive link resolved to what it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveLink {
    File(DriveId),
    Folder(DriveId),
}

impl DriveLink {
    /// Parse a pasted line.
    ///
    /// Recognises, in order: `/d/<id>` file links, `/folders/<id>` folder
    /// links, `?id=<id>` / `&id=<id>` file links and bare ids of at least
    /// 20 characters. Returns `None` for anything else.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();

        if let Some(id) = id_after(input, "/d/") {
            return Some(DriveLink::File(id));
        }
        if let Some(id) = id_after(input, "/folders/") {
            return Some(DriveLink::Folder(id));
        }
        let query_id = match (input.find("?id="), input.find("&id=")) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let Some(pos) = query_id {
            if let Some(id) = take_id(&input[pos + 4..]) {
                return Some(DriveLink::File(id));
            }
        }
        if input.len() >= BARE_ID_MIN_LEN {
            if let Ok(id) = DriveId::new(input) {
                return Some(DriveLink::File(id));
            }
        }

        None
    }

    /// Resolve a folder reference: a folder link, or any link/id whose id is
    /// taken as the folder id.
    pub fn folder_id(input: &str) -> Result<DriveId, InvalidDriveId> {
        match Self::parse(input) {
            Some(link) => Ok(link.into_id()),
            None => DriveId::new(input.trim()),
        }
    }

    /// The id the link points at.
    pub fn id(&self) -> &DriveId {
        match self {
            DriveLink::File(id) | DriveLink::Folder(id) => id,
        }
    }

    /// Consume the link, returning its id.
    pub fn into_id(self) -> DriveId {
        match self {
            DriveLink::File(id) | DriveLink::Folder(id) => id,
        }
    }
}

fn id_after(input: &str, marker: &str) -> Option<DriveId> {
    let pos = input.find(marker)?;
    take_id(&input[pos + marker.len()..])
}

fn take_id(rest: &str) -> Option<DriveId> {
    let end = rest.find(|c: char| !is_id_char(c)).unwrap_or(rest.len());
    DriveId::new(&rest[..end]).ok()
}

/// Image formats accepted for listing and import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageMime {
    Jpeg,
    Png,
    Webp,
    Gif,
    Svg,
}

impl ImageMime {
    /// Every accepted format, in the order used for Drive search queries.
    pub const ALL: [ImageMime; 5] = [
        ImageMime::Jpeg,
        ImageMime::Png,
        ImageMime::Webp,
        ImageMime::Gif,
        ImageMime::Svg,
    ];

    /// Look up a MIME type string. Returns `None` outside the whitelist.
    pub fn from_mime(mime: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == mime)
    }

    /// The MIME type string as Drive reports it.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageMime::Jpeg => "image/jpeg",
            ImageMime::Png => "image/png",
            ImageMime::Webp => "image/webp",
            ImageMime::Gif => "image/gif",
            ImageMime::Svg => "image/svg+xml",
        }
    }

    /// Canonical file extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageMime::Jpeg => "jpg",
            ImageMime::Png => "png",
            ImageMime::Webp => "webp",
            ImageMime::Gif => "gif",
            ImageMime::Svg => "svg",
        }
    }
}

impl fmt::Display for ImageMime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
