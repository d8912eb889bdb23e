//! Filename derivation for imported files.

use std::path::Path;

use drivemedia_common::{DriveId, ImageMime};

/// Turn a remote file name into a safe local file name.
///
/// Keeps only the last path component. The stem keeps `[A-Za-z0-9._-]`,
/// whitespace becomes `-`, runs of `-` collapse, and leading or trailing
/// `.`, `-` and `_` are trimmed; the extension keeps ASCII alphanumerics.
/// A stem with nothing left falls back to `drive-<file id>`.
pub fn sanitize(name: &str, file_id: &DriveId) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    let (stem, ext) = match base.rfind('.') {
        Some(pos) if pos > 0 => (&base[..pos], &base[pos + 1..]),
        _ => (base, ""),
    };

    let mut clean = clean_stem(stem);
    if clean.is_empty() {
        clean = format!("drive-{}", file_id);
    }

    let ext: String = ext.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if !ext.is_empty() {
        clean.push('.');
        clean.push_str(&ext);
    }
    clean
}

fn clean_stem(stem: &str) -> String {
    let mut out = String::with_capacity(stem.len());
    for c in stem.chars() {
        let mapped = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else if c.is_whitespace() {
            '-'
        } else {
            continue;
        };
        if mapped == '-' && out.ends_with('-') {
            continue;
        }
        out.push(mapped);
    }

    out.trim_matches(|c| matches!(c, '.' | '-' | '_')).to_string()
}

/// Append the canonical extension for `mime` when `filename` has none.
pub fn with_extension(filename: &str, mime: ImageMime) -> String {
    match Path::new(filename).extension() {
        Some(ext) if !ext.is_empty() => filename.to_string(),
        _ => format!("{}.{}", filename, mime.extension()),
    }
}

/// Final local file name for a remote file.
pub fn derive(name: &str, file_id: &DriveId, mime: ImageMime) -> String {
    with_extension(&sanitize(name, file_id), mime)
}
