//! Site directory scanning and validation.
//!
//! The scanner walks the site root, collects regular files, and assigns each
//! one its normalized site path (the d-tag its location record will carry).
//! Hashing happens later in the upload engine, once per file.

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use gantry_core::normalize_site_path;

use crate::error::{Error, Result};

/// One publishable file found under the site root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteFile {
    /// Where the bytes live on disk.
    pub disk_path: PathBuf,
    /// Normalized absolute site path, e.g. `/css/style.css`.
    pub site_path: String,
    /// File size in bytes.
    pub size: u64,
}

/// Walk the site directory and collect regular files, sorted by site path.
///
/// Hidden entries (dot-prefixed names) are skipped and symlinks are not
/// followed; build output does not normally route through either. Validation
/// fails on a missing or non-directory root, a tree with no files at all,
/// and a tree without `/index.html` at the root, since gateways serve that
/// as the default document.
pub fn scan_site(root: &Path) -> Result<Vec<SiteFile>> {
    if !root.is_dir() {
        return Err(Error::Validation(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root).follow_links(false).into_iter();
    for entry in walker.filter_entry(|e| e.depth() == 0 || !is_hidden(e)) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::Validation(e.to_string()))?;
        let Some(rel_str) = rel.to_str() else {
            warn!(path = %rel.display(), "skipping file with non-UTF-8 name");
            continue;
        };
        let site_path = normalize_site_path(rel_str)?;
        let size = entry.metadata().map_err(std::io::Error::from)?.len();
        files.push(SiteFile {
            disk_path: entry.into_path(),
            site_path,
            size,
        });
    }

    if files.is_empty() {
        return Err(Error::Validation(format!(
            "{} contains no files to deploy",
            root.display()
        )));
    }

    files.sort_by(|a, b| a.site_path.cmp(&b.site_path));

    if !files.iter().any(|f| f.site_path == "/index.html") {
        return Err(Error::Validation(format!(
            "{} has no index.html at the site root",
            root.display()
        )));
    }

    info!(files = files.len(), root = %root.display(), "site scanned");
    Ok(files)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// Content type reported to storage servers, from the file extension.
pub fn content_type_for(site_path: &str) -> &'static str {
    let ext = Path::new(site_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" | "map" => "application/json",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}
