//! Site path normalization.
//!
//! Every file published by gantry is addressed by an absolute, forward-slash
//! path rooted at the site directory (e.g. `/css/style.css`). That path is
//! the replaceable-event identifier for the file's location record, so all
//! producers must agree on one canonical form.

use crate::error::{Error, Result};

/// Normalize a path relative to the site root into its canonical form.
///
/// Rules:
/// - Backslash separators are converted to forward slashes.
/// - The result starts with exactly one `/`.
/// - `.` segments and duplicate slashes are dropped.
/// - `..` segments are rejected; a site path never escapes the root.
///
/// Normalization is idempotent: feeding the output back in returns it
/// unchanged.
pub fn normalize_site_path(path: &str) -> Result<String> {
    let unified = path.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(Error::InvalidPath {
                    path: path.to_string(),
                    reason: "parent traversal",
                });
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return Err(Error::InvalidPath {
            path: path.to_string(),
            reason: "empty path",
        });
    }
    Ok(format!("/{}", segments.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_file_name() {
        assert_eq!(normalize_site_path("index.html").unwrap(), "/index.html");
    }

    #[test]
    fn test_nested_path() {
        assert_eq!(
            normalize_site_path("css/style.css").unwrap(),
            "/css/style.css"
        );
    }

    #[test]
    fn test_backslashes_converted() {
        assert_eq!(
            normalize_site_path("img\\logos\\main.png").unwrap(),
            "/img/logos/main.png"
        );
    }

    #[test]
    fn test_leading_slash_preserved_once() {
        assert_eq!(normalize_site_path("/about.html").unwrap(), "/about.html");
        assert_eq!(normalize_site_path("//about.html").unwrap(), "/about.html");
    }

    #[test]
    fn test_dot_segments_dropped() {
        assert_eq!(
            normalize_site_path("./js/./app.js").unwrap(),
            "/js/app.js"
        );
    }

    #[test]
    fn test_duplicate_slashes_collapsed() {
        assert_eq!(normalize_site_path("a//b///c.txt").unwrap(), "/a/b/c.txt");
    }

    #[test]
    fn test_trailing_slash_dropped() {
        assert_eq!(normalize_site_path("docs/page.html/").unwrap(), "/docs/page.html");
    }

    #[test]
    fn test_idempotent() {
        let once = normalize_site_path("img\\a//.//b.png").unwrap();
        let twice = normalize_site_path(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_parent_traversal_rejected() {
        let err = normalize_site_path("../secret.txt").unwrap_err();
        assert!(matches!(err, Error::InvalidPath { .. }));
        assert!(err.to_string().contains("parent traversal"));
    }

    #[test]
    fn test_inner_parent_traversal_rejected() {
        assert!(normalize_site_path("a/../b.txt").is_err());
    }

    #[test]
    fn test_empty_rejected() {
        assert!(normalize_site_path("").is_err());
        assert!(normalize_site_path("/").is_err());
        assert!(normalize_site_path("././").is_err());
    }

    #[test]
    fn test_unicode_segments_pass_through() {
        assert_eq!(
            normalize_site_path("docs/читать.html").unwrap(),
            "/docs/читать.html"
        );
    }
}
