//! Static file fallback for paths no route claims.
//!
//! Roots are searched in order; the first root containing the decoded request
//! path as a regular file wins. Paths with `..` segments never reach the
//! filesystem and are reported as missing, never as forbidden.
//!
//! A hit is returned as an open file plus its length so the body can be
//! streamed instead of read into memory.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tracing::{debug, warn};

/// MIME type used for every extension outside the table.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A static file opened and ready to be streamed.
#[derive(Debug)]
pub struct StaticFile {
    pub path: PathBuf,
    pub content_type: &'static str,
    pub file: File,
    pub len: u64,
}

/// Maps a file extension to its MIME type.
///
/// # Examples
///
/// ```
/// use netjin::router::static_files::content_type_for;
/// use std::path::Path;
///
/// assert_eq!(content_type_for(Path::new("site.css")), "text/css");
/// assert_eq!(content_type_for(Path::new("logo.png")), "application/octet-stream");
/// ```
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Turns a decoded request path into a path relative to a static root.
///
/// Returns `None` for anything that could escape the root: `..` segments,
/// backslashes, NUL bytes, or an empty path.
pub fn relative_path(decoded: &str) -> Option<PathBuf> {
    let trimmed = decoded.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.contains('\\') || trimmed.contains('\0') {
        return None;
    }

    let mut relative = PathBuf::new();
    for segment in trimmed.split('/') {
        match segment {
            ".." => return None,
            "" | "." => continue,
            part => relative.push(part),
        }
    }

    (!relative.as_os_str().is_empty()).then_some(relative)
}

/// Looks `decoded` up under each root in turn and opens the first regular file.
pub async fn lookup(roots: &[PathBuf], decoded: &str) -> Option<StaticFile> {
    let Some(relative) = relative_path(decoded) else {
        if decoded.split('/').any(|s| s == "..") {
            warn!(path = decoded, "rejected static path with parent segment");
        }
        return None;
    };

    for root in roots {
        let candidate = root.join(&relative);
        let Ok(file) = File::open(&candidate).await else {
            continue;
        };
        // Metadata of the open handle, so the length belongs to the file we stream.
        let len = match file.metadata().await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => continue,
            Err(e) => {
                warn!(file = %candidate.display(), error = %e, "failed to stat static file");
                continue;
            }
        };

        debug!(file = %candidate.display(), bytes = len, "serving static file");
        return Some(StaticFile {
            content_type: content_type_for(&candidate),
            path: candidate,
            file,
            len,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[test]
    fn mime_table() {
        assert_eq!(content_type_for(Path::new("a/index.html")), "text/html");
        assert_eq!(content_type_for(Path::new("app.JS")), "application/javascript");
        assert_eq!(content_type_for(Path::new("data.json")), "application/json");
        assert_eq!(content_type_for(Path::new("README")), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for(Path::new("x.htm")), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn relative_path_strips_leading_slash() {
        assert_eq!(relative_path("/css/site.css"), Some(PathBuf::from("css/site.css")));
        assert_eq!(relative_path("/./a//b"), Some(PathBuf::from("a/b")));
    }

    #[test]
    fn relative_path_rejects_traversal() {
        assert_eq!(relative_path("/../../etc/passwd"), None);
        assert_eq!(relative_path("/a/../b"), None);
        assert_eq!(relative_path("/a\\..\\b"), None);
        assert_eq!(relative_path("/"), None);
    }

    async fn read_all(mut file: File) -> Vec<u8> {
        let mut out = Vec::new();
        file.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn lookup_searches_roots_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("app.js"), "second").unwrap();
        std::fs::write(first.path().join("shared.css"), "first").unwrap();
        std::fs::write(second.path().join("shared.css"), "shadowed").unwrap();
        let roots = vec![first.path().to_path_buf(), second.path().to_path_buf()];

        let js = lookup(&roots, "/app.js").await.unwrap();
        assert_eq!(read_all(js.file).await, b"second");
        assert_eq!(js.len, 6);
        assert_eq!(js.content_type, "application/javascript");

        let css = lookup(&roots, "/shared.css").await.unwrap();
        assert_eq!(read_all(css.file).await, b"first");
        assert!(css.path.starts_with(first.path()));
    }

    #[tokio::test]
    async fn lookup_skips_directories_and_missing_files() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("sub")).unwrap();
        let roots = vec![root.path().to_path_buf()];
        assert!(lookup(&roots, "/sub").await.is_none());
        assert!(lookup(&roots, "/missing.txt").await.is_none());
    }

    #[tokio::test]
    async fn lookup_never_escapes_root() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("public");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("secret.txt"), "top secret").unwrap();
        assert!(lookup(&[root], "/../secret.txt").await.is_none());
    }
}
