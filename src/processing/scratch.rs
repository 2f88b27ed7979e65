//! Per-request temporary directory.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Temporary workspace of one request.
///
/// Nothing touches the disk until the first [`Scratch::file`] call, so a
/// request that is rejected before delegation leaves no trace. Whatever was
/// created is removed by [`Scratch::cleanup`], or on drop if the request was
/// cancelled before it got there.
#[derive(Debug)]
pub struct Scratch {
    root: PathBuf,
    created: bool,
}

impl Scratch {
    /// Plans a workspace at `base/label`. Performs no I/O.
    #[must_use]
    pub fn new(base: impl AsRef<Path>, label: &str) -> Self {
        Self {
            root: base.as_ref().join(sanitize_file_name(label)),
            created: false,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether anything was created on disk yet.
    #[must_use]
    pub const fn is_materialized(&self) -> bool {
        self.created
    }

    /// Returns a path for `name` inside the workspace, creating the
    /// workspace directory on first use.
    pub async fn file(&mut self, name: &str) -> io::Result<PathBuf> {
        if !self.created {
            tokio::fs::create_dir_all(&self.root).await?;
            self.created = true;
            debug!("Created scratch directory {}", self.root.display());
        }
        Ok(self.root.join(sanitize_file_name(name)))
    }

    /// Removes everything the request wrote. Best effort.
    pub async fn cleanup(&mut self) {
        if !self.created {
            return;
        }
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!("Removed scratch directory {}", self.root.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.root.display(), e),
        }
        self.created = false;
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        if self.created {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }
}

/// Reduces `name` to a single safe path component.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "file".to_owned(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("movie.mkv"), "movie.mkv");
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name("  "), "file");
        assert_eq!(sanitize_file_name(".."), "file");
        assert_eq!(sanitize_file_name("a\nb"), "a_b");
    }

    #[tokio::test]
    async fn test_no_io_until_first_file() {
        let base = tempfile::tempdir().unwrap();
        let scratch = Scratch::new(base.path(), "req_1");
        assert!(!scratch.is_materialized());
        assert!(!scratch.root().exists());
    }

    #[tokio::test]
    async fn test_cleanup_removes_everything() {
        let base = tempfile::tempdir().unwrap();
        let mut scratch = Scratch::new(base.path(), "req_2");

        let path = scratch.file("a.bin").await.unwrap();
        tokio::fs::write(&path, b"data").await.unwrap();
        assert!(path.exists());

        scratch.cleanup().await;
        assert!(!scratch.root().exists());
        assert!(!scratch.is_materialized());
    }

    #[tokio::test]
    async fn test_drop_removes_leftovers() {
        let base = tempfile::tempdir().unwrap();
        let root = {
            let mut scratch = Scratch::new(base.path(), "req_3");
            let path = scratch.file("partial.zip").await.unwrap();
            tokio::fs::write(&path, b"half").await.unwrap();
            scratch.root().to_path_buf()
        };
        assert!(!root.exists());
    }
}
