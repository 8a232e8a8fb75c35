//! Filesystem access as an injected capability.
//!
//! Components that touch disk (the compiler, the stores, the generator)
//! receive an `Arc<dyn Filesystem>` at construction instead of calling the
//! standard library directly, which keeps them testable against a temp
//! directory and keeps every file operation off the lock paths.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Narrow filesystem surface used by the core.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Create `dir` and any missing parents.
    async fn ensure_dir(&self, dir: &Path) -> Result<()>;

    /// Write `contents` to `path`, replacing any existing file.
    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Read the entire file at `path`.
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// List the entries directly under `dir`.
    async fn read_dir(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Remove `dir` and everything below it.
    async fn remove_dir(&self, dir: &Path) -> Result<()>;

    /// Whether a file or directory exists at `path`.
    async fn exists(&self, path: &Path) -> bool;

    /// Atomically replace `path` with `contents` (write-temp + rename).
    async fn replace_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        self.write_file(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("renaming {:?} over {:?}", tmp, path))
    }
}

/// Production implementation over the host filesystem.
#[derive(Debug, Default, Clone)]
pub struct OsFilesystem;

#[async_trait]
impl Filesystem for OsFilesystem {
    async fn ensure_dir(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating directory {:?}", dir))
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating parent of {:?}", path))?;
        }
        tokio::fs::write(path, contents)
            .await
            .with_context(|| format!("writing {:?}", path))
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {:?}", path))
    }

    async fn read_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("listing {:?}", dir))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            paths.push(entry.path());
        }
        paths.sort();
        Ok(paths)
    }

    async fn remove_dir(&self, dir: &Path) -> Result<()> {
        tokio::fs::remove_dir_all(dir)
            .await
            .with_context(|| format!("removing {:?}", dir))
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFilesystem;
        let path = dir.path().join("nested/deep/file.txt");

        fs.write_file(&path, b"payload\nwith newline").await.unwrap();
        let back = fs.read_file(&path).await.unwrap();
        assert_eq!(back, b"payload\nwith newline");
        assert!(fs.exists(&path).await);
    }

    #[tokio::test]
    async fn replace_file_is_atomic_rename() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFilesystem;
        let path = dir.path().join("state.json");

        fs.write_file(&path, b"old").await.unwrap();
        fs.replace_file(&path, b"new").await.unwrap();

        assert_eq!(fs.read_file(&path).await.unwrap(), b"new");
        assert!(!fs.exists(&path.with_extension("tmp")).await);
    }

    #[tokio::test]
    async fn read_dir_lists_sorted_entries() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFilesystem;
        fs.write_file(&dir.path().join("b.txt"), b"").await.unwrap();
        fs.write_file(&dir.path().join("a.txt"), b"").await.unwrap();

        let entries = fs.read_dir(dir.path()).await.unwrap();
        let names: Vec<_> = entries
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn remove_dir_is_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFilesystem;
        let sub = dir.path().join("work");
        fs.write_file(&sub.join("inner/file"), b"x").await.unwrap();

        fs.remove_dir(&sub).await.unwrap();
        assert!(!fs.exists(&sub).await);
    }
}
