//! Local output directory for extracted BLOBs.
//!
//! Each write allocates a new `<uuid-v7>.<ext>` name. The final name is
//! reserved with an exclusive create before any data is written, so two
//! writers can never end up with the same file. Content goes to a hidden
//! temp file that is synced and then renamed over the reservation, so the
//! final name never holds a partial BLOB.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use docferry_core::{defaults, Result};

/// Directory extracted files are written to.
#[derive(Debug, Clone)]
pub struct OutputDirectory {
    root: PathBuf,
    extension: String,
}

impl OutputDirectory {
    /// Create the directory if needed and resolve it to an absolute path.
    pub async fn prepare(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path).await.map_err(|e| {
            warn!(path = %path.display(), error = %e, "output: create_dir_all failed");
            e
        })?;
        let root = fs::canonicalize(path).await?;
        debug!(root = %root.display(), "output: directory ready");
        Ok(Self {
            root,
            extension: defaults::OUTPUT_EXTENSION.to_string(),
        })
    }

    /// Override the extension given to new files.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Absolute path of the directory.
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn allocate_name(&self) -> String {
        format!("{}.{}", Uuid::now_v7(), self.extension)
    }

    /// Write `data` to a newly named file and return its absolute path.
    pub async fn write_new(&self, data: &[u8]) -> std::io::Result<PathBuf> {
        let name = self.allocate_name();
        let final_path = self.root.join(&name);
        let temp_path = self.root.join(format!(".{}.tmp", name));

        // Reserve the final name; fails with AlreadyExists instead of clobbering.
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&final_path)
            .await
            .map_err(|e| {
                warn!(path = %final_path.display(), error = %e, "output: reserve failed");
                e
            })?;

        let written = async {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)
                .await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &final_path).await
        }
        .await;

        if let Err(e) = written {
            warn!(path = %final_path.display(), error = %e, "output: write failed");
            let _ = fs::remove_file(&temp_path).await;
            let _ = fs::remove_file(&final_path).await;
            return Err(e);
        }

        debug!(path = %final_path.display(), bytes = data.len(), "output: file written");
        Ok(final_path)
    }

    /// Validate that the directory can be written, read, and cleaned up.
    ///
    /// Run at startup to surface permission problems before the first pass.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        let check_file = self.root.join(".docferry-health-check");
        let data = b"docferry-health-check";

        fs::write(&check_file, data)
            .await
            .map_err(|e| format!("write({:?}): {}", check_file, e))?;
        let read_back = fs::read(&check_file)
            .await
            .map_err(|e| format!("read({:?}): {}", check_file, e))?;
        if read_back != data {
            return Err("read-back mismatch".to_string());
        }
        fs::remove_file(&check_file)
            .await
            .map_err(|e| format!("remove_file({:?}): {}", check_file, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prepare_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b/c");
        let out = OutputDirectory::prepare(&nested).await.unwrap();
        assert!(out.path().is_absolute());
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn test_write_new_returns_absolute_path_with_content() {
        let tmp = tempfile::tempdir().unwrap();
        let out = OutputDirectory::prepare(tmp.path()).await.unwrap();

        let path = out.write_new(b"%PDF-1.7 blob").await.unwrap();

        assert!(path.is_absolute());
        assert!(path.starts_with(out.path()));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("file"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7 blob");
    }

    #[tokio::test]
    async fn test_write_new_allocates_unique_names() {
        let tmp = tempfile::tempdir().unwrap();
        let out = OutputDirectory::prepare(tmp.path()).await.unwrap();

        let a = out.write_new(b"same").await.unwrap();
        let b = out.write_new(b"same").await.unwrap();

        assert_ne!(a, b);
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_write_new_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let out = OutputDirectory::prepare(tmp.path()).await.unwrap();
        out.write_new(b"").await.unwrap();

        let hidden = std::fs::read_dir(out.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(hidden, 0);
    }

    #[tokio::test]
    async fn test_write_new_fails_when_directory_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("gone");
        let out = OutputDirectory::prepare(&dir).await.unwrap();
        std::fs::remove_dir(&dir).unwrap();

        assert!(out.write_new(b"data").await.is_err());
    }

    #[tokio::test]
    async fn test_custom_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let out = OutputDirectory::prepare(tmp.path())
            .await
            .unwrap()
            .with_extension("bin");
        let path = out.write_new(b"x").await.unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("bin"));
    }

    #[tokio::test]
    async fn test_validate_succeeds_on_writable_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let out = OutputDirectory::prepare(tmp.path()).await.unwrap();
        assert!(out.validate().await.is_ok());
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }
}
