//! Scoped on-disk artifacts.
//!
//! An artifact lives only as long as its [`TemporaryArtifact`] handle. The
//! handle removes the file when it is released or dropped, so every exit path
//! of a delivery cycle cleans up after itself.

use std::path::{Path, PathBuf};

use {
    tempfile::TempPath,
    tracing::{debug, warn},
};

use crate::{Error, Result};

/// Directory that holds in-flight artifacts.
#[derive(Debug, Clone)]
pub struct TempStore {
    dir: PathBuf,
}

impl TempStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the backing directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::write(format!("create {}", self.dir.display()), e))
    }

    /// Persist `bytes` under a fresh random path and return its owning handle.
    ///
    /// `name` is the user-facing file name; it only contributes its extension
    /// to the on-disk path.
    pub async fn create(&self, name: &str, bytes: &[u8]) -> Result<TemporaryArtifact> {
        self.ensure_dir().await?;

        let suffix = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        let path = tempfile::Builder::new()
            .prefix("lembar-")
            .suffix(&suffix)
            .tempfile_in(&self.dir)
            .map_err(|e| Error::write("create temporary file", e))?
            .into_temp_path();

        // On failure `path` is dropped here, which removes the half-written file.
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::write(format!("write {}", path.display()), e))?;

        debug!(name, path = %path.display(), size = bytes.len(), "temporary artifact created");
        Ok(TemporaryArtifact {
            name: name.to_string(),
            path: Some(path),
        })
    }
}

/// A named document on transient storage, removed when released or dropped.
#[derive(Debug)]
pub struct TemporaryArtifact {
    name: String,
    path: Option<TempPath>,
}

impl TemporaryArtifact {
    /// User-facing file name (including extension).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Location of the bytes on disk.
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    /// Remove the file now, reporting any I/O error.
    pub fn release(mut self) -> Result<()> {
        let Some(path) = self.path.take() else {
            return Ok(());
        };
        let shown = path.display().to_string();
        path.close()
            .map_err(|e| Error::write(format!("remove {shown}"), e))?;
        debug!(name = %self.name, path = %shown, "temporary artifact released");
        Ok(())
    }
}

impl Drop for TemporaryArtifact {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            warn!(name = %self.name, path = %path.display(), "temporary artifact dropped without release");
            // TempPath removes the file on drop.
        }
    }
}
