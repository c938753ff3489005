use std::path::Path;
use tokio::fs;
use tracker_core::{TrackerError, TrackerResult};

/// Writes whole files through a temp file in the same directory followed by a rename,
/// so readers never observe a half-written value.
pub struct AtomicWriter;

impl AtomicWriter {
    pub async fn write_atomic(path: &Path, data: &[u8]) -> TrackerResult<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).await?;

        // Same directory keeps the rename on one filesystem
        let temp_file = tempfile::NamedTempFile::new_in(parent)?;
        fs::write(temp_file.path(), data).await?;
        temp_file
            .persist(path)
            .map_err(|e| TrackerError::Io(e.error))?;

        tracing::debug!(
            "Atomically wrote {} bytes to {}",
            data.len(),
            path.display()
        );
        Ok(())
    }

    pub async fn read_all(path: &Path) -> TrackerResult<Vec<u8>> {
        let data = fs::read(path).await?;
        tracing::debug!("Read {} bytes from {}", data.len(), path.display());
        Ok(data)
    }

    /// Like `read_all`, but a missing file is `None` rather than an error.
    pub async fn read_optional(path: &Path) -> TrackerResult<Option<Vec<u8>>> {
        match Self::read_all(path).await {
            Ok(data) => Ok(Some(data)),
            Err(TrackerError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}
