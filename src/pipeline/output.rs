//! Optional on-disk copy of a run's synthesized audio.
//!
//! Audio goes to `{path}.part` while the run is in flight and is renamed to
//! the final path only on success, so a failed or cancelled run never leaves
//! a truncated file behind.

use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Writer for one run's audio file.
#[derive(Debug)]
pub struct AudioFileSink {
    final_path: PathBuf,
    part_path: PathBuf,
    file: Option<tokio::fs::File>,
    bytes_written: u64,
}

impl AudioFileSink {
    /// Create `{path}.part`, replacing any stale one.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory or file cannot be created.
    pub async fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let part_path = part_path_for(path);
        let file = tokio::fs::File::create(&part_path).await?;
        Ok(Self {
            final_path: path.to_path_buf(),
            part_path,
            file: Some(file),
            bytes_written: 0,
        })
    }

    /// Temporary path receiving audio.
    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append a chunk.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the write fails.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(chunk).await?;
            self.bytes_written += chunk.len() as u64;
        }
        Ok(())
    }

    /// Flush and move the file into place.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the flush or rename fails; the partial file is
    /// removed in that case.
    pub async fn commit(mut self) -> Result<PathBuf> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&self.part_path, &self.final_path).await?;
        debug!(
            path = %self.final_path.display(),
            bytes = self.bytes_written,
            "audio file written"
        );
        // Renamed away; nothing left for Drop to remove.
        self.part_path = PathBuf::new();
        Ok(self.final_path.clone())
    }

    /// Remove the partial file.
    pub fn discard(self) {
        drop(self);
    }
}

impl Drop for AudioFileSink {
    fn drop(&mut self) {
        if self.part_path.as_os_str().is_empty() {
            return;
        }
        self.file.take();
        if let Err(e) = std::fs::remove_file(&self.part_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(
                path = %self.part_path.display(),
                error = %e,
                "failed to remove partial audio file"
            );
        }
    }
}

fn part_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}
