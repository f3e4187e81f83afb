use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::worker::is_artifact_name;

/// Command to remove scratch files left behind by an interrupted run
pub struct CleanCommand {
    scratch_dir: PathBuf,
}

impl CleanCommand {
    pub fn new(scratch_dir: PathBuf) -> Self {
        Self { scratch_dir }
    }

    /// Returns the number of files removed
    pub async fn execute(&self) -> Result<usize> {
        if !self.scratch_dir.exists() {
            return Err(anyhow!(
                "Scratch directory does not exist: {:?}",
                self.scratch_dir
            ));
        }

        if !self.scratch_dir.is_dir() {
            return Err(anyhow!("Path is not a directory: {:?}", self.scratch_dir));
        }

        info!("🧹 Cleaning up leftover artifacts in {:?}...", self.scratch_dir);

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.scratch_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !entry.file_type().await?.is_file() || !is_artifact_name(&name.to_string_lossy()) {
                continue;
            }
            tokio::fs::remove_file(entry.path()).await?;
            debug!("Removed {:?}", entry.path());
            removed += 1;
        }

        info!("✅ Cleanup complete. Removed {} file(s).", removed);
        Ok(removed)
    }
}
