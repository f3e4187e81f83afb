use anyhow::{anyhow, Result};
use glob::Pattern;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::commands::pipeline::LocalPipeline;
use crate::config::Config;
use crate::job::UserId;
use crate::prefs::JsonPreferenceStore;

/// Command to watch an inbox directory and submit every new file
pub struct WatchCommand {
    inbox: PathBuf,
    pattern: String,
    user_id: UserId,
    outbox: PathBuf,
    prefs_path: PathBuf,
}

impl WatchCommand {
    pub fn new(
        inbox: PathBuf,
        pattern: String,
        user_id: UserId,
        outbox: PathBuf,
        prefs_path: PathBuf,
    ) -> Self {
        Self {
            inbox,
            pattern,
            user_id,
            outbox,
            prefs_path,
        }
    }

    pub async fn execute(&self) -> Result<()> {
        if !self.inbox.exists() {
            return Err(anyhow!("Inbox directory does not exist: {:?}", self.inbox));
        }

        if !self.inbox.is_dir() {
            return Err(anyhow!("Path is not a directory: {:?}", self.inbox));
        }

        let pattern = Pattern::new(&self.pattern)
            .map_err(|e| anyhow!("Invalid pattern '{}': {}", self.pattern, e))?;

        let config = Config::from_env();
        let prefs = Arc::new(JsonPreferenceStore::open(&self.prefs_path).await?);
        let pipeline = LocalPipeline::start(&config, self.outbox.clone(), prefs)?;

        info!("👀 Watching {:?} for files matching '{}'", self.inbox, self.pattern);

        // Set up signal handling for graceful shutdown
        tokio::pin! {
            let shutdown_signal = signal::ctrl_c();
        }

        let mut seen = HashSet::new();
        loop {
            for path in self.pending_files(&pattern, &seen) {
                seen.insert(path.clone());
                if let Err(e) = pipeline.submit_file(&path, self.user_id).await {
                    warn!("Failed to submit {:?}: {}", path, e);
                }
            }

            tokio::select! {
                _ = &mut shutdown_signal => {
                    info!("🛑 Shutdown signal received. Finishing in-flight jobs, press Ctrl-C again to abort them.");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(config.sleep_interval)) => {
                    debug!("💤 Rescanning {:?}", self.inbox);
                }
            }
        }

        pipeline.cancel_pending();
        tokio::select! {
            _ = pipeline.state().wait_idle() => {}
            _ = signal::ctrl_c() => {
                warn!("🛑 Second shutdown signal received. Aborting in-flight jobs.");
                pipeline.abort().await;
            }
        }

        pipeline.shutdown().await;
        info!("✅ Watcher stopped.");
        Ok(())
    }

    /// Files directly inside the inbox that match the pattern and were not submitted yet.
    /// Empty files are left for a later scan since they may still be being written.
    pub fn pending_files(&self, pattern: &Pattern, seen: &HashSet<PathBuf>) -> Vec<PathBuf> {
        WalkDir::new(&self.inbox)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy();
                !name.starts_with('.') && pattern.matches(&name)
            })
            .filter(|entry| entry.metadata().map(|m| m.len() > 0).unwrap_or(false))
            .map(|entry| entry.into_path())
            .filter(|path| !seen.contains(path))
            .collect()
    }
}
