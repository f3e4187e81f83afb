use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::ffmpeg::{FfmpegTransform, Transform};
use crate::job::{Job, UserId};
use crate::prefs::PreferenceStore;
use crate::queue::{Admission, JobQueue, PipelineState};
use crate::transport::{ChatTransport, LocalTransport};
use crate::worker::JobWorker;

/// The full pipeline wired to the local filesystem transport, shared by the
/// `process` and `watch` commands
pub struct LocalPipeline {
    queue: JobQueue,
    transport: Arc<LocalTransport>,
}

impl LocalPipeline {
    /// Start a pipeline that delivers into `outbox` using the ffmpeg binaries from `config`
    pub fn start(config: &Config, outbox: PathBuf, prefs: Arc<dyn PreferenceStore>) -> Result<Self> {
        let transform = Arc::new(FfmpegTransform::from_config(config));
        Self::with_transform(config, Arc::new(LocalTransport::new(outbox)), prefs, transform)
    }

    pub fn with_transform(
        config: &Config,
        transport: Arc<LocalTransport>,
        prefs: Arc<dyn PreferenceStore>,
        transform: Arc<dyn Transform>,
    ) -> Result<Self> {
        let worker = JobWorker::new(config.clone(), transport.clone(), prefs, transform)?;
        let state = PipelineState::new(config.pool_size);
        info!(
            "✅ Pipeline ready with {} slots, delivering to {:?}",
            state.pool_size(),
            transport.outbox()
        );

        Ok(Self {
            queue: JobQueue::start(state, Arc::new(worker)),
            transport,
        })
    }

    pub fn state(&self) -> &Arc<PipelineState> {
        self.queue.state()
    }

    /// Submit a local file on behalf of `user_id`
    pub async fn submit_file(&self, path: &Path, user_id: UserId) -> Result<Admission> {
        if !path.is_file() {
            return Err(anyhow!("Not a file: {path:?}"));
        }
        let job = Job::from_local_file(path, user_id)
            .with_context(|| format!("Failed to read {path:?}"))?;
        let status_job = job.clone();

        let admission = self.queue.submit(job)?;
        match admission {
            Admission::Immediate => debug!("Started {:?} right away", path),
            Admission::Queued { position } => {
                let notice = format!("⏳ Added to queue. Position: {position}");
                if let Err(e) = self.transport.edit_status(&status_job, &notice).await {
                    debug!("Could not show queue position for {:?}: {}", path, e);
                }
            }
            Admission::Duplicate => warn!("⚠️ SKIPPING: {:?} is already being processed", path),
        }
        Ok(admission)
    }

    /// Stop accepting files; jobs still waiting for a slot are never started
    pub fn cancel_pending(&self) {
        self.queue.cancel_pending();
    }

    /// Cancel pending jobs and abort the ones already running
    pub async fn abort(&self) {
        self.queue.abort_running().await;
    }

    /// Stop accepting files and wait for every submitted job to finish
    pub async fn shutdown(self) {
        self.queue.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::JsonPreferenceStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_submit_rejects_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            scratch_dir: temp_dir.path().join("scratch"),
            ..Config::default()
        };
        let transport = Arc::new(LocalTransport::hidden(temp_dir.path().join("out")));
        let pipeline = LocalPipeline::with_transform(
            &config,
            transport,
            Arc::new(JsonPreferenceStore::in_memory()),
            Arc::new(FfmpegTransform::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe")),
        )
        .unwrap();

        let result = pipeline
            .submit_file(&temp_dir.path().join("missing.mkv"), 1)
            .await;
        assert!(result.is_err());
        assert_eq!(pipeline.state().active_count(), 0);
        pipeline.shutdown().await;
    }
}
