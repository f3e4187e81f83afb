//! Job lifecycle: everything that happens to a job between admission and delivery.
//!
//! A job holds its [`ProcessingSlot`] and an [`Artifacts`] guard for its whole
//! run. Whatever step fails, the guard removes every scratch file it handed
//! out and the slot returns the permit and dedup entry when the job ends.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs as async_fs;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::extract::MetadataExtractor;
use crate::ffmpeg::{TranscodeError, TranscodeOrchestrator, Transform};
use crate::format::{
    format_duration, human_size, transcode_status, transfer_status, truncate_message,
    MAX_USER_MESSAGE,
};
use crate::job::{Job, JobState, OutputKind};
use crate::prefs::PreferenceStore;
use crate::queue::{JobHandler, ProcessingSlot};
use crate::template::{self, CaptionContext};
use crate::transport::{ChatTransport, Progress, ProgressSink, UploadRequest};

pub const MISSING_TEMPLATE_MESSAGE: &str =
    "Please Set An Auto Rename Format First Using /autorename";

fn size_text(bytes: &u64) -> String {
    human_size(*bytes)
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{}", MISSING_TEMPLATE_MESSAGE)]
    MissingTemplate,
    #[error("Download failed: {0}")]
    DownloadFailed(String),
    #[error("Processing failed: {0}")]
    Transcode(#[from] TranscodeError),
    #[error("File too large ({}). Limit is {}", size_text(.size), size_text(.limit))]
    SizeLimit { size: u64, limit: u64 },
    #[error("Upload failed: {0}")]
    Upload(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Scratch files owned by one job, removed when the guard is dropped
pub struct Artifacts {
    dir: PathBuf,
    prefix: String,
    paths: Vec<PathBuf>,
}

impl Artifacts {
    pub fn new(dir: &Path, job: &Job) -> Self {
        let prefix = format!(
            "{}-{}-{}",
            Utc::now().format("%Y%m%d%H%M%S"),
            Uuid::new_v4().simple(),
            job.safe_id()
        );
        Self {
            dir: dir.to_path_buf(),
            prefix,
            paths: Vec::new(),
        }
    }

    /// Hand out a new path in the scratch directory
    pub fn allocate(&mut self, role: &str, extension: Option<&str>) -> PathBuf {
        let name = match extension.filter(|ext| !ext.is_empty()) {
            Some(ext) => format!("{}.{}.{}", self.prefix, role, ext),
            None => format!("{}.{}", self.prefix, role),
        };
        let path = self.dir.join(name);
        self.paths.push(path.clone());
        path
    }

    /// Take ownership of a path created elsewhere, e.g. by the transport
    pub fn track(&mut self, path: &Path) {
        if !self.paths.iter().any(|p| p == path) {
            self.paths.push(path.to_path_buf());
        }
    }
}

impl Drop for Artifacts {
    fn drop(&mut self) {
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("Removed artifact {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove artifact {:?}: {}", path, e),
            }
        }
    }
}

/// Whether a scratch file name was produced by [`Artifacts::allocate`]
pub fn is_artifact_name(name: &str) -> bool {
    let mut parts = name.splitn(3, '-');
    let (Some(timestamp), Some(id), Some(_)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    timestamp.len() == 14
        && timestamp.bytes().all(|b| b.is_ascii_digit())
        && id.len() == 32
        && id.bytes().all(|b| b.is_ascii_hexdigit())
}

fn extension_of(name: &str) -> Option<&str> {
    Path::new(name).extension().and_then(|ext| ext.to_str())
}

/// Turns progress into status message edits, at most one per interval
pub struct StatusReporter<'a> {
    transport: &'a dyn ChatTransport,
    job: &'a Job,
    interval: Duration,
    started: Instant,
    last_edit: Mutex<Option<Instant>>,
}

impl<'a> StatusReporter<'a> {
    pub fn new(transport: &'a dyn ChatTransport, job: &'a Job, interval: Duration) -> Self {
        Self {
            transport,
            job,
            interval,
            started: Instant::now(),
            last_edit: Mutex::new(None),
        }
    }

    fn should_edit(&self, finished: bool) -> bool {
        let mut last = self
            .last_edit
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let due = last.map_or(true, |at| now.duration_since(at) >= self.interval);
        if due || finished {
            *last = Some(now);
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl ProgressSink for StatusReporter<'_> {
    async fn report(&self, progress: Progress) {
        let text = match progress {
            Progress::Transfer {
                label,
                current,
                total,
            } => {
                if !self.should_edit(total > 0 && current >= total) {
                    return;
                }
                transfer_status(label, current, total, self.started.elapsed())
            }
            Progress::Transcode { elapsed, duration } => {
                if !self.should_edit(false) {
                    return;
                }
                transcode_status("Processing", elapsed, duration)
            }
        };

        if let Err(e) = self.transport.edit_status(self.job, &text).await {
            debug!("Status update failed for {}: {}", self.job.file_id, e);
        }
    }
}

/// Runs admitted jobs through download, rename, transcode and upload
pub struct JobWorker {
    config: Config,
    extractor: MetadataExtractor,
    transport: Arc<dyn ChatTransport>,
    prefs: Arc<dyn PreferenceStore>,
    orchestrator: TranscodeOrchestrator,
}

impl JobWorker {
    pub fn new(
        config: Config,
        transport: Arc<dyn ChatTransport>,
        prefs: Arc<dyn PreferenceStore>,
        transform: Arc<dyn Transform>,
    ) -> anyhow::Result<Self> {
        let extractor = MetadataExtractor::new(config.season_default.clone())?;
        let orchestrator = TranscodeOrchestrator::new(&config, transform);
        Ok(Self {
            config,
            extractor,
            transport,
            prefs,
            orchestrator,
        })
    }

    fn reporter<'a>(&'a self, job: &'a Job) -> StatusReporter<'a> {
        StatusReporter::new(self.transport.as_ref(), job, self.config.progress_interval)
    }

    async fn notify(&self, job: &Job, text: &str) {
        if let Err(e) = self.transport.edit_status(job, text).await {
            debug!("Status update failed for {}: {}", job.file_id, e);
        }
    }

    /// Fetch and scale the thumbnail; any failure only costs the thumbnail
    async fn prepare_thumbnail(
        &self,
        job: &Job,
        file_ref: &str,
        artifacts: &mut Artifacts,
    ) -> Option<PathBuf> {
        let dest = artifacts.allocate("thumb", Some("jpg"));
        let fetched = match self.transport.download_thumbnail(job, file_ref, &dest).await {
            Ok(path) => {
                artifacts.track(&path);
                path
            }
            Err(e) => {
                warn!("Continuing without thumbnail for {}: {}", job.file_name, e);
                return None;
            }
        };

        let resized = artifacts.allocate("thumb-scaled", Some("jpg"));
        match self.orchestrator.resize_thumbnail(&fetched, &resized).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Continuing without thumbnail for {}: {}", job.file_name, e);
                None
            }
        }
    }

    async fn run(
        &self,
        job: &Job,
        slot: &ProcessingSlot,
        artifacts: &mut Artifacts,
    ) -> Result<(), JobError> {
        let prefs = self
            .prefs
            .get(job.user_id)
            .await
            .context("Failed to load user preferences")?;
        let template = prefs
            .format_template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(JobError::MissingTemplate)?;
        let output_kind = OutputKind::resolve(prefs.media_preference, job.media_kind);
        let original_name = job.effective_file_name();

        async_fs::create_dir_all(&self.config.scratch_dir)
            .await
            .with_context(|| format!("Failed to create scratch dir {:?}", self.config.scratch_dir))?;

        // Download
        slot.mark(JobState::Downloading);
        self.notify(job, "📥 Trying to download...").await;
        let download_path = artifacts.allocate("download", extension_of(&original_name));
        let downloaded = self
            .transport
            .download(job, &download_path, &self.reporter(job))
            .await;
        // The transport may have written a partial file before failing
        let downloaded = downloaded.map_err(|e| JobError::DownloadFailed(e.to_string()))?;
        artifacts.track(&downloaded);

        let downloaded_size = async_fs::metadata(&downloaded)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        if downloaded_size == 0 {
            return Err(JobError::DownloadFailed(
                "the downloaded file is missing or empty".to_string(),
            ));
        }
        debug!("Downloaded {} ({})", original_name, human_size(downloaded_size));

        // Rename
        let metadata = self.extractor.extract(&original_name);
        let rendered = template::render(template, self.config.token_syntax, &metadata);
        let final_name = template::target_file_name(&rendered, &original_name);
        info!("✏️ Renaming {} -> {}", original_name, final_name);

        // Transcode
        slot.mark(JobState::Processing);
        self.notify(job, "⚙️ Processing file...").await;
        let output_path = artifacts.allocate("output", extension_of(&final_name));
        let is_video = job.is_video(output_kind);
        let transcoded = self
            .orchestrator
            .process(&downloaded, &output_path, is_video, job.duration, &self.reporter(job))
            .await;
        let artifact = match transcoded {
            Ok(path) => path,
            Err(e) if self.config.fallback_to_original => {
                warn!(
                    "⚠️ Transcode failed for {}, delivering the original: {}",
                    original_name, e
                );
                downloaded.clone()
            }
            Err(e) => return Err(e.into()),
        };

        let size = async_fs::metadata(&artifact)
            .await
            .with_context(|| format!("Failed to stat {artifact:?}"))?
            .len();
        if size > self.config.max_file_size {
            return Err(JobError::SizeLimit {
                size,
                limit: self.config.max_file_size,
            });
        }

        let caption = match prefs.caption.as_deref() {
            Some(caption) => template::render_caption(
                caption,
                self.config.token_syntax,
                &CaptionContext {
                    filename: final_name.clone(),
                    filesize: human_size(size),
                    duration: format_duration(job.duration.unwrap_or(0.0)),
                },
            ),
            None => template::default_caption(&final_name),
        };

        // A user thumbnail wins over the media's own
        let thumbnail_ref = prefs.thumbnail.clone().or_else(|| job.thumbnail.clone());
        let thumbnail = match thumbnail_ref {
            Some(file_ref) => self.prepare_thumbnail(job, &file_ref, artifacts).await,
            None => None,
        };

        // Upload
        slot.mark(JobState::Uploading);
        self.notify(job, "📤 Trying to upload...").await;
        let request = UploadRequest {
            path: &artifact,
            file_name: &final_name,
            caption: &caption,
            thumbnail: thumbnail.as_deref(),
            kind: output_kind,
            duration: job.duration,
        };
        self.transport
            .upload(job, request, &self.reporter(job))
            .await
            .map_err(|e| JobError::Upload(e.to_string()))?;

        if let Err(e) = self.transport.delete_status(job).await {
            debug!("Could not delete status for {}: {}", job.file_id, e);
        }
        slot.mark(JobState::Done);
        info!("✅ Delivered {} as {}", final_name, output_kind);
        Ok(())
    }
}

#[async_trait]
impl JobHandler for JobWorker {
    async fn handle(&self, job: Job, slot: ProcessingSlot) {
        let mut artifacts = Artifacts::new(&self.config.scratch_dir, &job);
        let result = self.run(&job, &slot, &mut artifacts).await;

        if let Err(e) = result {
            error!("❌ Job {} ({}) failed: {}", job.file_id, job.file_name, e);
            slot.mark(JobState::Failed);
            let message = truncate_message(&format!("❌ {e}"), MAX_USER_MESSAGE);
            if let Err(e) = self.transport.finish_status(&job, &message).await {
                debug!("Could not show failure for {}: {}", job.file_id, e);
            }
        }

        // Scratch files go before the slot is handed to the next job
        drop(artifacts);
        drop(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::MediaKind;
    use crate::transport::LocalTransport;
    use tempfile::TempDir;

    fn job() -> Job {
        Job::new("AgADBQAD/42", 9, "Show.S01E02.mkv", 10, MediaKind::Video, "src")
    }

    #[test]
    fn test_artifacts_are_unique_and_removed_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let job = job();

        let (first, second) = {
            let mut a = Artifacts::new(temp_dir.path(), &job);
            let mut b = Artifacts::new(temp_dir.path(), &job);
            let first = a.allocate("download", Some("mkv"));
            let second = b.allocate("download", Some("mkv"));
            std::fs::write(&first, b"a").unwrap();
            std::fs::write(&second, b"b").unwrap();
            assert_ne!(first, second);
            assert!(first.to_string_lossy().ends_with("AgADBQAD42.download.mkv"));
            (first, second)
        };

        assert!(!first.exists());
        assert!(!second.exists());
    }

    #[test]
    fn test_is_artifact_name() {
        let temp_dir = TempDir::new().unwrap();
        let mut artifacts = Artifacts::new(temp_dir.path(), &job());
        let path = artifacts.allocate("output", Some("mp4"));
        let name = path.file_name().unwrap().to_string_lossy();
        assert!(is_artifact_name(&name));

        assert!(!is_artifact_name("Show.S01E02.mkv"));
        assert!(!is_artifact_name("2024-01-01-notes.txt"));
        assert!(!is_artifact_name("20240101120000-nothex-file"));
    }

    #[test]
    fn test_artifacts_ignore_paths_never_written() {
        let temp_dir = TempDir::new().unwrap();
        let mut artifacts = Artifacts::new(temp_dir.path(), &job());
        let unused = artifacts.allocate("thumb", Some("jpg"));
        artifacts.track(&unused);
        let written = artifacts.allocate("output", Some("mp4"));
        std::fs::write(&written, b"out").unwrap();
        drop(artifacts);
        assert!(!unused.exists());
        assert!(!written.exists());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_status_reporter_throttles_edits() {
        let temp_dir = TempDir::new().unwrap();
        let transport = LocalTransport::hidden(temp_dir.path().to_path_buf());
        let job = job();
        let reporter = StatusReporter::new(&transport, &job, Duration::from_secs(3600));

        let transfer = |current| Progress::Transfer {
            label: "Downloading",
            current,
            total: 100,
        };
        reporter.report(transfer(10)).await;
        let first = transport.status_of(&job).unwrap();
        assert!(first.contains("10.0%"));

        // Inside the interval intermediate updates are dropped
        reporter.report(transfer(50)).await;
        assert_eq!(transport.status_of(&job).unwrap(), first);

        // Completion always goes through
        reporter.report(transfer(100)).await;
        assert!(transport.status_of(&job).unwrap().contains("100.0%"));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(JobError::MissingTemplate.to_string(), MISSING_TEMPLATE_MESSAGE);
        let err = JobError::SizeLimit {
            size: 5 * 1024 * 1024 * 1024,
            limit: 4 * 1024 * 1024 * 1024,
        };
        assert!(err.to_string().starts_with("File too large (5"));
        assert!(err.to_string().contains("Limit is 4"));
    }
}
