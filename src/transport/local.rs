use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::fs as async_fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use super::{ChatTransport, Progress, ProgressSink, UploadRequest};
use crate::job::Job;

const CHUNK_SIZE: usize = 1024 * 1024;

/// Filesystem stand-in for a chat transport.
///
/// Jobs reference local files through [`Job::source`]; uploads land in the
/// outbox directory next to a `.caption.txt` sidecar, and status messages are
/// drawn as terminal spinners.
pub struct LocalTransport {
    outbox: PathBuf,
    bars: MultiProgress,
    status: Mutex<HashMap<String, ProgressBar>>,
}

impl LocalTransport {
    pub fn new(outbox: PathBuf) -> Self {
        Self {
            outbox,
            bars: MultiProgress::new(),
            status: Mutex::new(HashMap::new()),
        }
    }

    /// Create a transport whose status spinners are never drawn
    pub fn hidden(outbox: PathBuf) -> Self {
        Self {
            outbox,
            bars: MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()),
            status: Mutex::new(HashMap::new()),
        }
    }

    pub fn outbox(&self) -> &Path {
        &self.outbox
    }

    /// Last status text shown for a job, if it still has a status message
    pub fn status_of(&self, job: &Job) -> Option<String> {
        self.status
            .lock()
            .ok()?
            .get(&job.file_id)
            .map(|bar| bar.message())
    }

    fn bar_for(&self, job: &Job) -> Result<ProgressBar> {
        let mut status = self
            .status
            .lock()
            .map_err(|_| anyhow!("status registry poisoned"))?;
        let bar = status.entry(job.file_id.clone()).or_insert_with(|| {
            let bar = self.bars.add(ProgressBar::new_spinner());
            bar.set_style(
                ProgressStyle::with_template("{spinner} {prefix}: {wide_msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.set_prefix(job.file_name.clone());
            bar.enable_steady_tick(Duration::from_millis(200));
            bar
        });
        Ok(bar.clone())
    }

    /// Stop and drop the job's spinner, if it has one
    fn remove_bar(&self, job: &Job) -> Result<()> {
        let bar = self
            .status
            .lock()
            .map_err(|_| anyhow!("status registry poisoned"))?
            .remove(&job.file_id);
        if let Some(bar) = bar {
            bar.finish_and_clear();
            self.bars.remove(&bar);
        }
        Ok(())
    }
}

/// Status text on one line, as spinner messages cannot span several
fn compact(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Copy `src` to `dest` in chunks, reporting transfer progress after each one
async fn copy_with_progress(
    src: &Path,
    dest: &Path,
    label: &'static str,
    progress: &dyn ProgressSink,
) -> Result<u64> {
    let mut reader = async_fs::File::open(src)
        .await
        .with_context(|| format!("Failed to open {src:?}"))?;
    let total = reader.metadata().await?.len();
    let mut writer = async_fs::File::create(dest)
        .await
        .with_context(|| format!("Failed to create {dest:?}"))?;

    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        writer.write_all(&buffer[..read]).await?;
        copied += read as u64;
        progress
            .report(Progress::Transfer {
                label,
                current: copied,
                total,
            })
            .await;
    }
    writer.flush().await?;
    Ok(copied)
}

#[async_trait]
impl ChatTransport for LocalTransport {
    async fn download(
        &self,
        job: &Job,
        dest: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<PathBuf> {
        let source = job.source_path();
        let copied = copy_with_progress(&source, dest, "Downloading", progress).await?;
        debug!("Copied {} bytes from {:?} to {:?}", copied, source, dest);
        Ok(dest.to_path_buf())
    }

    async fn download_thumbnail(&self, _job: &Job, file_ref: &str, dest: &Path) -> Result<PathBuf> {
        async_fs::copy(file_ref, dest)
            .await
            .with_context(|| format!("Failed to fetch thumbnail {file_ref}"))?;
        Ok(dest.to_path_buf())
    }

    async fn upload(
        &self,
        _job: &Job,
        request: UploadRequest<'_>,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        async_fs::create_dir_all(&self.outbox).await?;
        let target = self.outbox.join(request.file_name);
        copy_with_progress(request.path, &target, "Uploading", progress).await?;

        let caption_path = self
            .outbox
            .join(format!("{}.caption.txt", request.file_name));
        async_fs::write(&caption_path, request.caption).await?;

        if let Some(thumbnail) = request.thumbnail {
            let thumb_target = self.outbox.join(format!("{}.thumb.jpg", request.file_name));
            async_fs::copy(thumbnail, &thumb_target).await?;
        }

        info!("📤 Delivered {:?} as {}", target, request.kind);
        Ok(())
    }

    async fn edit_status(&self, job: &Job, text: &str) -> Result<()> {
        self.bar_for(job)?.set_message(compact(text));
        Ok(())
    }

    async fn delete_status(&self, job: &Job) -> Result<()> {
        self.remove_bar(job)?;
        Ok(())
    }

    async fn finish_status(&self, job: &Job, text: &str) -> Result<()> {
        self.remove_bar(job)?;
        self.bars
            .println(format!("{}: {}", job.file_name, compact(text)))
            .context("Failed to print final status")?;
        Ok(())
    }
}
