//! Boundary to the chat transport that delivers files and shows status messages.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::job::{Job, OutputKind};

pub mod local;

pub use local::LocalTransport;

/// A progress observation from any stage of a job
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// Bytes moved during a download or upload
    Transfer {
        label: &'static str,
        current: u64,
        total: u64,
    },
    /// Media position reached by the transcoder, in seconds
    Transcode { elapsed: f64, duration: Option<f64> },
}

/// Receives progress updates; implementations decide how often to surface them
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: Progress);
}

/// Sink that drops every update
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _progress: Progress) {}
}

/// Everything the transport needs to deliver a finished file
#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    pub path: &'a Path,
    pub file_name: &'a str,
    pub caption: &'a str,
    pub thumbnail: Option<&'a Path>,
    pub kind: OutputKind,
    pub duration: Option<f64>,
}

/// Operations the pipeline consumes from the chat transport
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Fetch the job's file into `dest`, returning the path actually written
    async fn download(&self, job: &Job, dest: &Path, progress: &dyn ProgressSink)
        -> Result<PathBuf>;

    /// Fetch a thumbnail by transport reference into `dest`
    async fn download_thumbnail(&self, job: &Job, file_ref: &str, dest: &Path) -> Result<PathBuf>;

    async fn upload(
        &self,
        job: &Job,
        request: UploadRequest<'_>,
        progress: &dyn ProgressSink,
    ) -> Result<()>;

    /// Replace the job's status message text
    async fn edit_status(&self, job: &Job, text: &str) -> Result<()>;

    /// Remove the job's status message once the result has been delivered
    async fn delete_status(&self, job: &Job) -> Result<()>;

    /// Leave `text` as the job's last status; no further edits follow
    async fn finish_status(&self, job: &Job, text: &str) -> Result<()>;
}
