use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{Config, MetadataTags};
use crate::transport::{Progress, ProgressSink};

pub mod progress;

use progress::{is_progress_line, parse_time_field};

/// Encoder settings for the watermark pass
pub const VIDEO_CODEC: &str = "libx264";
pub const PRESET: &str = "fast";
pub const CRF: &str = "25";
const FONT_SIZE: u32 = 28;
/// Thumbnails are scaled to a square of this many pixels
pub const THUMBNAIL_SIZE: u32 = 320;

/// Diagnostic lines kept for error reports
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Failed to start transcoder: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Transcoder failed ({status}): {stderr}")]
    NonZeroExit { status: String, stderr: String },
    #[error("Transcoder produced no output at {0:?}")]
    EmptyOutput(PathBuf),
    #[error("Transcoder timed out after {0:?}")]
    TimedOut(Duration),
    #[error("Reading the duration failed: {0}")]
    Probe(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// How a transcoder run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformExit {
    pub success: bool,
    pub code: Option<i32>,
    /// Last diagnostic lines written by the process
    pub stderr: String,
}

impl TransformExit {
    fn from_status(status: ExitStatus, stderr: String) -> Self {
        Self {
            success: status.success(),
            code: status.code(),
            stderr,
        }
    }

    fn describe_status(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// The external media transformer
#[async_trait]
pub trait Transform: Send + Sync {
    /// Run with `args`, forwarding progress lines until the process exits
    async fn run(
        &self,
        args: &[String],
        progress_lines: mpsc::UnboundedSender<String>,
    ) -> Result<TransformExit, TranscodeError>;

    /// Media duration in seconds
    async fn probe_duration(&self, path: &Path) -> Result<f64, TranscodeError>;
}

/// [`Transform`] backed by the ffmpeg and ffprobe binaries
pub struct FfmpegTransform {
    ffmpeg_bin: String,
    ffprobe_bin: String,
    timeout: Option<Duration>,
}

impl FfmpegTransform {
    pub fn new(ffmpeg_bin: impl Into<String>, ffprobe_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.ffmpeg_bin, &config.ffprobe_bin).with_timeout(config.transcode_timeout)
    }
}

#[async_trait]
impl Transform for FfmpegTransform {
    async fn run(
        &self,
        args: &[String],
        progress_lines: mpsc::UnboundedSender<String>,
    ) -> Result<TransformExit, TranscodeError> {
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Executing transcoder: {} {}", self.ffmpeg_bin, args.join(" "));
        let mut child = cmd.spawn().map_err(TranscodeError::Spawn)?;

        let stderr = child.stderr.take().ok_or_else(|| {
            TranscodeError::Spawn(std::io::Error::other("stderr was not captured"))
        })?;

        // Progress and diagnostics share stderr; split them while the process runs
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            while let Ok(Some(line)) = lines.next_line().await {
                if is_progress_line(&line) {
                    let _ = progress_lines.send(line);
                } else if !line.trim().is_empty() {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            Vec::from(tail).join("\n")
        });

        let status = match self.timeout {
            Some(limit) => {
                let outcome = timeout(limit, child.wait()).await;
                match outcome {
                    Ok(status) => status.map_err(TranscodeError::Spawn)?,
                    Err(_) => {
                        if let Err(e) = child.kill().await {
                            error!("Failed to kill stuck transcoder: {}", e);
                        }
                        reader.abort();
                        return Err(TranscodeError::TimedOut(limit));
                    }
                }
            }
            None => child.wait().await.map_err(TranscodeError::Spawn)?,
        };

        let stderr = reader.await.unwrap_or_default();
        Ok(TransformExit::from_status(status, stderr))
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64, TranscodeError> {
        if !path.exists() {
            return Err(TranscodeError::Probe(format!("File does not exist: {path:?}")));
        }

        let output = Command::new(&self.ffprobe_bin)
            .args([
                "-v",
                "quiet",
                "-show_entries",
                "format=duration",
                "-of",
                "csv=p=0",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| TranscodeError::Probe(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscodeError::Probe(format!("ffprobe failed: {stderr}")));
        }

        let duration_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
        duration_str
            .parse::<f64>()
            .map_err(|e| TranscodeError::Probe(format!("Failed to parse duration '{duration_str}': {e}")))
    }
}

/// First candidate font that exists on disk
pub fn resolve_font(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|path| path.is_file()).cloned()
}

fn escape_chars(value: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Escape a drawtext option value.
///
/// Filter descriptions are unescaped twice: once by the filtergraph parser
/// and once when the filter splits its `key=value` options, so the value is
/// escaped for the option level first and for the graph level on top.
pub fn escape_drawtext(value: &str) -> String {
    let option_level = escape_chars(value, &['\\', '\'', ':']);
    escape_chars(&option_level, &['\\', '\'', '[', ']', ',', ';'])
}

/// Builds transcoder invocations for the watermark/metadata pass and runs them
pub struct TranscodeOrchestrator {
    transform: Arc<dyn Transform>,
    watermark_text: String,
    font: Option<PathBuf>,
    metadata: MetadataTags,
}

impl TranscodeOrchestrator {
    pub fn new(config: &Config, transform: Arc<dyn Transform>) -> Self {
        let font = resolve_font(&config.watermark_fonts);
        match &font {
            Some(font) => debug!("Using watermark font {:?}", font),
            None => warn!("⚠️ No watermark font found, videos will only get metadata"),
        }

        Self {
            transform,
            watermark_text: config.watermark_text.clone(),
            font,
            metadata: config.metadata.clone(),
        }
    }

    pub fn font(&self) -> Option<&Path> {
        self.font.as_deref()
    }

    fn drawtext_filter(&self, font: &Path) -> String {
        format!(
            "drawtext=fontfile={}:text={}:expansion=none:fontsize={}:fontcolor=white:x=20:y=20",
            escape_drawtext(&font.to_string_lossy()),
            escape_drawtext(&self.watermark_text),
            FONT_SIZE
        )
    }

    /// Full argument list for one run
    pub fn build_args(&self, input: &Path, output: &Path, is_video: bool) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-nostdin",
            "-y",
            "-loglevel",
            "error",
            "-progress",
            "pipe:2",
            "-nostats",
            "-i",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(input.to_string_lossy().into_owned());
        args.extend(["-map".to_string(), "0".to_string()]);

        match self.font.as_deref().filter(|_| is_video) {
            Some(font) => {
                args.push("-vf".to_string());
                args.push(self.drawtext_filter(font));
                args.extend(
                    [
                        "-c:v", VIDEO_CODEC, "-preset", PRESET, "-crf", CRF, "-c:a", "copy",
                        "-c:s", "copy",
                    ]
                    .iter()
                    .map(|s| s.to_string()),
                );
            }
            None => args.extend(["-c".to_string(), "copy".to_string()]),
        }

        let tags = &self.metadata;
        for (flag, value) in [
            ("-metadata", format!("title={}", tags.title)),
            ("-metadata", format!("artist={}", tags.artist)),
            ("-metadata", format!("author={}", tags.author)),
            ("-metadata:s:v", format!("title={}", tags.title)),
            ("-metadata:s:a", format!("title={}", tags.title)),
            ("-metadata:s:s", format!("title={}", tags.title)),
        ] {
            args.push(flag.to_string());
            args.push(value);
        }

        args.push(output.to_string_lossy().into_owned());
        args
    }

    async fn resolve_duration(&self, input: &Path, hint: Option<f64>) -> Option<f64> {
        if let Some(duration) = hint.filter(|d| d.is_finite() && *d > 0.0) {
            return Some(duration);
        }
        match self.transform.probe_duration(input).await {
            Ok(duration) if duration.is_finite() && duration > 0.0 => Some(duration),
            Ok(_) => None,
            Err(e) => {
                warn!("Progress will be shown without a percentage: {}", e);
                None
            }
        }
    }

    /// Run the watermark/metadata pass from `input` into `output`
    pub async fn process(
        &self,
        input: &Path,
        output: &Path,
        is_video: bool,
        duration_hint: Option<f64>,
        progress: &dyn ProgressSink,
    ) -> Result<PathBuf, TranscodeError> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let duration = self.resolve_duration(input, duration_hint).await;
        let args = self.build_args(input, output, is_video);

        info!("🚀 Starting transcode for: {:?}", input);

        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        let (exit, ()) = tokio::join!(
            self.transform.run(&args, lines_tx),
            forward_progress(lines_rx, duration, progress)
        );
        let exit = exit?;

        if !exit.success {
            return Err(TranscodeError::NonZeroExit {
                status: exit.describe_status(),
                stderr: exit.stderr,
            });
        }

        ensure_written(output).await?;
        info!("✅ Transcode successful: {:?} -> {:?}", input, output);
        Ok(output.to_path_buf())
    }

    /// Arguments for scaling a thumbnail to a single JPEG frame
    pub fn thumbnail_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-y", "-loglevel", "error", "-i"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(input.to_string_lossy().into_owned());
        args.extend([
            "-vf".to_string(),
            format!("scale={THUMBNAIL_SIZE}:{THUMBNAIL_SIZE}"),
            "-frames:v".to_string(),
            "1".to_string(),
        ]);
        args.push(output.to_string_lossy().into_owned());
        args
    }

    /// Scale `input` into a `THUMBNAIL_SIZE` square JPEG at `output`
    pub async fn resize_thumbnail(&self, input: &Path, output: &Path) -> Result<PathBuf, TranscodeError> {
        let args = self.thumbnail_args(input, output);
        let (lines_tx, _lines_rx) = mpsc::unbounded_channel();
        let exit = self.transform.run(&args, lines_tx).await?;
        if !exit.success {
            return Err(TranscodeError::NonZeroExit {
                status: exit.describe_status(),
                stderr: exit.stderr,
            });
        }

        ensure_written(output).await?;
        debug!("Resized thumbnail {:?} -> {:?}", input, output);
        Ok(output.to_path_buf())
    }
}

async fn ensure_written(output: &Path) -> Result<(), TranscodeError> {
    let written = tokio::fs::metadata(output)
        .await
        .map(|meta| meta.len())
        .unwrap_or(0);
    if written == 0 {
        return Err(TranscodeError::EmptyOutput(output.to_path_buf()));
    }
    Ok(())
}

async fn forward_progress(
    mut lines: mpsc::UnboundedReceiver<String>,
    duration: Option<f64>,
    progress: &dyn ProgressSink,
) {
    while let Some(line) = lines.recv().await {
        if let Some(elapsed) = parse_time_field(&line) {
            progress.report(Progress::Transcode { elapsed, duration }).await;
        }
    }
}
