use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Chat user identifier
pub type UserId = i64;

/// Container extensions that are treated as video regardless of how the file was sent
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "flac", "ogg", "opus", "wav", "aac"];

/// How a file arrived from the chat transport
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Document,
    Video,
    Audio,
}

impl MediaKind {
    /// Whether the source carries its own playback duration
    pub fn has_duration(self) -> bool {
        matches!(self, MediaKind::Video | MediaKind::Audio)
    }

    /// Whether the watermark overlay applies to this kind
    pub fn is_watermarkable(self) -> bool {
        matches!(self, MediaKind::Video)
    }

    /// Extension appended to names that arrive without one
    pub fn default_extension(self) -> Option<&'static str> {
        match self {
            MediaKind::Video => Some("mp4"),
            MediaKind::Audio => Some("mp3"),
            MediaKind::Document => None,
        }
    }

    /// Infer a kind from a file extension
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
        {
            Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Video,
            Some(ext) if AUDIO_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Audio,
            _ => MediaKind::Document,
        }
    }
}

/// How the result is delivered back to the user
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Document,
    Video,
    Audio,
}

impl OutputKind {
    /// An explicit preference wins, otherwise mirror the media kind
    pub fn resolve(preference: Option<OutputKind>, media_kind: MediaKind) -> Self {
        preference.unwrap_or(match media_kind {
            MediaKind::Document => OutputKind::Document,
            MediaKind::Video => OutputKind::Video,
            MediaKind::Audio => OutputKind::Audio,
        })
    }
}

impl FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "document" => Ok(OutputKind::Document),
            "video" => Ok(OutputKind::Video),
            "audio" => Ok(OutputKind::Audio),
            other => Err(format!(
                "Invalid media type '{other}'. Valid types: video, document, audio"
            )),
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputKind::Document => "document",
            OutputKind::Video => "video",
            OutputKind::Audio => "audio",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a job inside the pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobState {
    Submitted,
    Admitted,
    Downloading,
    Processing,
    Uploading,
    Done,
    Failed,
}

impl JobState {
    /// Check a transition against the state graph
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Submitted, Admitted)
                | (Admitted, Downloading)
                | (Downloading, Processing)
                | (Processing, Uploading)
                | (Uploading, Done)
                | (Admitted | Downloading | Processing | Uploading, Failed)
        )
    }
}

/// One file submitted for rename, watermark and upload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Source-provided identifier, used for dedup
    pub file_id: String,
    pub user_id: UserId,
    pub file_name: String,
    /// Declared size in bytes
    pub file_size: u64,
    pub media_kind: MediaKind,
    /// Duration in seconds if the source reported one
    pub duration: Option<f64>,
    /// Transport reference to the media's own thumbnail
    pub thumbnail: Option<String>,
    /// Transport reference used to fetch the file contents
    pub source: String,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        file_id: impl Into<String>,
        user_id: UserId,
        file_name: impl Into<String>,
        file_size: u64,
        media_kind: MediaKind,
        source: impl Into<String>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            user_id,
            file_name: file_name.into(),
            file_size,
            media_kind,
            duration: None,
            thumbnail: None,
            source: source.into(),
            submitted_at: Utc::now(),
        }
    }

    pub fn with_duration(mut self, duration: Option<f64>) -> Self {
        self.duration = duration.filter(|d| d.is_finite() && *d > 0.0);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: Option<String>) -> Self {
        self.thumbnail = thumbnail;
        self
    }

    /// Create a job for a local file, using its canonical path as the file id
    pub fn from_local_file(path: &Path, user_id: UserId) -> std::io::Result<Self> {
        let canonical = path.canonicalize()?;
        let size = std::fs::metadata(&canonical)?.len();
        let file_name = canonical
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let source = canonical.to_string_lossy().into_owned();

        Ok(Self::new(
            source.clone(),
            user_id,
            file_name,
            size,
            MediaKind::from_path(&canonical),
            source,
        ))
    }

    /// File name with a default extension added for video/audio sent without one
    pub fn effective_file_name(&self) -> String {
        let has_extension = Path::new(&self.file_name).extension().is_some();
        match self.media_kind.default_extension() {
            Some(ext) if !has_extension => format!("{}.{}", self.file_name, ext),
            _ => self.file_name.clone(),
        }
    }

    /// Whether the watermarking re-encode applies
    pub fn is_video(&self, output_kind: OutputKind) -> bool {
        output_kind == OutputKind::Video
            || self.media_kind.is_watermarkable()
            || Path::new(&self.effective_file_name())
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
    }

    /// Filesystem-safe form of the file id for artifact names
    pub fn safe_id(&self) -> String {
        let safe: String = self
            .file_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let start = safe.len().saturating_sub(32);
        safe[start..].to_string()
    }

    /// Path of the local source when the job references a file on disk
    pub fn source_path(&self) -> PathBuf {
        PathBuf::from(&self.source)
    }
}
