use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::template::TokenSyntax;

/// Default font locations tried in order for the watermark overlay
const DEFAULT_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "C:/Windows/Fonts/arialbd.ttf",
];

/// Fixed container metadata written into every output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataTags {
    pub title: String,
    pub artist: String,
    pub author: String,
}

/// Configuration for the processing pipeline
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of jobs allowed inside the download/transcode/upload section at once
    pub pool_size: usize,
    /// Largest artifact that may be uploaded, in bytes
    pub max_file_size: u64,
    pub season_default: String,
    pub token_syntax: TokenSyntax,
    /// Upload the untouched download when transcoding fails
    pub fallback_to_original: bool,
    /// Upper bound for a single transcoder run; `None` disables it
    pub transcode_timeout: Option<Duration>,
    /// Minimum time between two status edits
    pub progress_interval: Duration,
    pub watermark_text: String,
    pub watermark_fonts: Vec<PathBuf>,
    pub metadata: MetadataTags,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    /// Scratch space for job artifacts
    pub scratch_dir: PathBuf,
    /// Seconds between inbox scans in watch mode
    pub sleep_interval: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let timeout_secs: u64 = env_or(
            "TRANSCODE_TIMEOUT",
            defaults.transcode_timeout.map_or(0, |t| t.as_secs()),
        );
        let watermark_fonts = env::var("WATERMARK_FONTS")
            .map(|fonts| {
                fonts
                    .split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or(defaults.watermark_fonts);

        Self {
            pool_size: env_or("POOL_SIZE", defaults.pool_size).max(1),
            max_file_size: env_or("MAX_FILE_SIZE", defaults.max_file_size),
            season_default: env_string("SEASON_DEFAULT", &defaults.season_default),
            token_syntax: env_or("TOKEN_SYNTAX", defaults.token_syntax),
            fallback_to_original: env_bool("FALLBACK_TO_ORIGINAL", defaults.fallback_to_original),
            transcode_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            progress_interval: Duration::from_secs(env_or(
                "PROGRESS_INTERVAL",
                defaults.progress_interval.as_secs(),
            )),
            watermark_text: env_string("WATERMARK_TEXT", &defaults.watermark_text),
            watermark_fonts,
            metadata: MetadataTags {
                title: env_string("METADATA_TITLE", &defaults.metadata.title),
                artist: env_string("METADATA_ARTIST", &defaults.metadata.artist),
                author: env_string("METADATA_AUTHOR", &defaults.metadata.author),
            },
            ffmpeg_bin: env_string("FFMPEG_BIN", &defaults.ffmpeg_bin),
            ffprobe_bin: env_string("FFPROBE_BIN", &defaults.ffprobe_bin),
            scratch_dir: env::var("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            sleep_interval: env_or("SLEEP_INTERVAL", defaults.sleep_interval),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 2,
            max_file_size: 4 * 1024 * 1024 * 1024,
            season_default: "01".to_string(),
            token_syntax: TokenSyntax::Brace,
            fallback_to_original: true,
            transcode_timeout: Some(Duration::from_secs(3 * 60 * 60)),
            progress_interval: Duration::from_secs(3),
            watermark_text: "AUTORENAME".to_string(),
            watermark_fonts: DEFAULT_FONTS.iter().map(PathBuf::from).collect(),
            metadata: MetadataTags {
                title: "Renamed with autorename".to_string(),
                artist: "autorename".to_string(),
                author: "autorename".to_string(),
            },
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            scratch_dir: PathBuf::from("downloads"),
            sleep_interval: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "POOL_SIZE",
        "MAX_FILE_SIZE",
        "SEASON_DEFAULT",
        "TOKEN_SYNTAX",
        "FALLBACK_TO_ORIGINAL",
        "TRANSCODE_TIMEOUT",
        "WATERMARK_FONTS",
    ];

    fn clear_env() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = Config::from_env();
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.max_file_size, 4 * 1024 * 1024 * 1024);
        assert_eq!(config.season_default, "01");
        assert_eq!(config.token_syntax, TokenSyntax::Brace);
        assert!(config.fallback_to_original);
        assert_eq!(config.transcode_timeout, Some(Duration::from_secs(10800)));
        assert_eq!(config.watermark_fonts.len(), DEFAULT_FONTS.len());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("POOL_SIZE", "3");
        env::set_var("MAX_FILE_SIZE", "2147483648");
        env::set_var("SEASON_DEFAULT", "1");
        env::set_var("TOKEN_SYNTAX", "bracket");
        env::set_var("FALLBACK_TO_ORIGINAL", "false");
        env::set_var("TRANSCODE_TIMEOUT", "0");
        env::set_var("WATERMARK_FONTS", "/a.ttf, /b.ttf");

        let config = Config::from_env();
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.max_file_size, 2 * 1024 * 1024 * 1024);
        assert_eq!(config.season_default, "1");
        assert_eq!(config.token_syntax, TokenSyntax::Bracket);
        assert!(!config.fallback_to_original);
        assert_eq!(config.transcode_timeout, None);
        assert_eq!(
            config.watermark_fonts,
            vec![PathBuf::from("/a.ttf"), PathBuf::from("/b.ttf")]
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back_to_defaults() {
        clear_env();
        env::set_var("POOL_SIZE", "zero");
        env::set_var("TOKEN_SYNTAX", "angle");
        let config = Config::from_env();
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.token_syntax, TokenSyntax::Brace);

        env::set_var("POOL_SIZE", "0");
        assert_eq!(Config::from_env().pool_size, 1);
        clear_env();
    }
}
