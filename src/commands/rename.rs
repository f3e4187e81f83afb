use anyhow::{anyhow, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::Config;
use crate::extract::MetadataExtractor;
use crate::template::{self, TokenSyntax, EPISODE_SENTINEL};

/// Name a file would be delivered under
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenamePreview {
    pub original: String,
    pub renamed: String,
    pub episode: Option<String>,
    pub season: String,
    pub quality: String,
}

/// Preview of a whole directory
#[derive(Debug, Clone, Serialize)]
pub struct RenameReport {
    pub scan_path: PathBuf,
    pub template: String,
    pub previews: Vec<RenamePreview>,
    pub preview_time: Duration,
}

impl RenameReport {
    /// Files where no episode number could be found
    pub fn missing_episode(&self) -> usize {
        self.previews.iter().filter(|p| p.episode.is_none()).count()
    }
}

/// Command to preview how files would be renamed, without touching them
pub struct RenameCommand {
    path: PathBuf,
    template: String,
    recursive: bool,
    syntax: TokenSyntax,
    extractor: MetadataExtractor,
}

impl RenameCommand {
    pub fn new(path: PathBuf, template: String, recursive: bool) -> Result<Self> {
        let config = Config::from_env();
        Self::with_config(path, template, recursive, &config)
    }

    pub fn with_config(
        path: PathBuf,
        template: String,
        recursive: bool,
        config: &Config,
    ) -> Result<Self> {
        if template.trim().is_empty() {
            return Err(anyhow!("Format cannot be empty"));
        }
        Ok(Self {
            path,
            template,
            recursive,
            syntax: config.token_syntax,
            extractor: MetadataExtractor::new(config.season_default.clone())?,
        })
    }

    /// Build the preview for a single file name
    pub fn preview(&self, original: &str) -> RenamePreview {
        let metadata = self.extractor.extract(original);
        let rendered = template::render(&self.template, self.syntax, &metadata);
        RenamePreview {
            original: original.to_string(),
            renamed: template::target_file_name(&rendered, original),
            episode: metadata.episode,
            season: metadata.season,
            quality: metadata.quality,
        }
    }

    pub async fn execute(&self) -> Result<RenameReport> {
        if !self.path.exists() {
            return Err(anyhow!("Path does not exist: {:?}", self.path));
        }

        let start = Instant::now();
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let names: Vec<String> = WalkDir::new(&self.path)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect();

        info!("🔍 Previewing {} files in {:?}", names.len(), self.path);

        let previews: Vec<RenamePreview> = names.par_iter().map(|name| self.preview(name)).collect();
        debug!("Preview built in {:?}", start.elapsed());

        Ok(RenameReport {
            scan_path: self.path.clone(),
            template: self.template.clone(),
            previews,
            preview_time: start.elapsed(),
        })
    }

    pub fn print_report(&self, report: &RenameReport) {
        println!("\n📝 Rename Preview");
        println!("════════════════");
        println!("📂 Path: {}", report.scan_path.display());
        println!("🔤 Format: {}", report.template);
        println!("📁 Files: {}", report.previews.len());
        println!(
            "⏱️  Preview time: {:.2}s",
            report.preview_time.as_secs_f64()
        );

        if report.previews.is_empty() {
            println!("\nNo files found.");
            return;
        }

        println!();
        for preview in &report.previews {
            println!("{}", preview.original);
            println!("   → {}", preview.renamed);
        }

        let missing = report.missing_episode();
        if missing > 0 {
            println!(
                "\n⚠️  {} file(s) have no episode number and will use '{}'",
                missing, EPISODE_SENTINEL
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn command(path: PathBuf, template: &str, recursive: bool) -> RenameCommand {
        RenameCommand::with_config(path, template.to_string(), recursive, &Config::default())
            .unwrap()
    }

    #[test]
    fn test_preview_single_name() {
        let cmd = command(PathBuf::from("."), "{season}x{episode} - [{quality}]", false);
        let preview = cmd.preview("Show.S02E07.1080p.mkv");
        assert_eq!(preview.renamed, "02x07 - [1080p].mkv");
        assert_eq!(preview.episode.as_deref(), Some("07"));

        let preview = cmd.preview("randomfile.mkv");
        assert_eq!(preview.renamed, "01xXX - [Unknown].mkv");
        assert_eq!(preview.episode, None);
    }

    #[test]
    fn test_empty_template_rejected() {
        let result =
            RenameCommand::with_config(PathBuf::from("."), "  ".to_string(), false, &Config::default());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_execute_directory() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("Show.S01E03.720p.mkv"), b"x").unwrap();
        fs::write(temp_dir.path().join("Show - 04 [480p].mp4"), b"x").unwrap();
        fs::create_dir(temp_dir.path().join("sub")).unwrap();
        fs::write(temp_dir.path().join("sub").join("Show.S01E05.mkv"), b"x").unwrap();

        let flat = command(temp_dir.path().to_path_buf(), "E{episode} {quality}", false);
        let report = flat.execute().await.unwrap();
        let renamed: Vec<_> = report.previews.iter().map(|p| p.renamed.as_str()).collect();
        assert_eq!(renamed, vec!["E04 480p.mp4", "E03 720p.mkv"]);
        assert_eq!(report.missing_episode(), 0);

        let recursive = command(temp_dir.path().to_path_buf(), "E{episode} {quality}", true);
        let report = recursive.execute().await.unwrap();
        assert_eq!(report.previews.len(), 3);
    }

    #[tokio::test]
    async fn test_execute_nonexistent_path() {
        let cmd = command(PathBuf::from("/nonexistent/path"), "{episode}", false);
        assert!(cmd.execute().await.is_err());
    }
}
