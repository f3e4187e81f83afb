//! # autorename - rename, watermark and deliver media files
//!
//! Renames media files from a per-user format template, using episode, season
//! and quality tokens pulled out of the original file name, stamps videos with
//! a text watermark and fixed container metadata, and delivers the result.
//!
//! ## Features
//!
//! - **Bounded Concurrency**: A fixed pool of processing slots with FIFO admission
//! - **Duplicate Protection**: A file already in flight is never processed twice at once
//! - **Template Renaming**: `{episode}`, `{season}` and `{quality}` placeholders
//! - **Watermarking**: Burned-in text overlay through ffmpeg, with progress reporting
//! - **Guaranteed Cleanup**: Scratch files are removed whichever step fails
//! - **Signal Handling**: Graceful shutdown on Ctrl-C in watch mode
//!
//! ## Usage
//!
//! ```bash
//! # Set the rename format for a user
//! autorename prefs 1 template "S{season}E{episode} - [{quality}]"
//!
//! # Process files and wait for the results
//! autorename process --user 1 --out outbox Show.S01E02.1080p.mkv
//!
//! # Watch a directory for new files
//! autorename watch --user 1 --out outbox inbox
//!
//! # Preview names without touching anything
//! autorename rename --template "S{season}E{episode}" /path/to/media
//!
//! # Remove leftovers from an interrupted run
//! autorename clean
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autorename::commands::{
    clean::CleanCommand,
    prefs::{PrefsAction, PrefsCommand},
    process::ProcessCommand,
    rename::RenameCommand,
    watch::WatchCommand,
};
use autorename::config::Config;
use autorename::job::UserId;

/// autorename - rename, watermark and deliver media files
#[derive(Parser)]
#[command(
    name = "autorename",
    about = "Rename, watermark and deliver media files",
    long_about = "Renames media files from a format template using episode, season and quality found in the file name, stamps videos with a watermark and delivers the result.",
    version
)]
struct Cli {
    /// Path to the preferences file
    #[arg(long, global = true, env = "AUTORENAME_PREFS", default_value = "autorename-prefs.json")]
    prefs: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Process files through the full pipeline and wait for the results
    Process {
        /// Files to process
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// User whose preferences apply
        #[arg(long, short = 'u', env = "AUTORENAME_USER", default_value_t = 0)]
        user: UserId,
        /// Directory that receives the delivered files
        #[arg(long, short = 'o', default_value = "outbox")]
        out: PathBuf,
    },
    /// Watch a directory and process every new file
    Watch {
        /// Directory to watch
        inbox: PathBuf,
        /// Only files whose name matches this glob pattern
        #[arg(long, short = 'p', default_value = "*")]
        pattern: String,
        /// User whose preferences apply
        #[arg(long, short = 'u', env = "AUTORENAME_USER", default_value_t = 0)]
        user: UserId,
        /// Directory that receives the delivered files
        #[arg(long, short = 'o', default_value = "outbox")]
        out: PathBuf,
    },
    /// Preview the names files would get, without changing anything
    Rename {
        /// File or directory to preview
        path: PathBuf,
        /// Format template
        #[arg(long, short = 't')]
        template: String,
        /// Descend into subdirectories
        #[arg(long, short = 'r')]
        recursive: bool,
    },
    /// Show or change a user's preferences
    Prefs {
        /// User id
        user: UserId,
        #[command(subcommand)]
        action: PrefsAction,
    },
    /// Remove scratch files left behind by an interrupted run
    Clean {
        /// Scratch directory (defaults to SCRATCH_DIR)
        #[arg(long, short = 'd')]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "autorename=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let prefs = cli.prefs;

    let result = match cli.command {
        Commands::Process { files, user, out } => {
            info!(
                "Starting process command for {} file(s), user: {}, out: {:?}",
                files.len(),
                user,
                out
            );
            ProcessCommand::new(files, user, out, prefs).execute().await
        }
        Commands::Watch {
            inbox,
            pattern,
            user,
            out,
        } => {
            info!(
                "Starting watch command for inbox: {:?}, pattern: {}, user: {}",
                inbox, pattern, user
            );
            WatchCommand::new(inbox, pattern, user, out, prefs)
                .execute()
                .await
        }
        Commands::Rename {
            path,
            template,
            recursive,
        } => {
            info!("Starting rename preview for path: {:?}", path);
            match RenameCommand::new(path, template, recursive) {
                Ok(rename_cmd) => match rename_cmd.execute().await {
                    Ok(report) => {
                        rename_cmd.print_report(&report);
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            }
        }
        Commands::Prefs { user, action } => {
            match PrefsCommand::new(user, action, prefs).execute().await {
                Ok(message) => {
                    println!("{message}");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        Commands::Clean { dir } => {
            let scratch_dir = dir.unwrap_or_else(|| Config::from_env().scratch_dir);
            info!("Starting clean command for: {:?}", scratch_dir);
            CleanCommand::new(scratch_dir).execute().await.map(|_| ())
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
