use anyhow::{anyhow, Result};
use clap::Subcommand;
use std::path::PathBuf;
use tracing::info;

use crate::job::{OutputKind, UserId};
use crate::prefs::{JsonPreferenceStore, PreferenceStore};

/// Preference changes, mirroring the bot's settings commands
#[derive(Debug, Clone, Subcommand, PartialEq)]
pub enum PrefsAction {
    /// Show all stored preferences
    Show,
    /// Set the rename format, e.g. "S{season}E{episode} - [{quality}]"
    Template { format: String },
    /// Set the caption template ({filename}, {filesize}, {duration})
    Caption { caption: String },
    /// Remove the caption template
    DelCaption,
    /// Use an image file as thumbnail for every upload
    Thumbnail { path: PathBuf },
    /// Remove the custom thumbnail
    DelThumbnail,
    /// Upload type: video, document or audio
    Media { kind: String },
    /// Go back to choosing the upload type from the file
    DelMedia,
}

/// Command to read and write a user's preferences
pub struct PrefsCommand {
    user_id: UserId,
    action: PrefsAction,
    store_path: PathBuf,
}

impl PrefsCommand {
    pub fn new(user_id: UserId, action: PrefsAction, store_path: PathBuf) -> Self {
        Self {
            user_id,
            action,
            store_path,
        }
    }

    /// Apply the action and return the message for the user
    pub async fn execute(&self) -> Result<String> {
        let store = JsonPreferenceStore::open(&self.store_path).await?;
        self.apply(&store).await
    }

    pub async fn apply(&self, store: &dyn PreferenceStore) -> Result<String> {
        let user = self.user_id;
        let message = match &self.action {
            PrefsAction::Show => {
                let prefs = store.get(user).await?;
                serde_json::to_string_pretty(&prefs)?
            }
            PrefsAction::Template { format } => {
                let format = format.trim();
                if format.is_empty() {
                    return Err(anyhow!("Format cannot be empty"));
                }
                store.set_template(user, Some(format.to_string())).await?;
                format!("✅ Auto rename format saved: {format}")
            }
            PrefsAction::Caption { caption } => {
                if caption.trim().is_empty() {
                    return Err(anyhow!("Caption cannot be empty"));
                }
                store.set_caption(user, Some(caption.clone())).await?;
                "✅ Caption saved".to_string()
            }
            PrefsAction::DelCaption => {
                if store.get_caption_template(user).await?.is_none() {
                    return Err(anyhow!("No caption found"));
                }
                store.set_caption(user, None).await?;
                "🗑️ Caption deleted".to_string()
            }
            PrefsAction::Thumbnail { path } => {
                if !path.is_file() {
                    return Err(anyhow!("Thumbnail does not exist: {path:?}"));
                }
                let path = path.canonicalize()?;
                store
                    .set_thumbnail(user, Some(path.to_string_lossy().into_owned()))
                    .await?;
                format!("✅ Thumbnail saved: {}", path.display())
            }
            PrefsAction::DelThumbnail => {
                if store.get_thumbnail(user).await?.is_none() {
                    return Err(anyhow!("No thumbnail found"));
                }
                store.set_thumbnail(user, None).await?;
                "🗑️ Thumbnail deleted".to_string()
            }
            PrefsAction::Media { kind } => {
                let kind: OutputKind = kind.parse().map_err(|e: String| anyhow!(e))?;
                store.set_output_kind(user, Some(kind)).await?;
                format!("✅ All your files will now be uploaded as {kind}")
            }
            PrefsAction::DelMedia => {
                store.set_output_kind(user, None).await?;
                "✅ Upload type now follows the file type".to_string()
            }
        };

        info!("Updated preferences for user {}", user);
        Ok(message)
    }
}
