use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::job::{OutputKind, UserId};

/// Per-user settings written by command handlers and read during job setup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub format_template: Option<String>,
    pub caption: Option<String>,
    /// Transport reference to the user's custom thumbnail
    pub thumbnail: Option<String>,
    pub media_preference: Option<OutputKind>,
}

/// Read side used by the pipeline, write side used by command handlers
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, user_id: UserId) -> Result<UserPreferences>;

    async fn update(
        &self,
        user_id: UserId,
        apply: Box<dyn for<'a> FnOnce(&'a mut UserPreferences) + Send>,
    ) -> Result<()>;

    async fn get_template(&self, user_id: UserId) -> Result<Option<String>> {
        Ok(self.get(user_id).await?.format_template)
    }

    async fn get_caption_template(&self, user_id: UserId) -> Result<Option<String>> {
        Ok(self.get(user_id).await?.caption)
    }

    async fn get_thumbnail(&self, user_id: UserId) -> Result<Option<String>> {
        Ok(self.get(user_id).await?.thumbnail)
    }

    async fn get_output_kind(&self, user_id: UserId) -> Result<Option<OutputKind>> {
        Ok(self.get(user_id).await?.media_preference)
    }

    async fn set_template(&self, user_id: UserId, template: Option<String>) -> Result<()> {
        self.update(user_id, Box::new(move |p| p.format_template = template))
            .await
    }

    async fn set_caption(&self, user_id: UserId, caption: Option<String>) -> Result<()> {
        self.update(user_id, Box::new(move |p| p.caption = caption))
            .await
    }

    async fn set_thumbnail(&self, user_id: UserId, thumbnail: Option<String>) -> Result<()> {
        self.update(user_id, Box::new(move |p| p.thumbnail = thumbnail))
            .await
    }

    async fn set_output_kind(&self, user_id: UserId, kind: Option<OutputKind>) -> Result<()> {
        self.update(user_id, Box::new(move |p| p.media_preference = kind))
            .await
    }
}

/// Preference store backed by a JSON document keyed by user id.
/// Without a path it only lives in memory.
pub struct JsonPreferenceStore {
    path: Option<PathBuf>,
    users: RwLock<HashMap<UserId, UserPreferences>>,
}

impl JsonPreferenceStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Open the store at `path`, starting empty if the file does not exist yet
    pub async fn open(path: &Path) -> Result<Self> {
        let users = if path.exists() {
            let content = async_fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read preferences: {path:?}"))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse preferences: {path:?}"))?
        } else {
            HashMap::new()
        };

        debug!("Loaded preferences for {} users from {:?}", users.len(), path);

        Ok(Self {
            path: Some(path.to_path_buf()),
            users: RwLock::new(users),
        })
    }

    async fn persist(&self, users: &HashMap<UserId, UserPreferences>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            async_fs::create_dir_all(parent).await?;
        }

        // Write then rename so readers never see a half-written document
        let tmp = path.with_extension("json.tmp");
        async_fs::write(&tmp, serde_json::to_vec_pretty(users)?).await?;
        async_fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for JsonPreferenceStore {
    async fn get(&self, user_id: UserId) -> Result<UserPreferences> {
        Ok(self
            .users
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update(
        &self,
        user_id: UserId,
        apply: Box<dyn for<'a> FnOnce(&'a mut UserPreferences) + Send>,
    ) -> Result<()> {
        let mut users = self.users.write().await;
        // Readers only see the change once it is on disk
        let mut updated = users.clone();
        apply(updated.entry(user_id).or_default());
        self.persist(&updated).await?;
        *users = updated;
        Ok(())
    }
}
