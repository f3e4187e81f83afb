use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::commands::pipeline::LocalPipeline;
use crate::config::Config;
use crate::job::UserId;
use crate::prefs::JsonPreferenceStore;
use crate::queue::Admission;

/// Command to run local files through the whole pipeline and wait for the results
pub struct ProcessCommand {
    files: Vec<PathBuf>,
    user_id: UserId,
    outbox: PathBuf,
    prefs_path: PathBuf,
}

impl ProcessCommand {
    pub fn new(files: Vec<PathBuf>, user_id: UserId, outbox: PathBuf, prefs_path: PathBuf) -> Self {
        Self {
            files,
            user_id,
            outbox,
            prefs_path,
        }
    }

    pub async fn execute(&self) -> Result<()> {
        if self.files.is_empty() {
            return Err(anyhow!("No files given"));
        }
        if let Some(missing) = self.files.iter().find(|f| !f.is_file()) {
            return Err(anyhow!("File does not exist: {:?}", missing));
        }

        let config = Config::from_env();
        let prefs = Arc::new(JsonPreferenceStore::open(&self.prefs_path).await?);
        let pipeline = LocalPipeline::start(&config, self.outbox.clone(), prefs)?;

        let mut submitted = 0;
        for file in &self.files {
            if pipeline.submit_file(file, self.user_id).await? != Admission::Duplicate {
                submitted += 1;
            }
        }

        info!("⏳ Waiting for {} job(s) to finish...", submitted);
        let state = pipeline.state().clone();
        pipeline.shutdown().await;

        let failed = state.failed_count();
        if failed > 0 {
            return Err(anyhow!("{failed} of {submitted} job(s) failed"));
        }
        info!("✅ All jobs finished. Deliveries are in {:?}", self.outbox);
        Ok(())
    }
}
