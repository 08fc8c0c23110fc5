use crate::analyzer::LocationAnalyzer;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::model::{RawModelResponse, UploadedImage};
use async_trait::async_trait;
use std::path::PathBuf;

/// Answers every request with a recorded response read from disk.
pub struct ReplayAnalyzer {
    path: PathBuf,
}

impl ReplayAnalyzer {
    pub fn new(config: &AppConfig) -> Self {
        log::debug!("Replaying recorded responses from: {}", config.replay_response_path);
        Self { path: PathBuf::from(&config.replay_response_path) }
    }
}

#[async_trait]
impl LocationAnalyzer for ReplayAnalyzer {
    async fn analyze(&self, image: &UploadedImage) -> Result<RawModelResponse, AppError> {
        log::info!("Replaying response for {} image from {:?}", image.mime_type, self.path);
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| AppError::Inference(format!("cannot read {:?}: {}", self.path, e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| AppError::Inference(format!("bad recorded response {:?}: {}", self.path, e)))
    }
}
