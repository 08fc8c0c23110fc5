use crate::error::AppError;
use crate::model::{RawModelResponse, UploadedImage};
use async_trait::async_trait;

/// A remote (or recorded) multimodal model that looks at a screenshot and
/// answers with free text plus grounding citations.
#[async_trait]
pub trait LocationAnalyzer: Send + Sync {
    async fn analyze(&self, image: &UploadedImage) -> Result<RawModelResponse, AppError>;
}
