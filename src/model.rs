// src/model.rs

use serde::{Deserialize, Serialize};

/// Normalized image payload handed to the inference client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UploadedImage {
    /// Base64 payload without any `data:` prefix.
    pub base64: String,
    pub mime_type: String,
    /// Data URI suitable for an `<img src>`.
    pub preview: String,
}

/// A citation returned next to the model output.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind")]
pub enum GroundingReference {
    #[serde(rename = "web")]
    Web { uri: String, title: String },
    #[serde(rename = "maps")]
    Place {
        #[serde(default)]
        uri: Option<String>,
        #[serde(default)]
        title: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct RawModelResponse {
    pub text: String,
    #[serde(default)]
    pub grounding_references: Vec<GroundingReference>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BestGuessCoordinate {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub location_name: String,
}

/// A deduplicated map point ready to be drawn as a marker.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Candidate {
    pub lat: f64,
    pub lng: f64,
    pub title: String,
    pub source_uri: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnalysisResult {
    pub display_text: String,
    pub grounding_references: Vec<GroundingReference>,
    pub best_guess: Option<BestGuessCoordinate>,
}

impl AnalysisResult {
    /// `Place` references in their original order.
    pub fn place_references(&self) -> impl Iterator<Item = &GroundingReference> {
        self.grounding_references
            .iter()
            .filter(|r| matches!(r, GroundingReference::Place { .. }))
    }
}
