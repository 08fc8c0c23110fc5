use lazy_static::lazy_static;
use regex::Regex;

use crate::model::{AnalysisResult, BestGuessCoordinate, RawModelResponse};

lazy_static! {
    // First ```json fenced block, delimiters included in the match.
    static ref JSON_FENCE: Regex = Regex::new(r"(?s)```json\s*(.*?)```").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub display_text: String,
    pub best_guess: Option<BestGuessCoordinate>,
}

/// Splits model text into the prose shown to the user and the trailing
/// structured coordinate guess, if the model emitted one.
///
/// Never fails: a missing or malformed block leaves the text untouched.
pub fn extract(text: &str) -> Extracted {
    let captures = match JSON_FENCE.captures(text) {
        Some(c) => c,
        None => {
            log::debug!("No fenced json block in model text ({} bytes)", text.len());
            return Extracted { display_text: text.to_string(), best_guess: None };
        }
    };

    let (Some(block), Some(body)) = (captures.get(0), captures.get(1)) else {
        return Extracted { display_text: text.to_string(), best_guess: None };
    };

    match serde_json::from_str::<BestGuessCoordinate>(body.as_str()) {
        Ok(guess) => {
            log::debug!(
                "Parsed best guess: {} ({}, {})",
                guess.location_name, guess.lat, guess.lng
            );
            let mut remaining = String::with_capacity(text.len() - block.len());
            remaining.push_str(&text[..block.start()]);
            remaining.push_str(&text[block.end()..]);
            Extracted {
                display_text: remaining.trim().to_string(),
                best_guess: Some(guess),
            }
        }
        Err(e) => {
            log::warn!("Failed to parse coordinate block from model text: {}", e);
            log::trace!("Rejected coordinate block: {}", body.as_str());
            Extracted { display_text: text.to_string(), best_guess: None }
        }
    }
}

pub fn analyze_response(response: RawModelResponse) -> AnalysisResult {
    let Extracted { display_text, best_guess } = extract(&response.text);
    AnalysisResult {
        display_text,
        grounding_references: response.grounding_references,
        best_guess,
    }
}
