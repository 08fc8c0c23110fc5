use crate::analyzer::LocationAnalyzer;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::model::{GroundingReference, RawModelResponse, UploadedImage};
use crate::presentation::Strings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    tools: Vec<Tool>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Debug)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
enum RequestPart<'a> {
    InlineData(InlineData<'a>),
    Text(&'a str),
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Tool {
    google_maps: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize, Debug)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ResponseCandidate {
    content: Option<ResponseContent>,
    grounding_metadata: Option<GroundingMetadata>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize, Debug)]
struct GroundingChunk {
    web: Option<ChunkSource>,
    maps: Option<ChunkSource>,
}

#[derive(Deserialize, Debug)]
struct ChunkSource {
    uri: Option<String>,
    title: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Gemini `generateContent` client with the Google Maps grounding tool enabled.
pub struct GeminiAnalyzer {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    temperature: f32,
    strings: &'static Strings,
}

impl GeminiAnalyzer {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        if config.gemini_api_key.trim().is_empty() {
            return Err(AppError::Generic(
                "gemini_api_key is empty; set GEOGUESS_GEMINI_API_KEY".into(),
            ));
        }
        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            config.gemini_api_base_url.trim_end_matches('/'),
            config.model
        );
        log::debug!("Creating Gemini client for endpoint: {}", endpoint);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint,
            api_key: config.gemini_api_key.clone(),
            temperature: config.temperature,
            strings: config.language.strings(),
        })
    }

    fn request_body<'a>(&'a self, image: &'a UploadedImage) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![
                    RequestPart::InlineData(InlineData {
                        mime_type: &image.mime_type,
                        data: &image.base64,
                    }),
                    RequestPart::Text(self.strings.prompt),
                ],
            }],
            tools: vec![Tool { google_maps: serde_json::Map::new() }],
            generation_config: GenerationConfig { temperature: self.temperature },
        }
    }
}

#[async_trait]
impl LocationAnalyzer for GeminiAnalyzer {
    async fn analyze(&self, image: &UploadedImage) -> Result<RawModelResponse, AppError> {
        log::info!("Sending {} image ({} base64 chars) to Gemini", image.mime_type, image.base64.len());

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(image))
            .send()
            .await
            .map_err(|e| AppError::Inference(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("Gemini returned {}: {}", status, body);
            return Err(AppError::Inference(format!("HTTP {}", status)));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AppError::Inference(format!("undecodable response: {}", e)))?;

        into_raw_response(parsed, self.strings.no_text_response)
    }
}

fn into_raw_response(
    response: GenerateContentResponse,
    no_text_fallback: &str,
) -> Result<RawModelResponse, AppError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates".into());
        return Err(AppError::Inference(format!("empty response: {}", reason)));
    };
    log::debug!("Gemini finish reason: {:?}", candidate.finish_reason);

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    let text = if text.trim().is_empty() {
        log::warn!("Gemini returned no text parts");
        no_text_fallback.to_string()
    } else {
        text
    };

    let grounding_references: Vec<GroundingReference> = candidate
        .grounding_metadata
        .map(|m| m.grounding_chunks)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|chunk| {
            if let Some(maps) = chunk.maps {
                Some(GroundingReference::Place {
                    uri: maps.uri,
                    title: maps.title.unwrap_or_default(),
                })
            } else {
                let web = chunk.web?;
                Some(GroundingReference::Web {
                    uri: web.uri?,
                    title: web.title.unwrap_or_default(),
                })
            }
        })
        .collect();
    log::debug!("Gemini returned {} grounding references", grounding_references.len());

    Ok(RawModelResponse { text, grounding_references })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};

    const SAMPLE: &str = r#"{
        "candidates": [{
            "content": {"role": "model", "parts": [
                {"text": "Country: Japan\n"},
                {"text": "```json\n{\"lat\": 35.6, \"lng\": 139.7, \"locationName\": \"Tokyo\"}\n```"}
            ]},
            "finishReason": "STOP",
            "groundingMetadata": {"groundingChunks": [
                {"maps": {"uri": "https://maps.google.com/?q=35.6,139.7", "title": "Tokyo", "placeId": "abc"}},
                {"maps": {"title": "No link"}},
                {"web": {"uri": "https://en.wikipedia.org/wiki/Tokyo", "title": "Tokyo - Wikipedia"}},
                {"web": {"title": "dangling"}}
            ]}
        }]
    }"#;

    fn image() -> UploadedImage {
        UploadedImage {
            base64: "AAAA".into(),
            mime_type: "image/png".into(),
            preview: String::new(),
        }
    }

    #[test]
    fn request_body_matches_wire_format() {
        let analyzer = GeminiAnalyzer::new(&test_config()).unwrap();
        let image = image();
        let body = serde_json::to_value(analyzer.request_body(&image)).unwrap();
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[0]["inlineData"]["data"], "AAAA");
        assert!(parts[1]["text"].as_str().unwrap().contains("```json"));
        assert_eq!(body["tools"][0]["googleMaps"], serde_json::json!({}));
        assert!((body["generationConfig"]["temperature"].as_f64().unwrap() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn maps_chunks_to_references() {
        let parsed: GenerateContentResponse = serde_json::from_str(SAMPLE).unwrap();
        let raw = into_raw_response(parsed, "fallback").unwrap();
        assert!(raw.text.starts_with("Country: Japan\n```json"));
        assert_eq!(
            raw.grounding_references,
            vec![
                GroundingReference::Place {
                    uri: Some("https://maps.google.com/?q=35.6,139.7".into()),
                    title: "Tokyo".into(),
                },
                GroundingReference::Place { uri: None, title: "No link".into() },
                GroundingReference::Web {
                    uri: "https://en.wikipedia.org/wiki/Tokyo".into(),
                    title: "Tokyo - Wikipedia".into(),
                },
            ]
        );
    }

    #[test]
    fn empty_text_uses_fallback_and_missing_candidates_fail() {
        let parsed: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates": [{"content": {"parts": []}}]}"#).unwrap();
        assert_eq!(into_raw_response(parsed, "fallback").unwrap().text, "fallback");

        let blocked: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#).unwrap();
        let err = into_raw_response(blocked, "fallback").unwrap_err();
        assert!(matches!(err, AppError::Inference(ref m) if m.contains("SAFETY")));
    }

    #[test]
    fn refuses_blank_api_key() {
        let mut config = test_config();
        config.gemini_api_key = "  ".into();
        assert!(GeminiAnalyzer::new(&config).is_err());
    }

    async fn fake_generate(req: HttpRequest, body: web::Json<serde_json::Value>) -> HttpResponse {
        let key = req.headers().get("x-goog-api-key").and_then(|v| v.to_str().ok());
        if key != Some("test-key") {
            return HttpResponse::Forbidden().finish();
        }
        if body["tools"][0].get("googleMaps").is_none() {
            return HttpResponse::BadRequest().finish();
        }
        HttpResponse::Ok().content_type("application/json").body(SAMPLE)
    }

    #[actix_web::test]
    async fn talks_to_generate_content_endpoint() {
        let server = HttpServer::new(|| {
            App::new().route(
                "/v1beta/models/gemini-2.5-flash:generateContent",
                web::post().to(fake_generate),
            )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        let running = server.run();
        let handle = running.handle();
        actix_web::rt::spawn(running);

        let mut config = test_config();
        config.gemini_api_base_url = format!("http://{}/", addr);
        let raw = GeminiAnalyzer::new(&config).unwrap().analyze(&image()).await.unwrap();
        assert_eq!(raw.grounding_references.len(), 3);

        config.gemini_api_key = "wrong".into();
        let err = GeminiAnalyzer::new(&config).unwrap().analyze(&image()).await.unwrap_err();
        assert!(matches!(err, AppError::Inference(ref m) if m.contains("403")));

        handle.stop(true).await;
    }
}
