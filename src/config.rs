use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};
use url::Url;

use crate::presentation::Language;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub engine: String,
    pub gemini_api_base_url: String,
    pub gemini_api_key: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub replay_response_path: String,
    pub language: Language,
    pub max_upload_bytes: usize,
    pub static_directory: String,
    pub web_port: u16,
    pub log_level: String,
}

impl AppConfig {
    pub fn new(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name(&format!("{}/default", config_dir)))
            .add_source(File::with_name(&format!("{}/{}", config_dir, env)).required(false))
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // GEOGUESS_GEMINI_API_KEY keeps the key out of the config files
            .add_source(Environment::with_prefix("GEOGUESS"))
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.gemini_api_base_url).map_err(|e| {
            ConfigError::Message(format!(
                "invalid gemini_api_base_url '{}': {}",
                self.gemini_api_base_url, e
            ))
        })?;
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Message(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        engine: "replay".into(),
        gemini_api_base_url: "https://generativelanguage.googleapis.com".into(),
        gemini_api_key: "test-key".into(),
        model: "gemini-2.5-flash".into(),
        temperature: 0.4,
        request_timeout_secs: 5,
        replay_response_path: "fixtures/sample_response.json".into(),
        language: Language::En,
        max_upload_bytes: 1024 * 1024,
        static_directory: "./static".into(),
        web_port: 0,
        log_level: "debug".into(),
    }
}
