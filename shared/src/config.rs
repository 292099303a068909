use serde::Deserialize;

use crate::openai_client::OpenAiSettings;

fn default_openai_api_base() -> String {
    "https://api.openai.com".into()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".into()
}

fn default_openai_max_tokens() -> u32 {
    800
}

fn default_openai_temperature() -> f32 {
    0.3
}

fn default_openai_retries() -> usize {
    2
}

fn default_openai_timeout_secs() -> u64 {
    60
}

fn default_state_path() -> String {
    "data/urban-analysis.json".into()
}

fn default_bind_address() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8090
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_openai_api_base")]
    pub openai_api_base: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default = "default_openai_max_tokens")]
    pub openai_max_tokens: u32,
    #[serde(default = "default_openai_temperature")]
    pub openai_temperature: f32,
    #[serde(default = "default_openai_retries")]
    pub openai_retries: usize,
    #[serde(default = "default_openai_timeout_secs")]
    pub openai_timeout_secs: u64,
    /// JSON file holding the persisted wizard state.
    #[serde(default = "default_state_path")]
    pub state_path: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Settings {
    /// Reads an optional `comparison.toml` and lets environment variables
    /// (`OPENAI_API_KEY`, `STATE_PATH`, `PORT`, ...) override it.
    pub fn new() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("comparison").required(false))
            .add_source(config::Environment::default())
            .build()?
            .try_deserialize()
    }

    pub fn openai(&self) -> OpenAiSettings {
        OpenAiSettings {
            api_key: self
                .openai_api_key
                .as_ref()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            api_base: self.openai_api_base.trim_end_matches('/').to_string(),
            model: self.openai_model.clone(),
            max_tokens: self.openai_max_tokens,
            temperature: self.openai_temperature,
            retries: self.openai_retries,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_api_base: default_openai_api_base(),
            openai_model: default_openai_model(),
            openai_max_tokens: default_openai_max_tokens(),
            openai_temperature: default_openai_temperature(),
            openai_retries: default_openai_retries(),
            openai_timeout_secs: default_openai_timeout_secs(),
            state_path: default_state_path(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_api_key_is_treated_as_missing() {
        let settings = Settings {
            openai_api_key: Some("   ".into()),
            openai_api_base: "http://localhost:1234/".into(),
            ..Settings::default()
        };
        let openai = settings.openai();
        assert!(openai.api_key.is_none());
        assert_eq!(openai.api_base, "http://localhost:1234");
    }
}
