//! Per-provider request shaping.
//!
//! Providers differ only in data: where to send requests, how to
//! authenticate, and what the body looks like. [`ProviderProfile`] captures
//! that data; all behaviour lives in the shared adapter.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use super::payload::{ChatRequest, Message};
use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{Error, Result};
use crate::relay::EventDecoder;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_AZURE_API_VERSION: &str = "2023-03-15-preview";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_APP_NAME: &str = "Easy GPT";
pub const AZURE_SYSTEM_PROMPT: &str =
    "You are an AI assistant that helps people find information.";

/// OpenRouter attribution header.
pub const APP_NAME_HEADER: &str = "x-app-name";
/// Azure OpenAI key header.
pub const AZURE_KEY_HEADER: &str = "api-key";

const DEFAULT_TEMPERATURE: f32 = 0.7;
const AZURE_TOP_P: f32 = 0.95;

/// Resolved request-shaping data for one provider.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub kind: ProviderKind,
    pub base_url: String,
    pub deployment: Option<String>,
    pub api_version: String,
    pub default_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub app_name: String,
    headers: HeaderMap,
}

impl ProviderProfile {
    /// Resolve defaults and pre-build headers. Fails on keys that are not
    /// valid header values.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let kind = config.kind;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| match kind {
                ProviderKind::OpenRouter => OPENROUTER_BASE_URL.to_string(),
                ProviderKind::OpenAi | ProviderKind::Azure => OPENAI_BASE_URL.to_string(),
            })
            .trim_end_matches('/')
            .to_string();
        let max_tokens = config.max_tokens.unwrap_or(match kind {
            ProviderKind::Azure => 800,
            ProviderKind::OpenAi | ProviderKind::OpenRouter => 8192,
        });
        let app_name = config
            .app_name
            .clone()
            .unwrap_or_else(|| DEFAULT_APP_NAME.to_string());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            let (name, value) = match kind {
                ProviderKind::Azure => (
                    HeaderName::from_static(AZURE_KEY_HEADER),
                    key.expose_secret().to_string(),
                ),
                ProviderKind::OpenAi | ProviderKind::OpenRouter => {
                    (AUTHORIZATION, format!("Bearer {}", key.expose_secret()))
                }
            };
            let mut value = HeaderValue::from_str(&value).map_err(|_| {
                Error::Internal(format!(
                    "API key for provider '{}' is not a valid header value",
                    config.name
                ))
            })?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }
        if kind == ProviderKind::OpenRouter {
            let value = HeaderValue::from_str(&app_name).map_err(|_| {
                Error::Internal(format!("Invalid app_name for provider '{}'", config.name))
            })?;
            headers.insert(HeaderName::from_static(APP_NAME_HEADER), value);
        }

        Ok(Self {
            kind,
            base_url,
            deployment: config.deployment.clone(),
            api_version: config
                .api_version
                .clone()
                .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            default_model: config
                .default_model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens,
            temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            app_name,
            headers,
        })
    }

    /// Headers sent with every request (content type, auth, attribution).
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn chat_url(&self) -> String {
        match self.kind {
            ProviderKind::Azure => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url,
                self.deployment.as_deref().unwrap_or_default(),
                self.api_version
            ),
            ProviderKind::OpenAi | ProviderKind::OpenRouter => {
                format!("{}/chat/completions", self.base_url)
            }
        }
    }

    pub fn models_url(&self) -> String {
        match self.kind {
            ProviderKind::Azure => format!(
                "{}/openai/models?api-version={}",
                self.base_url, self.api_version
            ),
            ProviderKind::OpenAi | ProviderKind::OpenRouter => {
                format!("{}/models", self.base_url)
            }
        }
    }

    /// Build the chat completion body for one prompt.
    pub fn chat_payload(&self, prompt: &str, model: &str, stream: bool) -> ChatRequest {
        let stream = stream.then_some(true);
        match self.kind {
            // Reasoning deployments reject system prompts and sampling params.
            ProviderKind::Azure if is_reasoning_model(model) => ChatRequest {
                model: None,
                messages: vec![Message::with_parts("user", prompt)],
                max_tokens: None,
                temperature: None,
                top_p: None,
                stream,
            },
            ProviderKind::Azure => ChatRequest {
                model: None,
                messages: vec![
                    Message::with_parts("system", AZURE_SYSTEM_PROMPT),
                    Message::with_parts("user", prompt),
                ],
                max_tokens: Some(self.max_tokens),
                temperature: Some(self.temperature),
                top_p: Some(AZURE_TOP_P),
                stream,
            },
            ProviderKind::OpenAi | ProviderKind::OpenRouter => ChatRequest {
                model: Some(model.to_string()),
                messages: vec![Message::user(prompt)],
                max_tokens: Some(self.max_tokens),
                temperature: Some(self.temperature),
                top_p: None,
                stream,
            },
        }
    }

    /// Decoder for this provider's stream format.
    pub fn decoder(&self) -> EventDecoder {
        EventDecoder::openai()
    }
}

fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("o1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiKey;

    fn config(kind: ProviderKind) -> ProviderConfig {
        ProviderConfig {
            name: "test".to_string(),
            kind,
            api_key: Some(ApiKey::from("sk-test")),
            ..Default::default()
        }
    }

    fn azure() -> ProviderConfig {
        ProviderConfig {
            url: Some("https://res.openai.azure.com/".to_string()),
            deployment: Some("gpt4o".to_string()),
            ..config(ProviderKind::Azure)
        }
    }

    #[test]
    fn test_openai_defaults() {
        let profile = ProviderProfile::from_config(&config(ProviderKind::OpenAi)).unwrap();
        assert_eq!(profile.chat_url(), "https://api.openai.com/v1/chat/completions");
        assert_eq!(profile.models_url(), "https://api.openai.com/v1/models");
        assert_eq!(profile.default_model, "gpt-4o-mini");
        assert_eq!(profile.headers()[AUTHORIZATION], "Bearer sk-test");
        assert!(profile.headers()[AUTHORIZATION].is_sensitive());
        assert!(profile.headers().get(APP_NAME_HEADER).is_none());
    }

    #[test]
    fn test_openai_payload() {
        let profile = ProviderProfile::from_config(&config(ProviderKind::OpenAi)).unwrap();
        let body = serde_json::to_value(profile.chat_payload("Hi", "demo", true)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "model": "demo",
                "messages": [{"role": "user", "content": "Hi"}],
                "max_tokens": 8192,
                "temperature": 0.7f32,
                "stream": true
            })
        );
    }

    #[test]
    fn test_non_streaming_payload_omits_stream() {
        let profile = ProviderProfile::from_config(&config(ProviderKind::OpenAi)).unwrap();
        let body = serde_json::to_value(profile.chat_payload("Hi", "demo", false)).unwrap();
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_openrouter_headers_and_url() {
        let profile = ProviderProfile::from_config(&config(ProviderKind::OpenRouter)).unwrap();
        assert_eq!(profile.chat_url(), "https://openrouter.ai/api/v1/chat/completions");
        assert_eq!(profile.headers()[APP_NAME_HEADER], "Easy GPT");
        assert_eq!(profile.headers()[AUTHORIZATION], "Bearer sk-test");
    }

    #[test]
    fn test_azure_urls_and_key_header() {
        let profile = ProviderProfile::from_config(&azure()).unwrap();
        assert_eq!(
            profile.chat_url(),
            "https://res.openai.azure.com/openai/deployments/gpt4o/chat/completions?api-version=2023-03-15-preview"
        );
        assert_eq!(
            profile.models_url(),
            "https://res.openai.azure.com/openai/models?api-version=2023-03-15-preview"
        );
        assert_eq!(profile.headers()[AZURE_KEY_HEADER], "sk-test");
        assert!(profile.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_azure_payload_has_system_prompt() {
        let profile = ProviderProfile::from_config(&azure()).unwrap();
        let body = serde_json::to_value(profile.chat_payload("Hi", "gpt-4o", true)).unwrap();
        assert!(body.get("model").is_none());
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"][0]["text"], AZURE_SYSTEM_PROMPT);
        assert_eq!(body["messages"][1]["content"][0]["type"], "text");
        assert_eq!(body["messages"][1]["content"][0]["text"], "Hi");
        assert_eq!(body["max_tokens"], 800);
        assert_eq!(body["top_p"], serde_json::json!(0.95f32));
    }

    #[test]
    fn test_azure_reasoning_payload_is_minimal() {
        let profile = ProviderProfile::from_config(&azure()).unwrap();
        let body = serde_json::to_value(profile.chat_payload("Hi", "o1-preview", false)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "messages": [{"role": "user", "content": [{"type": "text", "text": "Hi"}]}]
            })
        );
    }

    #[test]
    fn test_invalid_key_rejected() {
        let mut cfg = config(ProviderKind::OpenAi);
        cfg.api_key = Some(ApiKey::from("bad\nkey"));
        assert!(ProviderProfile::from_config(&cfg).is_err());
    }

    #[test]
    fn test_configured_overrides() {
        let cfg = ProviderConfig {
            url: Some("http://localhost:9999/v1/".to_string()),
            default_model: Some("llama".to_string()),
            max_tokens: Some(256),
            temperature: Some(0.1),
            app_name: Some("Custom".to_string()),
            ..config(ProviderKind::OpenRouter)
        };
        let profile = ProviderProfile::from_config(&cfg).unwrap();
        assert_eq!(profile.chat_url(), "http://localhost:9999/v1/chat/completions");
        assert_eq!(profile.default_model, "llama");
        assert_eq!(profile.max_tokens, 256);
        assert_eq!(profile.headers()[APP_NAME_HEADER], "Custom");
    }
}
