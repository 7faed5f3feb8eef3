//! Client-facing request types.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Body of `POST /prompt/text` and `POST /promptStream/text`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PromptRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Provider name; the configured default when absent.
    #[serde(default)]
    pub provider: Option<String>,
}

impl PromptRequest {
    /// The prompt, rejecting missing or blank values.
    pub fn prompt(&self) -> Result<&str> {
        match self.prompt.as_deref() {
            Some(p) if !p.trim().is_empty() => Ok(p),
            _ => Err(Error::BadRequest("Prompt is required".to_string())),
        }
    }

    /// The requested model, or `default` when none (or a blank one) was given.
    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(default)
    }
}

/// Query of `GET /models`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelsQuery {
    pub provider: Option<String>,
}
