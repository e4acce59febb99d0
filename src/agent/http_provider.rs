//! OpenAI-compatible HTTP agent provider.
//!
//! Speaks `/v1/chat/completions` against whatever endpoint the config names.
//! Photos are attached as base64 data-URL image parts on the user message;
//! history turns are replayed as alternating user/assistant messages.

use super::{AgentProvider, AgentRequest, build_system_prompt};
use crate::config::AgentConfig;
use crate::error::{GlintError, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::debug;

/// HTTP agent talking to an OpenAI-compatible chat completions API.
pub struct HttpAgent {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl HttpAgent {
    /// Build from config, resolving the API key from the configured
    /// environment variable (empty when unset — some local endpoints do not
    /// authenticate).
    #[must_use]
    pub fn from_config(config: &AgentConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
        Self::new(&config.api_url, &api_key, &config.api_model)
    }

    #[must_use]
    pub fn new(api_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
            model: model.to_owned(),
        }
    }

    fn build_body(&self, request: &AgentRequest) -> serde_json::Value {
        let mut messages = Vec::new();

        messages.push(serde_json::json!({
            "role": "system",
            "content": build_system_prompt(&request.context),
        }));

        for turn in &request.context.conversation_history {
            messages.push(serde_json::json!({
                "role": "user",
                "content": turn.query,
            }));
            messages.push(serde_json::json!({
                "role": "assistant",
                "content": turn.response,
            }));
        }

        if request.photos.is_empty() {
            messages.push(serde_json::json!({
                "role": "user",
                "content": request.query,
            }));
        } else {
            let mut parts = vec![serde_json::json!({
                "type": "text",
                "text": request.query,
            })];
            for photo in &request.photos {
                let data_url = format!("data:image/jpeg;base64,{}", BASE64.encode(photo));
                parts.push(serde_json::json!({
                    "type": "image_url",
                    "image_url": { "url": data_url },
                }));
            }
            messages.push(serde_json::json!({
                "role": "user",
                "content": parts,
            }));
        }

        serde_json::json!({
            "model": self.model,
            "messages": messages,
        })
    }
}

#[async_trait]
impl AgentProvider for HttpAgent {
    async fn generate(&self, request: AgentRequest) -> Result<String> {
        let body = self.build_body(&request);
        debug!(
            model = self.model,
            photos = request.photos.len(),
            history = request.context.conversation_history.len(),
            "agent request"
        );

        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .json(&body);
        if !self.api_key.is_empty() {
            http = http.bearer_auth(&self.api_key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| GlintError::Agent(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GlintError::Agent(format!(
                "upstream returned {status}: {detail}"
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GlintError::Agent(format!("invalid response body: {e}")))?;

        let text = payload["choices"]
            .get(0)
            .and_then(|choice| choice["message"]["content"].as_str())
            .map(str::trim)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| GlintError::Agent("empty completion".to_owned()))?;

        Ok(text.to_owned())
    }
}
