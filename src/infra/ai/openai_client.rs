// OpenAI-compatible chat completions client.
//
// Serves both OpenAI itself and OpenRouter, which speaks the same protocol
// at a different base URL.

use super::{error_for_status, error_for_transport, MAX_REPLY_TOKENS};
use crate::core::classifier::{parse_score, ClassifierError, ClassifierProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

pub struct OpenAiClassifier {
    client: Client,
    api_key: String,
    model: String,
    url: String,
    vendor: &'static str,
}

impl OpenAiClassifier {
    pub fn openai(api_key: String, model: String) -> Self {
        Self::with_url(api_key, model, OPENAI_URL.to_string(), "openai")
    }

    pub fn openrouter(api_key: String, model: String) -> Self {
        Self::with_url(api_key, model, OPENROUTER_URL.to_string(), "openrouter")
    }

    pub fn with_url(api_key: String, model: String, url: String, vendor: &'static str) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            url,
            vendor,
        }
    }
}

/// Pull the assistant text out of a chat completions response.
fn reply_text(response_json: &serde_json::Value) -> Option<&str> {
    response_json["choices"][0]["message"]["content"].as_str()
}

#[async_trait]
impl ClassifierProvider for OpenAiClassifier {
    fn name(&self) -> &str {
        self.vendor
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn score(&self, text: &str, prompt: &str) -> Result<f64, ClassifierError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt },
                { "role": "user", "content": text },
            ],
            "temperature": 0.0,
            "max_tokens": MAX_REPLY_TOKENS,
        });

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| error_for_transport(self.vendor, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(self.vendor, status, &body));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| error_for_transport(self.vendor, e))?;

        let content = reply_text(&response_json).ok_or_else(|| {
            ClassifierError::InvalidScore("response had no message content".to_string())
        })?;

        parse_score(content)
    }
}
