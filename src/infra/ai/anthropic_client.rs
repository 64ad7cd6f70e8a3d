// Anthropic Messages API client.
//
// Differences from the OpenAI protocol:
// - Auth is an `x-api-key` header plus a pinned `anthropic-version`.
// - The system prompt is a top-level `system` field, not a message.
// - Reply text is at `content[0].text`.

use super::{error_for_status, error_for_transport, MAX_REPLY_TOKENS};
use crate::core::classifier::{parse_score, ClassifierError, ClassifierProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

pub struct AnthropicClassifier {
    client: Client,
    api_key: String,
    model: String,
}

impl AnthropicClassifier {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl ClassifierProvider for AnthropicClassifier {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn score(&self, text: &str, prompt: &str) -> Result<f64, ClassifierError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_REPLY_TOKENS,
            temperature: 0.0,
            system: prompt,
            messages: vec![Message {
                role: "user",
                content: text,
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| error_for_transport("anthropic", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status("anthropic", status, &body));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| error_for_transport("anthropic", e))?;

        let content = body
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| {
                ClassifierError::InvalidScore("response had no text content".to_string())
            })?;

        parse_score(&content)
    }
}
