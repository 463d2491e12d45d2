use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::model::{Candidate, CandidateFile, ContextPayload, LlmRequestConfig};

use super::{LlmGateway, LlmGatewayError};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4.1";

pub struct OpenAiGateway {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiGateway {
    pub fn new(client: Client, api_key: String) -> Self {
        Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[async_trait]
impl LlmGateway for OpenAiGateway {
    async fn generate(
        &self,
        prompt: &str,
        context: &ContextPayload,
        config: &LlmRequestConfig,
        attempt: u32,
    ) -> Result<Candidate, LlmGatewayError> {
        let base_url = config.base_url.as_deref().unwrap_or(&self.base_url);
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let timeout = Duration::from_millis(config.timeout_ms.unwrap_or(30_000));

        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: render_context(context),
                },
                ChatMessage {
                    role: "user",
                    content: prompt.to_string(),
                },
            ],
        };

        let resp = self
            .client
            .post(format!("{base_url}/chat/completions"))
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmGatewayError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmGatewayError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmGatewayError::Decode(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmGatewayError::Decode("empty choices array".into()))?;

        Ok(decode_candidate(context.request_id, attempt, &content))
    }
}

fn render_context(context: &ContextPayload) -> String {
    context
        .code_context
        .iter()
        .map(|slice| format!("// {}\n{}", slice.path, slice.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Response contract: a single fenced JSON object `{"files": [...]}`.
/// Providers that don't honor this format are the `Custom` gateway's
/// problem to normalize, not this one's.
fn decode_candidate(request_id: Uuid, attempt: u32, raw: &str) -> Candidate {
    let digest = {
        use sha2::{Digest, Sha256};
        hex::encode(Sha256::digest(raw.as_bytes()))
    };

    let files = serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v.get("files").cloned())
        .and_then(|v| serde_json::from_value::<Vec<CandidateFile>>(v).ok())
        .unwrap_or_default();

    Candidate {
        request_id,
        attempt,
        files,
        raw_response_digest: digest,
    }
}
