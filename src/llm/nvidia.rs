use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::model::{Candidate, CandidateFile, ContextPayload, LlmRequestConfig};

use super::{LlmGateway, LlmGatewayError};

const DEFAULT_BASE_URL: &str = "https://integrate.api.nvidia.com/v1";
const DEFAULT_MODEL: &str = "meta/llama-3.1-405b-instruct";

/// NVIDIA NIM's chat completions endpoint speaks the same wire format as
/// OpenAI's; only the base URL, default model, and auth header name
/// differ enough to warrant a separate implementor.
pub struct NvidiaGateway {
    client: Client,
    api_key: String,
    base_url: String,
}

impl NvidiaGateway {
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
    temperature: f32,
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
impl LlmGateway for NvidiaGateway {
    async fn generate(
        &self,
        prompt: &str,
        context: &ContextPayload,
        config: &LlmRequestConfig,
        attempt: u32,
    ) -> Result<Candidate, LlmGatewayError> {
        let base_url = config.base_url.as_deref().unwrap_or(&self.base_url);
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let timeout = Duration::from_millis(config.timeout_ms.unwrap_or(45_000));

        let system = context
            .code_context
            .iter()
            .map(|slice| format!("// {}\n{}", slice.path, slice.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt.to_string(),
                },
            ],
            temperature: 0.2,
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

        let digest = hex::encode(Sha256::digest(content.as_bytes()));
        let files = serde_json::from_str::<Value>(&content)
            .ok()
            .and_then(|v| v.get("files").cloned())
            .and_then(|v| serde_json::from_value::<Vec<CandidateFile>>(v).ok())
            .unwrap_or_default();

        Ok(Candidate {
            request_id: context.request_id,
            attempt,
            files,
            raw_response_digest: digest,
        })
    }
}
