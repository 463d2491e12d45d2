use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::model::{Candidate, CandidateFile, ContextPayload, LlmRequestConfig};

use super::{LlmGateway, LlmGatewayError};

/// Passthrough to an operator-specified endpoint speaking Dhi's own
/// minimal contract: POST `{prompt, context}`, expect back
/// `{"files": [...]}`. Provider-specific auth/wire quirks live entirely
/// behind `base_url`; Dhi's core never branches on what's on the other
/// end, the same way it never branches on sandbox backend wire formats.
pub struct CustomGateway {
    client: Client,
    api_key: Option<String>,
}

impl CustomGateway {
    pub fn new(client: Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    context: &'a ContextPayload,
}

#[async_trait]
impl LlmGateway for CustomGateway {
    async fn generate(
        &self,
        prompt: &str,
        context: &ContextPayload,
        config: &LlmRequestConfig,
        attempt: u32,
    ) -> Result<Candidate, LlmGatewayError> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| LlmGatewayError::Request("custom provider requires base_url".into()))?;
        let timeout = Duration::from_millis(config.timeout_ms.unwrap_or(30_000));

        let mut req = self
            .client
            .post(base_url)
            .timeout(timeout)
            .json(&GenerateRequest { prompt, context });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
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

        let text = resp
            .text()
            .await
            .map_err(|e| LlmGatewayError::Decode(e.to_string()))?;
        let digest = hex::encode(Sha256::digest(text.as_bytes()));
        let files = serde_json::from_str::<Value>(&text)
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
