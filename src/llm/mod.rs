//! LLM gateway: the only seam through which Dhi calls out to a frontier
//! model. Kept provider-agnostic the same way `sandbox::SandboxProvider`
//! keeps the executor agnostic to backend wire formats — the core never
//! branches on `llm_provider` beyond picking which `LlmGateway` to call.

mod custom;
mod nvidia;
mod openai;

pub use custom::CustomGateway;
pub use nvidia::NvidiaGateway;
pub use openai::OpenAiGateway;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Candidate, ContextPayload, LlmRequestConfig};

#[derive(Debug, Error)]
pub enum LlmGatewayError {
    #[error("request to LLM gateway failed: {0}")]
    Request(String),
    #[error("LLM gateway returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("LLM gateway response could not be parsed: {0}")]
    Decode(String),
}

/// Generates one candidate for one attempt. Implementors receive the
/// already-assembled local context and never see resource-limit
/// overrides — only `LlmRequestConfig`'s connection/model parameters.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        context: &ContextPayload,
        config: &LlmRequestConfig,
        attempt: u32,
    ) -> Result<Candidate, LlmGatewayError>;
}
