use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from environment variables. Split into
/// `from_env` / `from_raw_values` so tests never mutate process-global
/// environment.
pub struct Config {
    pub port: u16,
    pub sentry_dsn: Option<String>,
    pub environment: String,
    pub data_dir: PathBuf,
    pub mode_default: ModeDefault,
    pub max_concurrent_sandboxes: usize,
    pub llm: LlmProviderConfig,
    pub strict_api_base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeDefault {
    Fast,
    Balanced,
}

/// Per-process LLM provider defaults. A request may override
/// model/base_url/timeout (`LlmRequestConfig`) but never these resource
/// limits or which provider's API key gets used.
#[derive(Default)]
pub struct LlmProviderConfig {
    pub openai_api_key: Option<String>,
    pub nvidia_api_key: Option<String>,
    pub custom_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_raw_values(RawConfig {
            port: std::env::var("PORT").ok(),
            sentry_dsn: std::env::var("SENTRY_DSN").ok(),
            environment: std::env::var("ENVIRONMENT").ok(),
            data_dir: std::env::var("DHI_DATA_DIR").ok(),
            mode_default: std::env::var("DHI_MODE_DEFAULT").ok(),
            max_concurrent_sandboxes: std::env::var("DHI_MAX_CONCURRENT_SANDBOXES").ok(),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            nvidia_api_key: std::env::var("NVIDIA_API_KEY").ok(),
            custom_api_key: std::env::var("CUSTOM_LLM_API_KEY").ok(),
            strict_api_base_url: std::env::var("DHI_STRICT_API_BASE_URL").ok(),
        })
    }

    pub fn from_raw_values(raw: RawConfig) -> Self {
        let port = raw.port.and_then(|v| v.parse().ok()).unwrap_or(8081);

        let sentry_dsn = raw.sentry_dsn.filter(|s| !s.is_empty());

        let environment = raw
            .environment
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "local".to_string());

        let data_dir = raw
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".dhi"));

        let mode_default = match raw.mode_default.as_deref() {
            Some("fast") => ModeDefault::Fast,
            _ => ModeDefault::Balanced,
        };

        let max_concurrent_sandboxes = raw
            .max_concurrent_sandboxes
            .and_then(|v| v.parse().ok())
            .unwrap_or(4);

        Config {
            port,
            sentry_dsn,
            environment,
            data_dir,
            mode_default,
            max_concurrent_sandboxes,
            llm: LlmProviderConfig {
                openai_api_key: raw.openai_api_key.filter(|s| !s.is_empty()),
                nvidia_api_key: raw.nvidia_api_key.filter(|s| !s.is_empty()),
                custom_api_key: raw.custom_api_key.filter(|s| !s.is_empty()),
            },
            strict_api_base_url: raw.strict_api_base_url.filter(|s| !s.is_empty()),
        }
    }

    pub fn per_attempt_sandbox_timeout(&self) -> Duration {
        Duration::from_secs(300)
    }
}

/// Raw string values as they would come from env vars. A struct rather
/// than a long parameter list so `from_raw_values` call sites in tests
/// stay readable as fields grow.
#[derive(Default)]
pub struct RawConfig {
    pub port: Option<String>,
    pub sentry_dsn: Option<String>,
    pub environment: Option<String>,
    pub data_dir: Option<String>,
    pub mode_default: Option<String>,
    pub max_concurrent_sandboxes: Option<String>,
    pub openai_api_key: Option<String>,
    pub nvidia_api_key: Option<String>,
    pub custom_api_key: Option<String>,
    pub strict_api_base_url: Option<String>,
}
