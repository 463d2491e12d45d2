use std::io;

/// Errors surfaced by C3 (sandbox provisioning and command execution).
///
/// Backends map their internal errors into these variants; `classify_result`
/// (C5) only ever sees the resulting `ExecutedCommand`, never this type, so
/// a new variant here does not by itself change a `FailureClass`.
/// `Unsupported` is the expected return for capability-gated operations a
/// backend does not implement (e.g. checkpoints on the balanced backend).
#[derive(thiserror::Error, Debug)]
pub enum SandboxError {
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("sandbox not found: {0}")]
    NotFound(String),

    #[error("provision failed: {0}")]
    Provision(String),

    #[error("exec failed: {0}")]
    Exec(String),

    #[error("command failed: code={code:?}, stderr={stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },

    #[error("timeout")]
    Timeout,

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("serialization: {0}")]
    Serde(String),

    #[error("backend error: {0}")]
    Backend(String),
}
