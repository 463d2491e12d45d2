//! Sandbox executor (C1): provisions an isolated environment per attempt,
//! runs the command plan, and reports captured output. Two backends
//! implement the same `SandboxProvider`/`SandboxHandle` traits so the
//! orchestrator never branches on `mode` beyond selecting which provider
//! to call.

pub mod backends;
pub mod error;
pub mod executor;
pub mod handle;
pub mod local_host;
pub mod provider;
pub mod types;
pub mod vm_manager;

pub use error::SandboxError;
pub use executor::{CommandPlan, Executor, PlannedCommand, SkipReason, Stage};
pub use handle::{ExecStream, SandboxHandle};
pub use provider::SandboxProvider;
