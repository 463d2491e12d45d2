pub mod handlers;
pub mod middleware;
mod routes;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tokio::sync::{broadcast, Semaphore};

use crate::attestation::{LedgerWriter, ManifestStore};
use crate::llm::LlmGateway;
use crate::model::LlmProvider;
use crate::orchestrator::{Orchestrator, StateTransitionEvent};
use crate::sandbox::executor::Executor;

#[derive(Clone)]
pub struct AppState {
    pub http_client: Arc<reqwest::Client>,
    pub data_dir: PathBuf,
    pub orchestrator: Arc<Orchestrator>,
    pub llm_gateways: Arc<HashMap<LlmProvider, Arc<dyn LlmGateway>>>,
    pub sandbox_semaphore: Arc<Semaphore>,
}

impl AppState {
    pub fn llm_gateway(&self, provider: LlmProvider) -> Option<Arc<dyn LlmGateway>> {
        self.llm_gateways.get(&provider).cloned()
    }
}

pub fn build_orchestrator(
    executor: Arc<Executor>,
    ledger: LedgerWriter,
    manifest_store: Arc<ManifestStore>,
    ledger_db_path: PathBuf,
) -> Orchestrator {
    let (events_tx, _rx) = broadcast::channel::<StateTransitionEvent>(256);
    Orchestrator {
        executor,
        ledger,
        manifest_store,
        events_tx,
        ledger_db_path,
    }
}

pub fn create_app(state: AppState) -> Router {
    routes::build_router(state)
}
