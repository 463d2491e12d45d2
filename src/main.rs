use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::Request;
use clap::Parser;
use dotenvy::dotenv;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use dhi::api::{self, build_orchestrator, AppState};
use dhi::attestation::{spawn_ledger, ManifestStore};
use dhi::config;
use dhi::llm::{CustomGateway, LlmGateway, NvidiaGateway, OpenAiGateway};
use dhi::model::LlmProvider;
use dhi::sandbox::backends::{BalancedProvider, StrictProvider};
use dhi::sandbox::executor::Executor;
use dhi::sandbox::provider::SandboxProvider;
use dhi::sandbox::types::{BalancedConfig, StrictConfig};

#[derive(Parser)]
#[command(name = "dhi", about = "cognitive middleware between an IDE and a frontier LLM")]
enum Cli {
    /// Start the HTTP server (default when no subcommand is given)
    #[command(alias = "run")]
    Serve,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    // No subcommand given still runs the server — matches the single
    // meaningful mode this binary has today.
    let args: Vec<String> = std::env::args().collect();
    let _cli = if args.len() <= 1 { Cli::Serve } else { Cli::parse() };

    run_server().await
}

async fn run_server() -> Result<(), Box<dyn Error>> {
    let config = config::Config::from_env();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dhi=info,tower_http=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_tree::HierarchicalLayer::new(2).with_targets(true).with_bracketed_fields(false))
        .with(sentry::integrations::tracing::layer().event_filter(|metadata| match *metadata.level() {
            tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
            tracing::Level::WARN | tracing::Level::INFO => sentry::integrations::tracing::EventFilter::Breadcrumb,
            _ => sentry::integrations::tracing::EventFilter::Ignore,
        }))
        .init();

    let _guard = sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            send_default_pii: true,
            traces_sample_rate: 0.2,
            enable_logs: true,
            ..Default::default()
        },
    ));

    let http_client = Arc::new(
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?,
    );

    std::fs::create_dir_all(&config.data_dir).context("failed to create data dir")?;
    let artifacts_root = config.data_dir.join("artifacts");
    let manifests_root = config.data_dir.join("manifests");
    let ledger_path = config.data_dir.join("ledger.sqlite3");

    let balanced = Arc::new(
        BalancedProvider::new(BalancedConfig {
            root_dir: config.data_dir.join("sandboxes"),
            ..BalancedConfig::default()
        })
        .context("failed to initialize balanced sandbox provider")?,
    ) as Arc<dyn SandboxProvider>;

    // `mode=strict` only becomes available when a VM manager is
    // configured — requests asking for it fail closed instead of
    // silently downgrading to the balanced backend.
    let strict: Option<Arc<dyn SandboxProvider>> = config.strict_api_base_url.clone().map(|api_base_url| {
        tracing::info!(api_base_url = %api_base_url, "initializing strict sandbox provider");
        Arc::new(StrictProvider::new(StrictConfig {
            api_base_url,
            default_tier: "nano".into(),
            request_timeout: Duration::from_secs(30),
        })) as Arc<dyn SandboxProvider>
    });

    let executor = Arc::new(Executor::new(balanced, strict, artifacts_root));

    let mut llm_gateways: HashMap<LlmProvider, Arc<dyn LlmGateway>> = HashMap::new();
    if let Some(key) = config.llm.openai_api_key.clone() {
        llm_gateways.insert(
            LlmProvider::OpenAi,
            Arc::new(OpenAiGateway::new((*http_client).clone(), key)) as Arc<dyn LlmGateway>,
        );
    }
    if let Some(key) = config.llm.nvidia_api_key.clone() {
        llm_gateways.insert(
            LlmProvider::Nvidia,
            Arc::new(NvidiaGateway::new((*http_client).clone(), key)) as Arc<dyn LlmGateway>,
        );
    }
    llm_gateways.insert(
        LlmProvider::Custom,
        Arc::new(CustomGateway::new((*http_client).clone(), config.llm.custom_api_key.clone())) as Arc<dyn LlmGateway>,
    );

    let (ledger, _ledger_task) = spawn_ledger(&ledger_path).context("failed to start ledger writer")?;
    let manifest_store = Arc::new(ManifestStore::new(manifests_root));

    let orchestrator = Arc::new(build_orchestrator(executor, ledger, manifest_store, ledger_path.clone()));

    let app_state = AppState {
        http_client,
        data_dir: config.data_dir.clone(),
        orchestrator,
        llm_gateways: Arc::new(llm_gateways),
        sandbox_semaphore: Arc::new(Semaphore::new(config.max_concurrent_sandboxes)),
    };

    let app = api::create_app(app_state)
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(NewSentryLayer::<Request<Body>>::new_from_top());

    let port = config.port;
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
