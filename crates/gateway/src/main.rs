mod agent_loop;
mod auth;
mod error;
mod extraction;
mod http;
mod prompt;
mod processor;
mod state;
mod trace;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use cortex_domain::Config;
use cortex_llm::LlmClient;
use cortex_memory::MemoryClient;
use cortex_skills::SkillRegistry;
use cortex_store::Store;
use tracing_subscriber::EnvFilter;

use crate::processor::Processor;
use crate::state::AppState;

const DEFAULT_CONFIG_PATH: &str = "cortex.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cortex=info,tower_http=info")),
        )
        .init();

    let config_path = std::env::var("CORTEX_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(std::path::Path::new(&config_path));
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        db_path = %config.store.db_path.display(),
        model = %config.llm.model,
        extraction_enabled = config.llm.extraction_model.is_some(),
        "starting cortex-gateway",
    );

    let store = Store::open(&config.store.db_path)?;
    let registry = SkillRegistry::empty();
    let llm = LlmClient::new();
    let memory = MemoryClient::new();

    let state = AppState::new(
        Arc::new(config.clone()),
        Arc::new(store),
        Arc::new(registry),
        Arc::new(llm),
        Arc::new(memory),
    );

    let processor = Processor::new(state.clone());
    let stop_handle = processor.stop_handle();
    let processor_task = tokio::spawn(processor.run());

    let app = http::router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    stop_handle.store(true, Ordering::Relaxed);
    // Extraction tasks are intentionally not awaited here: they are
    // fire-and-forget per spec, and the cursor increment that gates
    // them already committed before they were spawned. The processor
    // itself gets a bounded grace period to finish its current message.
    const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(10);
    if tokio::time::timeout(SHUTDOWN_GRACE, processor_task).await.is_err() {
        tracing::warn!("processor did not stop within the shutdown grace period");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
