use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ServeArgs, ServerConfig};
use crate::error::ServerError;
use sluice_api::LinkStatus;
use sluice_api_server::AppState;
use sluice_engine::{MessageRouter, PipelineState, spawn_consumer};
use sluice_queue::QueueClient;
use sluice_store::StoreClient;

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("sluice-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    let state = Arc::new(PipelineState::new());

    // --- Log store client ---
    // Only invalid config is fatal here; an unreachable store leaves
    // the process serving HTTP and fetches reconnect on demand.
    let store = Arc::new(StoreClient::new(config.store)?);
    match store.connect().await {
        Ok(()) => state.set_store_link(LinkStatus::Connected).await,
        Err(e) => {
            tracing::error!(error = %e, "log store unavailable at startup");
            state.set_store_link(LinkStatus::Error).await;
        }
    }

    // --- Publisher link ---
    let publisher = match QueueClient::connect(&config.queue).await {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::error!(error = %e, "broker unavailable at startup, publishes will fail");
            None
        }
    };

    // --- Supervised consumer ---
    let (restart_tx, restart_rx) = mpsc::channel(1);
    let router = Arc::new(MessageRouter::new(state.clone(), store.clone()));
    let consumer_handle = spawn_consumer(
        config.queue.clone(),
        router,
        state.clone(),
        restart_rx,
        token.clone(),
    );

    // --- API server ---
    let app_state = AppState {
        state: state.clone(),
        publisher: publisher.clone(),
        store: store.clone(),
        restart: restart_tx,
    };
    let api_port = config.api_port;
    let api_token = token.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = sluice_api_server::run(api_port, app_state, api_token).await {
            tracing::error!(error = %e, "api server error");
        }
    });

    tracing::info!(port = config.api_port, "api server listening");
    tracing::info!("server ready");

    // --- Wait for Ctrl+C ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");

    // Signal all tasks to stop cooperatively
    token.cancel();

    // Drain: wait up to 5s for tasks to finish gracefully
    tokio::time::sleep(Duration::from_secs(5)).await;

    // Abort anything still running
    let handles: Vec<JoinHandle<()>> = vec![consumer_handle, api_handle];
    for h in &handles {
        if !h.is_finished() {
            h.abort();
        }
    }

    // Wait for all tasks to complete
    for h in handles {
        let _ = h.await;
    }

    // The consumer closed its own link; the publisher closes here.
    if let Some(publisher) = publisher {
        publisher.disconnect().await;
    }

    tracing::info!("shutdown complete");
    Ok(())
}
