use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sluice_api::{ConsumerPhase, LinkStatus};
use sluice_queue::{QueueClient, QueueConfig, QueueError};

use crate::router::MessageRouter;
use crate::state::PipelineState;

enum Wake {
    Restart,
    Shutdown,
}

enum LoopEvent {
    StreamEnded(Result<(), QueueError>),
    Restart,
    Shutdown,
}

async fn wait_for_wake(restart_rx: &mut mpsc::Receiver<()>, token: &CancellationToken) -> Wake {
    tokio::select! {
        signal = restart_rx.recv() => match signal {
            Some(()) => Wake::Restart,
            None => Wake::Shutdown,
        },
        _ = token.cancelled() => Wake::Shutdown,
    }
}

// ════════════════════════════════════════════════════════════════
//  Supervised consumer task
// ════════════════════════════════════════════════════════════════

/// Run the consumer under supervision:
/// stopped → connecting → running → (error → stopped) → restarting → …
///
/// A failed connect leaves the process serving HTTP in degraded mode;
/// retry happens only on an explicit restart signal. Cancellation
/// closes the broker link without raising and ends the task.
pub fn spawn_consumer(
    config: QueueConfig,
    router: Arc<MessageRouter>,
    state: Arc<PipelineState>,
    mut restart_rx: mpsc::Receiver<()>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            state.set_consumer_phase(ConsumerPhase::Connecting).await;
            let client = match QueueClient::connect(&config).await {
                Ok(client) => client,
                Err(e) => {
                    tracing::error!(error = %e, "consumer connect failed, waiting for restart");
                    state.set_queue_link(LinkStatus::Error).await;
                    state.set_consumer_phase(ConsumerPhase::Stopped).await;
                    match wait_for_wake(&mut restart_rx, &token).await {
                        Wake::Restart => {
                            tracing::info!("consumer restart requested");
                            state.set_consumer_phase(ConsumerPhase::Restarting).await;
                            state.set_queue_link(LinkStatus::Restarting).await;
                            continue;
                        }
                        Wake::Shutdown => break,
                    }
                }
            };

            state.set_queue_link(LinkStatus::Connected).await;
            state.set_consumer_phase(ConsumerPhase::Running).await;

            let event = tokio::select! {
                result = client.consume(|delivery| router.handle_delivery(delivery)) => {
                    LoopEvent::StreamEnded(result)
                }
                signal = restart_rx.recv() => match signal {
                    Some(()) => LoopEvent::Restart,
                    None => LoopEvent::Shutdown,
                },
                _ = token.cancelled() => LoopEvent::Shutdown,
            };

            client.disconnect().await;

            match event {
                LoopEvent::StreamEnded(result) => {
                    match result {
                        Ok(()) => tracing::warn!("broker closed the delivery stream"),
                        Err(e) => tracing::error!(error = %e, "consume failed"),
                    }
                    state.set_queue_link(LinkStatus::Error).await;
                    state.set_consumer_phase(ConsumerPhase::Stopped).await;
                    match wait_for_wake(&mut restart_rx, &token).await {
                        Wake::Restart => {
                            tracing::info!("consumer restart requested");
                            state.set_consumer_phase(ConsumerPhase::Restarting).await;
                            state.set_queue_link(LinkStatus::Restarting).await;
                        }
                        Wake::Shutdown => break,
                    }
                }
                LoopEvent::Restart => {
                    tracing::info!("consumer restart requested");
                    state.set_consumer_phase(ConsumerPhase::Restarting).await;
                    state.set_queue_link(LinkStatus::Restarting).await;
                }
                LoopEvent::Shutdown => break,
            }
        }

        state.set_queue_link(LinkStatus::Disconnected).await;
        state.set_consumer_phase(ConsumerPhase::Stopped).await;
        tracing::info!("consumer stopped");
    })
}
