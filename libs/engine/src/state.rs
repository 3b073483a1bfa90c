use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::RwLock;

use sluice_api::{ConsumerPhase, LinkStatus};

/// Process-wide pipeline state, one instance, explicitly owned.
///
/// Mutated only by the single consumer task and by restart operations;
/// the prefetch-1 consumer model means there is never more than one
/// writer for the counters. Readers take a point-in-time [`snapshot`]
/// for reporting.
///
/// [`snapshot`]: PipelineState::snapshot
pub struct PipelineState {
    messages_processed: AtomicU64,
    fetch_failures: AtomicU64,
    /// Grows monotonically for the lifetime of the process.
    processed_integrations: RwLock<HashSet<String>>,
    consumer: RwLock<ConsumerPhase>,
    queue_link: RwLock<LinkStatus>,
    store_link: RwLock<LinkStatus>,
}

/// Point-in-time copy of the pipeline state for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub messages_processed: u64,
    pub fetch_failures: u64,
    pub processed_integrations: Vec<String>,
    pub consumer: ConsumerPhase,
    pub queue_link: LinkStatus,
    pub store_link: LinkStatus,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            messages_processed: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            processed_integrations: RwLock::new(HashSet::new()),
            consumer: RwLock::new(ConsumerPhase::Stopped),
            queue_link: RwLock::new(LinkStatus::Disconnected),
            store_link: RwLock::new(LinkStatus::Disconnected),
        }
    }

    /// Count one parsed message and record its integration, when
    /// present. Returns the new message total.
    pub async fn record_message(&self, integration_id: &str) -> u64 {
        let total = self.messages_processed.fetch_add(1, Ordering::Relaxed) + 1;
        if !integration_id.is_empty() {
            let mut set = self.processed_integrations.write().await;
            set.insert(integration_id.to_string());
        }
        total
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn set_consumer_phase(&self, phase: ConsumerPhase) {
        *self.consumer.write().await = phase;
    }

    pub async fn set_queue_link(&self, status: LinkStatus) {
        *self.queue_link.write().await = status;
    }

    pub async fn set_store_link(&self, status: LinkStatus) {
        *self.store_link.write().await = status;
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        let mut processed_integrations: Vec<String> = self
            .processed_integrations
            .read()
            .await
            .iter()
            .cloned()
            .collect();
        processed_integrations.sort();

        StateSnapshot {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            processed_integrations,
            consumer: *self.consumer.read().await,
            queue_link: *self.queue_link.read().await,
            store_link: *self.store_link.read().await,
        }
    }
}
