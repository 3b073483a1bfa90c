use std::sync::Arc;

use sluice_api::{ServiceKind, TopicEnvelope};
use sluice_queue::{BasicAckOptions, BasicNackOptions, Delivery};
use sluice_store::StoreClient;

use crate::qi::run_qi;
use crate::state::PipelineState;

/// Terminal outcome for one delivery. Every dequeued message resolves
/// to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Reject { requeue: bool },
}

// ════════════════════════════════════════════════════════════════
//  MessageRouter
// ════════════════════════════════════════════════════════════════

/// Decodes inbound messages and dispatches them by service type.
///
/// Per-delivery state machine:
/// received → parsed → routed → (handled | unsupported) → ack | reject.
pub struct MessageRouter {
    state: Arc<PipelineState>,
    store: Arc<StoreClient>,
}

impl MessageRouter {
    pub fn new(state: Arc<PipelineState>, store: Arc<StoreClient>) -> Self {
        Self { state, store }
    }

    /// Route one message body to its terminal disposition.
    ///
    /// - malformed body → reject without requeue (a poison message can
    ///   never parse on redelivery); counters untouched
    /// - recognized service → handler; a service-level error captured
    ///   inside the handler's own summary still acks — only an
    ///   infrastructure failure to process would requeue
    /// - unsupported service → ack, so unroutable messages are not
    ///   redelivered forever
    pub async fn route(&self, payload: &[u8]) -> Disposition {
        let envelope: TopicEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "malformed message body, rejecting");
                return Disposition::Reject { requeue: false };
            }
        };

        let total = self.state.record_message(&envelope.integration_id).await;
        tracing::info!(
            seq = total,
            topic_id = %envelope.topic_id,
            service = %envelope.service,
            integration = %envelope.integration_id,
            "message received"
        );

        match ServiceKind::parse(&envelope.service) {
            Some(ServiceKind::Qi) => {
                let summary = run_qi(&self.store, &self.state, &envelope.integration_id).await;
                tracing::info!(
                    integration = %summary.integration_id,
                    data_count = ?summary.data_count,
                    last_id = ?summary.last_id,
                    error = ?summary.error,
                    "qi summary"
                );
                Disposition::Ack
            }
            Some(kind) => {
                tracing::warn!(service = %kind, "no handler bound for service, acknowledging");
                Disposition::Ack
            }
            None => {
                tracing::warn!(service = %envelope.service, "unsupported service type, acknowledging");
                Disposition::Ack
            }
        }
    }

    /// Route a broker delivery and settle it against its own acker.
    /// Acker transport errors are logged, never propagated — nothing
    /// escapes the consumer loop body.
    pub async fn handle_delivery(&self, delivery: Delivery) {
        let disposition = self.route(&delivery.data).await;
        let settled = match disposition {
            Disposition::Ack => delivery.ack(BasicAckOptions::default()).await,
            Disposition::Reject { requeue } => {
                delivery
                    .nack(BasicNackOptions {
                        requeue,
                        ..Default::default()
                    })
                    .await
            }
        };
        if let Err(e) = settled {
            tracing::error!(error = %e, "failed to settle delivery with the broker");
        }
    }
}
