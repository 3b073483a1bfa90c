use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ════════════════════════════════════════════════════════════════
//  Service types
// ════════════════════════════════════════════════════════════════

/// Closed set of service types the consumer knows how to route.
///
/// Inbound envelopes carry the service as a free string; routing goes
/// through [`ServiceKind::parse`] so an unknown string lands in an
/// explicit unsupported arm instead of silently matching nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Qi,
    Analytics,
    Export,
}

impl ServiceKind {
    /// Map a declared service string onto the closed set.
    /// `None` = unsupported service type.
    pub fn parse(s: &str) -> Option<ServiceKind> {
        match s {
            "qi" => Some(ServiceKind::Qi),
            "analytics" => Some(ServiceKind::Analytics),
            "export" => Some(ServiceKind::Export),
            _ => None,
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceKind::Qi => write!(f, "qi"),
            ServiceKind::Analytics => write!(f, "analytics"),
            ServiceKind::Export => write!(f, "export"),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Topic envelope
// ════════════════════════════════════════════════════════════════

/// Canonical published message wrapping one topic/service request.
///
/// Immutable once published; identity = `topic_id`. JSON is the wire
/// encoding both toward the broker and back out of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicEnvelope {
    /// Publisher-assigned correlation id (uuid v4).
    pub topic_id: String,
    pub integration_id: String,
    /// Declared service type; routed via [`ServiceKind::parse`].
    pub service: String,
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub published_at: DateTime<Utc>,
}

/// Inbound publish request. Accepts the legacy `service` field name
/// alongside the current `service_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRequest {
    pub integration_id: String,
    #[serde(alias = "service")]
    pub service_type: String,
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl TopicRequest {
    /// Seal the request into an envelope, assigning a fresh topic id
    /// and publish timestamp.
    pub fn into_envelope(self) -> TopicEnvelope {
        TopicEnvelope {
            topic_id: Uuid::new_v4().to_string(),
            integration_id: self.integration_id,
            service: self.service_type,
            date_from: self.date_from,
            date_to: self.date_to,
            parameters: self.parameters,
            published_at: Utc::now(),
        }
    }
}

/// Response to a successful publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicResponse {
    pub message: String,
    pub topic_id: String,
    pub status: String,
    pub submitted_at: DateTime<Utc>,
}

// ════════════════════════════════════════════════════════════════
//  Log store rows
// ════════════════════════════════════════════════════════════════

/// One row from the log table. Read-only to this system;
/// `id` is monotonically orderable within an integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: String,
    pub raw_data: String,
}

// ════════════════════════════════════════════════════════════════
//  QI summary
// ════════════════════════════════════════════════════════════════

/// Outcome of one QI invocation. A failure carries `error` instead of
/// `data_count`/`last_id`; the two shapes never mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QiSummary {
    pub integration_id: String,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl QiSummary {
    pub fn complete(integration_id: &str, data_count: usize, last_id: Option<String>) -> Self {
        Self {
            integration_id: integration_id.to_string(),
            service: ServiceKind::Qi.to_string(),
            data_count: Some(data_count),
            last_id,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(integration_id: &str, error: impl Into<String>) -> Self {
        Self {
            integration_id: integration_id.to_string(),
            service: ServiceKind::Qi.to_string(),
            data_count: None,
            last_id: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

// ════════════════════════════════════════════════════════════════
//  Subsystem status
// ════════════════════════════════════════════════════════════════

/// Connection status of one external link (broker, log store).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Disconnected,
    Connected,
    Error,
    Restarting,
}

/// Lifecycle phase of the supervised consumer task:
/// stopped → connecting → running → (error → stopped) → restarting → connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerPhase {
    Stopped,
    Connecting,
    Running,
    Restarting,
}
