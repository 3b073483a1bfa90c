use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sluice_api::{ConsumerPhase, LinkStatus, QiSummary, TopicRequest, TopicResponse};
use sluice_engine::{PipelineState, run_qi};
use sluice_queue::{DEFAULT_PRIORITY, QueueClient};
use sluice_store::StoreClient;

const SERVICE_NAME: &str = "sluice data pipeline";

#[derive(Clone)]
pub struct AppState {
    pub state: Arc<PipelineState>,
    /// Publisher link; `None` when the broker was unreachable at
    /// startup (degraded mode — publishes answer 503).
    pub publisher: Option<Arc<QueueClient>>,
    pub store: Arc<StoreClient>,
    pub restart: mpsc::Sender<()>,
}

/// Pipeline HTTP API server.
pub async fn run(
    port: u16,
    app_state: AppState,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let app = router(app_state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| format!("bind api :{port}: {e}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))?;

    Ok(())
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/publish-topic", post(handle_publish_topic))
        .route("/consumer-status", get(handle_consumer_status))
        .route("/service/qi", post(handle_service_qi))
        .route("/restart-consumer", post(handle_restart_consumer))
        .route("/message-count", get(handle_message_count))
        .with_state(app_state)
}

// --- GET /health ---

#[derive(Serialize)]
struct HealthResponse {
    name: &'static str,
    status: &'static str,
    services: ServicesStatus,
}

#[derive(Serialize)]
struct ServicesStatus {
    rabbitmq: LinkStatus,
    clickhouse: LinkStatus,
}

async fn handle_health(State(app): State<AppState>) -> impl IntoResponse {
    let snapshot = app.state.snapshot().await;
    Json(HealthResponse {
        name: SERVICE_NAME,
        status: "healthy",
        services: ServicesStatus {
            rabbitmq: snapshot.queue_link,
            clickhouse: snapshot.store_link,
        },
    })
}

// --- POST /publish-topic ---

async fn handle_publish_topic(
    State(app): State<AppState>,
    Json(request): Json<TopicRequest>,
) -> Response {
    if request.integration_id.trim().is_empty() || request.service_type.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "integration_id and service_type must be non-empty",
        )
            .into_response();
    }

    let Some(publisher) = &app.publisher else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "message broker link is down",
        )
            .into_response();
    };

    let envelope = request.into_envelope();
    match publisher.publish(&envelope, DEFAULT_PRIORITY).await {
        Ok(()) => {
            tracing::info!(
                topic_id = %envelope.topic_id,
                service = %envelope.service,
                "topic published"
            );
            Json(TopicResponse {
                message: "topic published successfully".into(),
                topic_id: envelope.topic_id,
                status: "published".into(),
                submitted_at: envelope.published_at,
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "publish failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to publish topic: {e}"),
            )
                .into_response()
        }
    }
}

// --- GET /consumer-status ---

#[derive(Serialize)]
struct ConsumerStatusResponse {
    service: &'static str,
    status: SubsystemStatus,
    messages_processed: u64,
    processed_integrations: Vec<String>,
}

#[derive(Serialize)]
struct SubsystemStatus {
    consumer: ConsumerPhase,
    clickhouse: LinkStatus,
    rabbitmq: LinkStatus,
}

async fn handle_consumer_status(State(app): State<AppState>) -> impl IntoResponse {
    let snapshot = app.state.snapshot().await;
    Json(ConsumerStatusResponse {
        service: SERVICE_NAME,
        status: SubsystemStatus {
            consumer: snapshot.consumer,
            clickhouse: snapshot.store_link,
            rabbitmq: snapshot.queue_link,
        },
        messages_processed: snapshot.messages_processed,
        processed_integrations: snapshot.processed_integrations,
    })
}

// --- POST /service/qi — direct trigger, independent of the queue ---

async fn handle_service_qi(
    State(app): State<AppState>,
    Json(request): Json<TopicRequest>,
) -> Response {
    if request.integration_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "integration_id must be non-empty").into_response();
    }

    let summary: QiSummary = run_qi(&app.store, &app.state, &request.integration_id).await;
    if summary.is_failure() {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(summary)).into_response()
    } else {
        Json(summary).into_response()
    }
}

// --- POST /restart-consumer ---

#[derive(Serialize)]
struct RestartResponse {
    message: &'static str,
    status: &'static str,
}

async fn handle_restart_consumer(State(app): State<AppState>) -> Response {
    match app.restart.try_send(()) {
        // Full means a restart is already queued; report the same.
        Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Json(RestartResponse {
            message: "consumer restart triggered",
            status: "restarting",
        })
        .into_response(),
        Err(mpsc::error::TrySendError::Closed(())) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "consumer task is not running",
        )
            .into_response(),
    }
}

// --- GET /message-count (legacy) ---

#[derive(Serialize)]
struct MessageCountResponse {
    messages_processed: u64,
    status: &'static str,
}

async fn handle_message_count(State(app): State<AppState>) -> impl IntoResponse {
    let snapshot = app.state.snapshot().await;
    Json(MessageCountResponse {
        messages_processed: snapshot.messages_processed,
        status: "active",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, header};
    use serde_json::{Value, json};
    use sluice_store::StoreConfig;
    use tower::ServiceExt;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn offline_store() -> Arc<StoreClient> {
        Arc::new(
            StoreClient::new(StoreConfig {
                host: "127.0.0.1".into(),
                port: 1,
                connect_timeout_secs: 1,
                ..StoreConfig::default()
            })
            .unwrap(),
        )
    }

    fn test_state(store: Arc<StoreClient>) -> (AppState, mpsc::Receiver<()>) {
        let (restart_tx, restart_rx) = mpsc::channel(1);
        (
            AppState {
                state: Arc::new(PipelineState::new()),
                publisher: None,
                store,
                restart: restart_tx,
            },
            restart_rx,
        )
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_service_links() {
        let (app_state, _rx) = test_state(offline_store());
        let (status, body) = get_json(router(app_state), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], SERVICE_NAME);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["services"]["rabbitmq"], "disconnected");
        assert_eq!(body["services"]["clickhouse"], "disconnected");
    }

    #[tokio::test]
    async fn message_count_shape() {
        let (app_state, _rx) = test_state(offline_store());
        let (status, body) = get_json(router(app_state), "/message-count").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages_processed"], 0);
        assert_eq!(body["status"], "active");
    }

    #[tokio::test]
    async fn consumer_status_shape() {
        let (app_state, _rx) = test_state(offline_store());
        app_state.state.record_message("int-1").await;
        let (status, body) = get_json(router(app_state), "/consumer-status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], SERVICE_NAME);
        assert_eq!(body["status"]["consumer"], "stopped");
        assert_eq!(body["status"]["rabbitmq"], "disconnected");
        assert_eq!(body["status"]["clickhouse"], "disconnected");
        assert_eq!(body["messages_processed"], 1);
        assert_eq!(body["processed_integrations"][0], "int-1");
    }

    #[tokio::test]
    async fn publish_rejects_empty_integration_id() {
        let (app_state, _rx) = test_state(offline_store());
        let response = router(app_state)
            .oneshot(post_json(
                "/publish-topic",
                json!({"integration_id": "  ", "service_type": "qi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn publish_without_broker_link_is_unavailable() {
        let (app_state, _rx) = test_state(offline_store());
        let response = router(app_state)
            .oneshot(post_json(
                "/publish-topic",
                json!({"integration_id": "int-1", "service_type": "qi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn service_qi_returns_summary_synchronously() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("SELECT version()"))
            .respond_with(ResponseTemplate::new(200).set_body_string("24.3.1.1\n"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("WHERE integration_id = 'int-1'"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{\"id\":\"row-1\",\"raw_data\":\"a\"}\n"),
            )
            .mount(&server)
            .await;

        let store = Arc::new(
            StoreClient::new(StoreConfig {
                host: "127.0.0.1".into(),
                port: server.address().port(),
                ..StoreConfig::default()
            })
            .unwrap(),
        );
        let (app_state, _rx) = test_state(store);

        let response = router(app_state)
            .oneshot(post_json(
                "/service/qi",
                json!({"integration_id": "int-1", "service_type": "qi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["service"], "qi");
        assert_eq!(body["data_count"], 1);
        assert_eq!(body["last_id"], "row-1");
    }

    #[tokio::test]
    async fn service_qi_surfaces_unreachable_store_as_500() {
        let (app_state, _rx) = test_state(offline_store());
        let response = router(app_state)
            .oneshot(post_json(
                "/service/qi",
                json!({"integration_id": "int-1", "service_type": "qi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn restart_signals_the_supervisor() {
        let (app_state, mut restart_rx) = test_state(offline_store());
        let response = router(app_state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/restart-consumer")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "restarting");
        assert!(restart_rx.try_recv().is_ok());
    }
}
