use sluice_api::{LinkStatus, QiSummary};
use sluice_store::StoreClient;

use crate::state::PipelineState;

/// Run one QI pass for an integration: full fetch (no cursor) of up to
/// one page of rows, summarized as a count plus the id of the final row.
///
/// Never fails outward. A failed fetch against an established session
/// degrades to a zero-count summary (fail-open; "no data" and "fetch
/// failed" are then only distinguishable in the logs and the failure
/// counter). An unreachable store produces a failure summary instead —
/// zero rows is not a plausible reading of that outcome.
pub async fn run_qi(
    store: &StoreClient,
    state: &PipelineState,
    integration_id: &str,
) -> QiSummary {
    match store.fetch_logs_by_integration(integration_id, None).await {
        Ok(records) => {
            state.set_store_link(LinkStatus::Connected).await;
            let last_id = records.last().map(|record| record.id.clone());
            QiSummary::complete(integration_id, records.len(), last_id)
        }
        Err(e) if e.is_unavailable() => {
            state.set_store_link(LinkStatus::Error).await;
            tracing::error!(integration = %integration_id, error = %e, "log store unreachable");
            QiSummary::failure(integration_id, e.to_string())
        }
        Err(e) => {
            state.record_fetch_failure();
            tracing::warn!(
                integration = %integration_id,
                error = %e,
                "log fetch failed, degrading to empty result"
            );
            QiSummary::complete(integration_id, 0, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_store::StoreConfig;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_store(server: &MockServer) -> StoreClient {
        StoreClient::new(StoreConfig {
            host: "127.0.0.1".into(),
            port: server.address().port(),
            ..StoreConfig::default()
        })
        .unwrap()
    }

    async fn mount_version(server: &MockServer) {
        Mock::given(method("POST"))
            .and(body_string_contains("SELECT version()"))
            .respond_with(ResponseTemplate::new(200).set_body_string("24.3.1.1\n"))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn summary_counts_rows_and_keeps_last_id() {
        let server = MockServer::start().await;
        mount_version(&server).await;
        Mock::given(method("POST"))
            .and(body_string_contains("WHERE integration_id = 'int-1'"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "{\"id\":\"row-1\",\"raw_data\":\"a\"}\n{\"id\":\"row-2\",\"raw_data\":\"b\"}\n",
            ))
            .mount(&server)
            .await;

        let store = test_store(&server);
        let state = PipelineState::new();
        let summary = run_qi(&store, &state, "int-1").await;

        assert_eq!(summary.service, "qi");
        assert_eq!(summary.data_count, Some(2));
        assert_eq!(summary.last_id, Some("row-2".into()));
        assert!(!summary.is_failure());
        assert_eq!(
            state.snapshot().await.store_link,
            sluice_api::LinkStatus::Connected
        );
    }

    #[tokio::test]
    async fn replay_with_unchanged_store_is_idempotent() {
        let server = MockServer::start().await;
        mount_version(&server).await;
        Mock::given(method("POST"))
            .and(body_string_contains("WHERE integration_id"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{\"id\":\"row-9\",\"raw_data\":\"x\"}\n"),
            )
            .mount(&server)
            .await;

        let store = test_store(&server);
        let state = PipelineState::new();
        let first = run_qi(&store, &state, "int-1").await;
        let second = run_qi(&store, &state, "int-1").await;

        assert_eq!(first.data_count, second.data_count);
        assert_eq!(first.last_id, second.last_id);
    }

    #[tokio::test]
    async fn failed_fetch_degrades_to_zero_count() {
        let server = MockServer::start().await;
        mount_version(&server).await;
        Mock::given(method("POST"))
            .and(body_string_contains("WHERE integration_id"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Code: 241. Memory limit"))
            .mount(&server)
            .await;

        let store = test_store(&server);
        store.connect().await.unwrap();
        let state = PipelineState::new();
        let summary = run_qi(&store, &state, "int-1").await;

        assert_eq!(summary.data_count, Some(0));
        assert_eq!(summary.last_id, None);
        assert!(summary.error.is_none());
        assert_eq!(state.snapshot().await.fetch_failures, 1);
    }

    #[tokio::test]
    async fn unreachable_store_yields_failure_summary() {
        let store = StoreClient::new(StoreConfig {
            host: "127.0.0.1".into(),
            port: 1,
            connect_timeout_secs: 1,
            ..StoreConfig::default()
        })
        .unwrap();
        let state = PipelineState::new();
        let summary = run_qi(&store, &state, "int-1").await;

        assert!(summary.is_failure());
        assert!(summary.data_count.is_none());
        assert_eq!(
            state.snapshot().await.store_link,
            sluice_api::LinkStatus::Error
        );
    }
}
