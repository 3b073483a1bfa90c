pub mod config;
pub mod error;

use std::time::Duration;

use tokio::sync::RwLock;

use sluice_api::LogRecord;

pub use config::StoreConfig;
pub use error::StoreError;

/// Hard cap on rows returned by a single fetch.
pub const FETCH_PAGE_SIZE: usize = 100_000;

/// Cloud HTTPS port whose failure triggers the one-shot fallback.
const CLOUD_HTTPS_PORT: u16 = 8443;
/// Cloud native protocol port tried when 8443 is unreachable.
const CLOUD_NATIVE_PORT: u16 = 9440;

/// Escape a string value for safe use inside a single-quoted literal.
/// Prevents SQL injection by escaping `\` and `'`.
fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Validate a table/column identifier: `^[a-zA-Z_][a-zA-Z0-9_.]*$`.
fn validate_identifier(name: &str, context: &'static str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(StoreError::Config {
            context,
            detail: "identifier is empty".into(),
        });
    };
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(StoreError::Config {
            context,
            detail: format!("invalid identifier '{name}'"),
        });
    }
    for ch in chars {
        if !ch.is_ascii_alphanumeric() && ch != '_' && ch != '.' {
            return Err(StoreError::Config {
                context,
                detail: format!("invalid character '{ch}' in identifier '{name}'"),
            });
        }
    }
    Ok(())
}

/// Range query for one integration's rows, bounded below (exclusive)
/// by `last_id` when one is given. Ordering and the page cap are fixed.
fn fetch_sql(table: &str, integration_id: &str, last_id: Option<&str>) -> String {
    let mut sql = format!(
        "SELECT id, raw_data FROM {table} WHERE integration_id = '{}'",
        escape_string(integration_id),
    );
    if let Some(last_id) = last_id.filter(|s| !s.is_empty()) {
        sql.push_str(&format!(" AND id > '{}'", escape_string(last_id)));
    }
    sql.push_str(&format!(
        " ORDER BY timestamp ASC LIMIT {FETCH_PAGE_SIZE} FORMAT JSONEachRow"
    ));
    sql
}

// ════════════════════════════════════════════════════════════════
//  StoreClient
// ════════════════════════════════════════════════════════════════

/// Log store client over the HTTP interface.
///
/// One shared session per process, reused across fetches; callers must
/// not share it between concurrent handlers (the single-consumer model
/// guarantees that here). A fetch on a disconnected client reconnects
/// transparently first.
pub struct StoreClient {
    http: reqwest::Client,
    config: StoreConfig,
    /// Base URL resolved by a successful liveness probe; `None` until
    /// the first connect.
    base_url: RwLock<Option<String>>,
}

impl StoreClient {
    /// Build the HTTP client from config. Does not touch the network.
    pub fn new(config: StoreConfig) -> Result<StoreClient, StoreError> {
        validate_identifier(&config.table, "table")?;

        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs));

        if config.tls && !config.verify_tls {
            tracing::warn!("TLS certificate verification is disabled for the log store");
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(path) = &config.ca_cert {
            let pem = std::fs::read(path).map_err(|e| StoreError::Config {
                context: "ca certificate",
                detail: format!("'{}': {e}", path.display()),
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| StoreError::Config {
                context: "ca certificate",
                detail: e.to_string(),
            })?;
            builder = builder.add_root_certificate(cert);
        }

        let http = builder.build().map_err(|e| StoreError::Config {
            context: "http client",
            detail: e.to_string(),
        })?;

        Ok(StoreClient {
            http,
            config,
            base_url: RwLock::new(None),
        })
    }

    fn url_for_port(&self, port: u16) -> String {
        let scheme = if self.config.tls { "https" } else { "http" };
        format!("{scheme}://{}:{port}", self.config.host)
    }

    /// Probe liveness and pin the session's base URL.
    ///
    /// When the primary attempt fails and the configured port is the
    /// cloud HTTPS port, the native port is tried exactly once; if that
    /// also fails, the original error surfaces.
    pub async fn connect(&self) -> Result<(), StoreError> {
        let primary = self.url_for_port(self.config.port);
        let primary_err = match self.probe(&primary).await {
            Ok(version) => {
                tracing::info!(url = %primary, version = %version, "connected to log store");
                *self.base_url.write().await = Some(primary);
                return Ok(());
            }
            Err(e) => e,
        };

        if self.config.port == CLOUD_HTTPS_PORT {
            let fallback = self.url_for_port(CLOUD_NATIVE_PORT);
            tracing::warn!(
                error = %primary_err,
                url = %fallback,
                "primary store connection failed, trying native port"
            );
            if let Ok(version) = self.probe(&fallback).await {
                tracing::info!(url = %fallback, version = %version, "connected to log store");
                *self.base_url.write().await = Some(fallback);
                return Ok(());
            }
        }

        tracing::error!(
            error = %primary_err,
            host = %self.config.host,
            "log store connect failed; check the host, credentials, \
             verify_tls setting and the deployment's IP allowlist"
        );
        Err(primary_err)
    }

    async fn probe(&self, base_url: &str) -> Result<String, StoreError> {
        let version = self
            .exec(base_url, "SELECT version()")
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;
        Ok(version.trim().to_string())
    }

    async fn exec(&self, base_url: &str, sql: &str) -> Result<String, StoreError> {
        let response = self
            .http
            .post(base_url)
            .query(&[
                ("user", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
                ("database", self.config.database.as_str()),
            ])
            .body(sql.to_owned())
            .send()
            .await
            .map_err(|e| StoreError::Query(format!("request: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Query(format!("read: {e}")))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(StoreError::Query(body))
        }
    }

    /// Fetch one page of rows for an integration, rows with
    /// `id > last_id` only when a cursor is given, ordered by the
    /// timestamp column ascending, capped at [`FETCH_PAGE_SIZE`].
    ///
    /// Reconnects first when no session is established. Failures are
    /// returned as typed errors; the fail-open degrade to an empty page
    /// is the caller's decision, not this client's.
    pub async fn fetch_logs_by_integration(
        &self,
        integration_id: &str,
        last_id: Option<&str>,
    ) -> Result<Vec<LogRecord>, StoreError> {
        let base_url = {
            let cached = self.base_url.read().await.clone();
            match cached {
                Some(url) => url,
                None => {
                    tracing::info!("log store session not established, connecting");
                    self.connect().await?;
                    self.base_url
                        .read()
                        .await
                        .clone()
                        .ok_or_else(|| StoreError::Connect("no session".into()))?
                }
            }
        };

        let sql = fetch_sql(&self.config.table, integration_id, last_id);
        let body = self.exec(&base_url, &sql).await?;

        let mut records = Vec::new();
        for line in body.lines() {
            if line.is_empty() {
                continue;
            }
            let record: LogRecord = serde_json::from_str(line)?;
            records.push(record);
        }
        tracing::debug!(
            integration = %integration_id,
            rows = records.len(),
            "fetched log page"
        );
        Ok(records)
    }
}
