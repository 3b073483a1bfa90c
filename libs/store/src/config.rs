use std::path::PathBuf;

use serde::Deserialize;

/// Log store connection settings.
///
/// Cloud deployments expose the HTTPS interface on 8443; when that port
/// is configured and unreachable, connect falls back once to the native
/// port 9440 before surfacing the original error.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub tls: bool,
    /// TLS certificate verification; disable only against self-signed
    /// test deployments.
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_table")]
    pub table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            username: default_username(),
            password: String::new(),
            tls: false,
            verify_tls: default_verify_tls(),
            ca_cert: None,
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            table: default_table(),
        }
    }
}

fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    8123
}
fn default_database() -> String {
    "default".into()
}
fn default_username() -> String {
    "default".into()
}
fn default_verify_tls() -> bool {
    true
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_read_timeout() -> u64 {
    300
}
fn default_table() -> String {
    "logs".into()
}
