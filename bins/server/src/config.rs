use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

pub use sluice_queue::QueueConfig;
pub use sluice_store::StoreConfig;

#[derive(Parser)]
#[command(name = "sluice-server", about = "Message-driven log pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline server
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "sluice.toml", env = "CONFIG_PATH")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_api_port() -> u16 {
    8000
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, crate::error::ServerError> {
        let content = std::fs::read_to_string(path).map_err(|e| crate::error::ServerError::Config {
            context: "read",
            detail: format!("'{path}': {e}"),
        })?;
        toml::from_str(&content).map_err(|e| crate::error::ServerError::Config {
            context: "parse",
            detail: format!("'{path}': {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.api_port, 8000);
        assert_eq!(config.queue.queue, "pipeline_queue");
        assert_eq!(config.store.port, 8123);
        assert_eq!(config.store.table, "logs");
    }

    #[test]
    fn sections_override_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            api_port = 9000

            [queue]
            url = "amqp://broker:5672/"
            exchange = "pipeline_exchange"

            [store]
            host = "ch.internal"
            port = 8443
            tls = true
            "#,
        )
        .unwrap();
        assert_eq!(config.api_port, 9000);
        assert_eq!(config.queue.exchange, "pipeline_exchange");
        assert_eq!(config.queue.publish_routing_key(), "pipeline");
        assert!(config.store.tls);
        assert_eq!(config.store.port, 8443);
    }
}
