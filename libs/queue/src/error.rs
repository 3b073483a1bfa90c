#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("broker connect ({context}): {source}")]
    Connect {
        context: &'static str,
        source: lapin::Error,
    },

    #[error("publish: {0}")]
    Publish(lapin::Error),

    #[error("encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("consume: {0}")]
    Consume(lapin::Error),
}
