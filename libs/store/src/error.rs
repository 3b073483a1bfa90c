#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store config ({context}): {detail}")]
    Config {
        context: &'static str,
        detail: String,
    },

    #[error("store connect: {0}")]
    Connect(String),

    #[error("store query: {0}")]
    Query(String),

    #[error("store response parse: {0}")]
    Parse(#[from] serde_json::Error),
}

impl StoreError {
    /// True when the store could not be reached at all, as opposed to a
    /// failed query against an established session.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Config { .. } | StoreError::Connect(_))
    }
}
