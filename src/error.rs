use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    General(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("{0} not ready")]
    NotReady(&'static str),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl AppError {
    /// Per-item failures that the pipeline stages skip over instead of propagating.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Extraction(_) | Self::Embedding(_) | Self::Timeout(_)
        )
    }
}
