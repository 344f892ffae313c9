pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod models;
pub mod presentation;
pub mod services;
pub mod state;

pub use config::{EmbeddingStrategy, Settings};
pub use error::AppError;
pub use models::progress::{ChannelProgress, NoopProgress, ProgressEvent, ProgressSink};
pub use models::search::{MatchSource, SearchResult};
pub use services::embedding_service::EmbeddingProvider;
pub use services::extraction_service::ImageTextExtractor;
pub use services::icon_service::IconExtractor;
pub use services::pipeline_service::{Collaborators, PipelineReport, Stage, StageOutcome};
pub use services::search_service::{MemoryUsageCounter, UsageCounter};
pub use state::Engine;

#[cfg(feature = "fastembed")]
pub use services::embedding_service::FastEmbedProvider;

/// Opens the engine on the per-user database.
pub fn open_default(collaborators: Collaborators) -> Result<Engine, AppError> {
    let db_path = config::database_path()?;
    Engine::open(&db_path, collaborators)
}
