use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{EmbeddingStrategy, Settings};
use crate::data::{repository, Store};
use crate::error::AppError;
use crate::models::progress::{percent, ProgressSink};
use crate::services::supervised::supervise;
use crate::services::tokenizer::{leading_words, MAX_SEQUENCE_LEN};

pub const CHUNK_WORDS: usize = 300;
pub const CHUNK_OVERLAP: usize = 50;
pub const MIN_CHUNK_CHARS: usize = 10;
/// Room left for the start and end markers.
const SIMPLE_MODE_WORDS: usize = MAX_SEQUENCE_LEN - 2;
const PROGRESS_EVERY: usize = 25;

/// Maps text to a fixed-dimension unit vector.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;

    fn is_ready(&self) -> bool {
        true
    }
}

/// Overlapping word windows, at most `max_chunks` of them.
pub fn chunk_text(text: &str, max_chunks: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let step = CHUNK_WORDS - CHUNK_OVERLAP;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() && chunks.len() < max_chunks.max(1) {
        let end = (start + CHUNK_WORDS).min(words.len());
        chunks.push(words[start..end].join(" "));
        start += step;
    }
    chunks
}

pub fn chunks_for(summary: &str, settings: &Settings) -> Vec<String> {
    match settings.embedding_strategy {
        EmbeddingStrategy::Simple => {
            let head = leading_words(summary, SIMPLE_MODE_WORDS).trim();
            if head.is_empty() {
                Vec::new()
            } else {
                vec![head.to_string()]
            }
        }
        EmbeddingStrategy::Windowed => chunk_text(summary, settings.effective_max_chunks()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmbeddingScanReport {
    pub files: usize,
    pub embedded_files: usize,
    pub vectors: usize,
    pub skipped_chunks: usize,
    pub failed_chunks: usize,
    pub failed_files: usize,
    pub cancelled: bool,
}

/// Embeds every summarized file that has no vectors yet.
pub fn run_embedding_scan(
    store: &Store,
    provider: &dyn EmbeddingProvider,
    settings: &Settings,
    cancel: &AtomicBool,
    progress: &dyn ProgressSink,
) -> Result<EmbeddingScanReport, AppError> {
    if !provider.is_ready() {
        return Err(AppError::NotReady("embedding provider"));
    }

    let pending = store.with_conn(repository::files_needing_embedding)?;
    let mut report = EmbeddingScanReport {
        files: pending.len(),
        ..EmbeddingScanReport::default()
    };
    info!(files = report.files, strategy = ?settings.embedding_strategy, "embedding scan started");

    for (i, file) in pending.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            report.cancelled = true;
            break;
        }

        let mut vectors = Vec::new();
        for (chunk_index, chunk) in chunks_for(&file.summary, settings).iter().enumerate() {
            if chunk.len() < MIN_CHUNK_CHARS {
                report.skipped_chunks += 1;
                continue;
            }
            match supervise(|| provider.embed(chunk)) {
                Ok(vector) => vectors.push((chunk_index, vector)),
                Err(e) => {
                    warn!(file_id = file.file_id, chunk_index, error = %e, "embedding failed");
                    report.failed_chunks += 1;
                }
            }
        }

        if !vectors.is_empty() {
            let saved = store.with_conn_mut(|conn| {
                let tx = conn.transaction()?;
                repository::delete_vectors(&tx, file.file_id)?;
                for (chunk_index, vector) in &vectors {
                    repository::insert_vector(&tx, file.file_id, *chunk_index, vector)?;
                }
                tx.commit()?;
                Ok(vectors.len())
            });
            match saved {
                Ok(count) => {
                    report.vectors += count;
                    report.embedded_files += 1;
                }
                Err(e) => {
                    warn!(file_id = file.file_id, error = %e, "failed to store vectors");
                    report.failed_files += 1;
                }
            }
        }

        let done = i + 1;
        if done % PROGRESS_EVERY == 0 || done == report.files {
            progress.emit("embedding_scan", "Embedding", percent(done, report.files));
        }
    }

    debug!(?report, "embedding scan finished");
    Ok(report)
}

#[cfg(feature = "fastembed")]
pub use local_model::FastEmbedProvider;

#[cfg(feature = "fastembed")]
mod local_model {
    use std::sync::Mutex;

    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    use super::EmbeddingProvider;
    use crate::error::AppError;
    use crate::services::vector_index::normalize_l2;

    pub const EMBEDDING_DIMENSIONS: usize = 384;

    /// all-MiniLM-L6-v2 through fastembed, loaded on first use.
    #[derive(Default)]
    pub struct FastEmbedProvider {
        model: Mutex<Option<TextEmbedding>>,
    }

    impl FastEmbedProvider {
        pub fn new() -> Self {
            Self::default()
        }

        fn with_model<F, T>(&self, f: F) -> Result<T, AppError>
        where
            F: FnOnce(&mut TextEmbedding) -> Result<T, AppError>,
        {
            let mut guard = self
                .model
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if guard.is_none() {
                let model = TextEmbedding::try_new(InitOptions::new(EmbeddingModel::AllMiniLML6V2))
                    .map_err(|e| AppError::Embedding(format!("model init failed: {e}")))?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or(AppError::NotReady("embedding model"))?;
            f(model)
        }
    }

    impl EmbeddingProvider for FastEmbedProvider {
        fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
            self.with_model(|model| {
                let mut results = model
                    .embed(vec![text], None)
                    .map_err(|e| AppError::Embedding(e.to_string()))?;
                let mut vector = results
                    .pop()
                    .ok_or_else(|| AppError::Embedding("no embedding returned".to_string()))?;
                if vector.len() != EMBEDDING_DIMENSIONS {
                    return Err(AppError::Embedding(format!(
                        "expected {EMBEDDING_DIMENSIONS} dimensions, got {}",
                        vector.len()
                    )));
                }
                normalize_l2(&mut vector);
                Ok(vector)
            })
        }

        fn is_ready(&self) -> bool {
            self.with_model(|_| Ok(())).is_ok()
        }
    }
}
