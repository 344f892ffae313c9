use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::data::{repository, Store};
use crate::error::AppError;
use crate::models::search::{MatchSource, SearchResult, TimeWindow};
use crate::services::date_parser::DateQuery;
use crate::services::embedding_service::EmbeddingProvider;
use crate::services::vector_index::VectorIndex;

pub const KEYWORD_LIMIT: usize = 50;
pub const MAX_RESULTS: usize = 15;
pub const KEYWORD_WEIGHT: f32 = 1.2;
pub const VECTOR_WEIGHT: f32 = 1.0;
pub const DOUBLE_MATCH_BONUS: f32 = 0.5;
pub const USAGE_BOOST_PER_OPEN: f32 = 0.5;
pub const LAUNCHABLE_BOOST: f32 = 10.0;
pub const PREFIX_BOOST: f32 = 2.0;
const SEMANTIC_SNIPPET_BYTES: usize = 200;
const LAUNCHABLE_EXTENSIONS: [&str; 2] = [".lnk", ".exe"];

/// Prefix-match FTS5 expression: every alphanumeric run becomes `"term"*`, joined with AND.
/// Quoting keeps words such as `AND` or `NOT` from being read as operators.
pub fn build_fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\"*"))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" AND "))
    }
}

pub fn keyword_search(
    store: &Store,
    text: &str,
    window: TimeWindow,
) -> Result<Vec<SearchResult>, AppError> {
    let Some(fts_query) = build_fts_query(text) else {
        return Ok(Vec::new());
    };
    store.with_conn(|conn| repository::search_fts(conn, &fts_query, window, KEYWORD_LIMIT))
}

fn semantic_snippet(summary: &str) -> String {
    if summary.len() <= SEMANTIC_SNIPPET_BYTES {
        return summary.to_string();
    }
    let mut end = SEMANTIC_SNIPPET_BYTES;
    while !summary.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &summary[..end])
}

/// Nearest files by embedding. The window is applied after the top-k cut.
pub fn semantic_search(
    store: &Store,
    index: &VectorIndex,
    provider: &dyn EmbeddingProvider,
    text: &str,
    window: TimeWindow,
) -> Result<Vec<SearchResult>, AppError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    if index.is_empty() || !provider.is_ready() {
        return Err(AppError::NotReady("vector index"));
    }

    let query = provider.embed(text)?;
    let matches = index.search(&query);

    store.with_conn(|conn| {
        let mut results = Vec::with_capacity(matches.len());
        for m in matches {
            let Some(record) = repository::get_by_id(conn, m.file_id)? else {
                continue;
            };
            if !window.contains(record.modified_time) {
                continue;
            }
            results.push(SearchResult {
                snippet: semantic_snippet(record.summary.as_deref().unwrap_or_default()),
                path: record.path,
                file_name: record.filename,
                extension: record.extension,
                score: m.score,
                icon_data: record.icon_data,
                match_source: MatchSource::Semantic,
            });
        }
        Ok(results)
    })
}

/// Combines both result lists keyed by path, in first-seen order.
pub fn merge_results(keyword: Vec<SearchResult>, semantic: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut merged: Vec<SearchResult> = Vec::with_capacity(keyword.len() + semantic.len());
    let mut by_path: HashMap<String, usize> = HashMap::new();

    for mut result in keyword {
        if by_path.contains_key(&result.path) {
            continue;
        }
        result.score *= KEYWORD_WEIGHT;
        by_path.insert(result.path.clone(), merged.len());
        merged.push(result);
    }

    for result in semantic {
        match by_path.get(&result.path) {
            Some(&i) => {
                let existing = &mut merged[i];
                existing.score += result.score * VECTOR_WEIGHT + DOUBLE_MATCH_BONUS;
                if result.snippet.len() > existing.snippet.len() {
                    existing.snippet = result.snippet;
                }
                if existing.icon_data.is_none() {
                    existing.icon_data = result.icon_data;
                }
                existing.match_source = MatchSource::Both;
            }
            None => {
                let mut result = result;
                result.score *= VECTOR_WEIGHT;
                by_path.insert(result.path.clone(), merged.len());
                merged.push(result);
            }
        }
    }

    merged
}

fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn is_launchable(path: &str) -> bool {
    let lower = path.to_lowercase();
    LAUNCHABLE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Usage, launchable and name-prefix boosts in that order, then a stable sort and cut.
pub fn apply_boosts(
    mut results: Vec<SearchResult>,
    query_text: &str,
    usage: &HashMap<String, u64>,
) -> Vec<SearchResult> {
    let needle = query_text.trim().to_lowercase();

    for result in &mut results {
        if let Some(&count) = usage.get(&result.path) {
            result.score *= 1.0 + USAGE_BOOST_PER_OPEN * count as f32;
        }
        if is_launchable(&result.path) {
            result.score *= LAUNCHABLE_BOOST;
        }
        if !needle.is_empty() && base_name(&result.path).to_lowercase().starts_with(&needle) {
            result.score *= PREFIX_BOOST;
        }
    }

    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(MAX_RESULTS);
    results
}

/// Open counts per path, read as a ranking input.
pub trait UsageCounter: Send + Sync {
    fn increment(&self, path: &str) -> Result<(), AppError>;
    fn snapshot(&self) -> HashMap<String, u64>;
}

#[derive(Debug, Default)]
pub struct MemoryUsageCounter {
    counts: Mutex<HashMap<String, u64>>,
}

impl MemoryUsageCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageCounter for MemoryUsageCounter {
    fn increment(&self, path: &str) -> Result<(), AppError> {
        let mut counts = self
            .counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *counts.entry(path.to_string()).or_default() += 1;
        Ok(())
    }

    fn snapshot(&self) -> HashMap<String, u64> {
        self.counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Counts persisted in the `usage_counts` table.
pub struct StoreUsageCounter {
    store: Arc<Store>,
}

impl StoreUsageCounter {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl UsageCounter for StoreUsageCounter {
    fn increment(&self, path: &str) -> Result<(), AppError> {
        self.store
            .with_conn(|conn| repository::increment_usage(conn, path))
    }

    fn snapshot(&self) -> HashMap<String, u64> {
        match self.store.with_conn(repository::usage_snapshot) {
            Ok(counts) => counts,
            Err(e) => {
                warn!(error = %e, "failed to read usage counts");
                HashMap::new()
            }
        }
    }
}

/// Everything a hybrid query reads from.
#[derive(Clone)]
pub struct HybridSearcher {
    pub store: Arc<Store>,
    pub index: Arc<VectorIndex>,
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl HybridSearcher {
    /// Keyword and semantic branches run concurrently; a failed branch contributes nothing.
    pub async fn search(&self, query: &DateQuery, usage: &HashMap<String, u64>) -> Vec<SearchResult> {
        let window = query.window();

        let keyword_task = {
            let store = Arc::clone(&self.store);
            let text = query.text.clone();
            tokio::task::spawn_blocking(move || keyword_search(&store, &text, window))
        };
        let semantic_task = {
            let store = Arc::clone(&self.store);
            let index = Arc::clone(&self.index);
            let embedder = self.embedder.clone();
            let text = query.text.clone();
            tokio::task::spawn_blocking(move || match embedder {
                Some(provider) => semantic_search(&store, &index, provider.as_ref(), &text, window),
                None => Err(AppError::NotReady("embedding provider")),
            })
        };

        let (keyword, semantic) = tokio::join!(keyword_task, semantic_task);
        let keyword = settle("keyword", keyword);
        let semantic = settle("semantic", semantic);
        debug!(
            keyword = keyword.len(),
            semantic = semantic.len(),
            bounded = window.is_bounded(),
            "search branches finished"
        );

        apply_boosts(merge_results(keyword, semantic), &query.text, usage)
    }
}

fn settle(
    branch: &str,
    joined: Result<Result<Vec<SearchResult>, AppError>, tokio::task::JoinError>,
) -> Vec<SearchResult> {
    match joined {
        Ok(Ok(results)) => results,
        Ok(Err(AppError::NotReady(what))) => {
            debug!(branch, what, "search branch unavailable");
            Vec::new()
        }
        Ok(Err(e)) if e.is_transient() => {
            debug!(branch, error = %e, "search branch skipped");
            Vec::new()
        }
        Ok(Err(e)) => {
            warn!(branch, error = %e, "search branch failed");
            Vec::new()
        }
        Err(e) => {
            warn!(branch, error = %e, "search branch panicked");
            Vec::new()
        }
    }
}
