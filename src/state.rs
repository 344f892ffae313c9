use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use tracing::{info, warn};

use crate::config::Settings;
use crate::data::{repository, Store};
use crate::error::AppError;
use crate::models::search::SearchResult;
use crate::presentation;
use crate::services::date_parser::parse_date_query;
use crate::services::pipeline_service::{Collaborators, IndexingPipeline, PipelineReport};
use crate::services::search_service::{HybridSearcher, StoreUsageCounter, UsageCounter};
use crate::services::vector_index::VectorIndex;

/// Owns the store, the in-memory vector index, settings and host collaborators.
pub struct Engine {
    store: Arc<Store>,
    index: Arc<VectorIndex>,
    settings: RwLock<Settings>,
    collaborators: Collaborators,
    usage: Arc<dyn UsageCounter>,
    cancel_flag: Arc<AtomicBool>,
    indexing: Mutex<Option<JoinHandle<PipelineReport>>>,
}

impl Engine {
    /// Opens (or creates) the database at `db_path`. Schema failures are fatal.
    pub fn open(db_path: &Path, collaborators: Collaborators) -> Result<Self, AppError> {
        Self::with_store(Store::open(db_path)?, collaborators)
    }

    pub fn open_in_memory(collaborators: Collaborators) -> Result<Self, AppError> {
        Self::with_store(Store::open_in_memory()?, collaborators)
    }

    fn with_store(store: Store, collaborators: Collaborators) -> Result<Self, AppError> {
        let store = Arc::new(store);
        let settings = Settings::load(&store);
        let index = Arc::new(VectorIndex::new());
        let vectors = index.reload(&store)?;
        info!(
            db = ?store.path(),
            vectors,
            semantic = collaborators.embedder.is_some(),
            "engine opened"
        );

        Ok(Self {
            usage: Arc::new(StoreUsageCounter::new(Arc::clone(&store))),
            store,
            index,
            settings: RwLock::new(settings),
            collaborators,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            indexing: Mutex::new(None),
        })
    }

    pub fn with_usage_counter(mut self, usage: Arc<dyn UsageCounter>) -> Self {
        self.usage = usage;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn vector_index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn settings(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Persists `settings`; the next indexing run picks them up.
    pub fn update_settings(&self, settings: Settings) -> Result<(), AppError> {
        settings.save(&self.store)?;
        *self
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = settings;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Indexing
    // -----------------------------------------------------------------------

    /// Runs the whole pipeline over `roots` on the calling thread.
    pub fn run_indexing(&self, roots: &[PathBuf]) -> PipelineReport {
        self.cancel_flag.store(false, Ordering::Relaxed);
        let settings = self.settings();
        IndexingPipeline {
            store: &self.store,
            index: &self.index,
            settings: &settings,
            collaborators: &self.collaborators,
            cancel: &self.cancel_flag,
        }
        .run(roots)
    }

    /// Starts a background run over the configured scan roots.
    pub fn start_indexing(&self) -> Result<(), AppError> {
        let mut slot = self
            .indexing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(AppError::General("indexing is already running".to_string()));
        }
        if let Some(finished) = slot.take() {
            let _ = finished.join();
        }

        self.cancel_flag.store(false, Ordering::Relaxed);
        let store = Arc::clone(&self.store);
        let index = Arc::clone(&self.index);
        let collaborators = self.collaborators.clone();
        let cancel = Arc::clone(&self.cancel_flag);
        let settings = self.settings();

        let handle = std::thread::Builder::new()
            .name("indexing".to_string())
            .spawn(move || {
                IndexingPipeline {
                    store: &store,
                    index: &index,
                    settings: &settings,
                    collaborators: &collaborators,
                    cancel: &cancel,
                }
                .run(&settings.scan_roots)
            })?;
        *slot = Some(handle);
        Ok(())
    }

    pub fn is_indexing(&self) -> bool {
        self.indexing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Blocks until the background run ends. `None` when nothing was started.
    pub fn wait_for_indexing(&self) -> Option<PipelineReport> {
        let handle = self
            .indexing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()?;
        match handle.join() {
            Ok(report) => Some(report),
            Err(_) => {
                warn!("indexing thread panicked");
                None
            }
        }
    }

    /// Asks the running pipeline to stop after its current item.
    pub fn stop_indexing(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Ranked results for a raw query. Never fails; a broken branch just contributes nothing.
    pub async fn search(&self, raw_query: &str) -> Vec<SearchResult> {
        if raw_query.trim().is_empty() {
            return Vec::new();
        }

        let query = parse_date_query(raw_query);
        let searcher = HybridSearcher {
            store: Arc::clone(&self.store),
            index: Arc::clone(&self.index),
            embedder: self.collaborators.embedder.clone(),
        };
        let ranked = searcher.search(&query, &self.usage.snapshot()).await;

        let mut results = presentation::with_control_shortcuts(raw_query, ranked);
        match self.store.with_conn(repository::extension_icons) {
            Ok(icons) => presentation::fill_extension_icons(&mut results, &icons),
            Err(e) => warn!(error = %e, "failed to load extension icons"),
        }
        results
    }

    /// Counts an open of `path` for ranking. Control shortcuts are not counted.
    pub fn record_open(&self, path: &str) -> Result<(), AppError> {
        if presentation::is_control_uri(path) {
            return Ok(());
        }
        self.usage.increment(path)
    }

    /// Cancels and joins any background run.
    pub fn shutdown(&self) {
        self.stop_indexing();
        if let Some(report) = self.wait_for_indexing() {
            info!(cancelled = report.cancelled, "indexing stopped for shutdown");
        }
        info!("engine shut down");
    }
}
