use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::Settings;
use crate::data::Store;
use crate::error::AppError;
use crate::models::progress::{percent, NoopProgress, ProgressSink};
use crate::services::embedding_service::{self, EmbeddingProvider};
use crate::services::extraction_service::{DeepScan, ImageTextExtractor};
use crate::services::icon_service::{self, IconExtractor};
use crate::services::indexing_service;
use crate::services::supervised::supervise;
use crate::services::vector_index::VectorIndex;

// ---------------------------------------------------------------------------
// Stage bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AppScan,
    QuickScan,
    StaleSweep,
    IconScan,
    DeepScan,
    EmbeddingScan,
    VectorIndexReload,
}

impl Stage {
    pub const ORDER: [Stage; 7] = [
        Stage::AppScan,
        Stage::QuickScan,
        Stage::StaleSweep,
        Stage::IconScan,
        Stage::DeepScan,
        Stage::EmbeddingScan,
        Stage::VectorIndexReload,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::AppScan => "app_scan",
            Stage::QuickScan => "quick_scan",
            Stage::StaleSweep => "stale_sweep",
            Stage::IconScan => "icon_scan",
            Stage::DeepScan => "deep_scan",
            Stage::EmbeddingScan => "embedding_scan",
            Stage::VectorIndexReload => "vector_index_reload",
        }
    }

    fn position(self) -> usize {
        Stage::ORDER.iter().position(|s| *s == self).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
    /// The stage's own report, serialized.
    pub detail: serde_json::Value,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
    pub cancelled: bool,
}

impl PipelineReport {
    pub fn stage(&self, stage: Stage) -> impl Iterator<Item = &StageReport> {
        self.stages.iter().filter(move |r| r.stage == stage)
    }

    pub fn failures(&self) -> usize {
        self.stages
            .iter()
            .filter(|r| matches!(r.outcome, StageOutcome::Failed(_)))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Host-supplied services. Every one is optional; missing ones skip their stage.
#[derive(Clone)]
pub struct Collaborators {
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub images: Option<Arc<dyn ImageTextExtractor>>,
    pub icons: Option<Arc<dyn IconExtractor>>,
    pub progress: Arc<dyn ProgressSink>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            embedder: None,
            images: None,
            icons: None,
            progress: Arc::new(NoopProgress),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct IndexingPipeline<'a> {
    pub store: &'a Store,
    pub index: &'a VectorIndex,
    pub settings: &'a Settings,
    pub collaborators: &'a Collaborators,
    pub cancel: &'a AtomicBool,
}

impl IndexingPipeline<'_> {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn skipped(stage: Stage, reason: &str) -> StageReport {
        StageReport {
            stage,
            outcome: StageOutcome::Skipped(reason.to_string()),
            detail: serde_json::Value::Null,
            elapsed_ms: 0,
        }
    }

    /// Runs one stage body, turning its error or panic into a report entry.
    fn record<T, F>(&self, stage: Stage, body: F) -> StageReport
    where
        T: Serialize,
        F: FnOnce() -> Result<T, AppError>,
    {
        self.collaborators.progress.emit(
            "indexing",
            stage.as_str(),
            percent(stage.position(), Stage::ORDER.len()),
        );
        let started = Instant::now();
        let result = supervise(body);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (outcome, detail) = match result {
            Ok(report) => (
                StageOutcome::Completed,
                serde_json::to_value(report).unwrap_or(serde_json::Value::Null),
            ),
            Err(AppError::NotReady(what)) => {
                info!(stage = stage.as_str(), what, "stage skipped, collaborator not ready");
                (StageOutcome::Skipped(format!("{what} not ready")), serde_json::Value::Null)
            }
            Err(e) => {
                warn!(stage = stage.as_str(), error = %e, "stage failed");
                (StageOutcome::Failed(e.to_string()), serde_json::Value::Null)
            }
        };
        StageReport {
            stage,
            outcome,
            detail,
            elapsed_ms,
        }
    }

    /// Every stage in order. A failed stage never stops the ones after it; cancellation
    /// marks the remaining stages skipped.
    pub fn run(&self, roots: &[PathBuf]) -> PipelineReport {
        let mut report = PipelineReport::default();
        let progress = self.collaborators.progress.as_ref();
        info!(roots = roots.len(), "indexing pipeline started");

        let mut stale = Vec::new();
        for stage in Stage::ORDER {
            if self.cancelled() {
                report.cancelled = true;
                report.stages.push(Self::skipped(stage, "cancelled"));
                continue;
            }

            match stage {
                Stage::AppScan => {
                    let icons = self.collaborators.icons.as_deref();
                    report.stages.push(self.record(stage, || {
                        indexing_service::run_app_scan(
                            self.store,
                            &self.settings.app_roots,
                            icons,
                            self.cancel,
                        )
                    }));
                }
                Stage::QuickScan => {
                    if roots.is_empty() {
                        report.stages.push(Self::skipped(stage, "no scan roots"));
                    }
                    for root in roots {
                        let mut scan_stale = Vec::new();
                        let entry = self.record(stage, || {
                            let mut scan = indexing_service::run_quick_scan(
                                self.store,
                                root,
                                self.settings,
                                self.cancel,
                                progress,
                            )?;
                            scan_stale = std::mem::take(&mut scan.stale);
                            Ok(scan)
                        });
                        stale.append(&mut scan_stale);
                        report.stages.push(entry);
                    }
                }
                Stage::StaleSweep => {
                    let stale = std::mem::take(&mut stale);
                    report.stages.push(self.record(stage, || {
                        indexing_service::sweep_stale(self.store, &stale)
                    }));
                }
                Stage::IconScan => match self.collaborators.icons.as_deref() {
                    Some(icons) => report.stages.push(self.record(stage, || {
                        icon_service::run_icon_scan(self.store, icons, self.cancel)
                    })),
                    None => report.stages.push(Self::skipped(stage, "no icon extractor")),
                },
                Stage::DeepScan => {
                    let deep = DeepScan::new(self.collaborators.images.clone());
                    report.stages.push(self.record(stage, || {
                        deep.run(self.store, self.settings, self.cancel, progress)
                    }));
                }
                Stage::EmbeddingScan => match self.collaborators.embedder.as_deref() {
                    Some(embedder) => report.stages.push(self.record(stage, || {
                        embedding_service::run_embedding_scan(
                            self.store,
                            embedder,
                            self.settings,
                            self.cancel,
                            progress,
                        )
                    })),
                    None => report.stages.push(Self::skipped(stage, "no embedding provider")),
                },
                Stage::VectorIndexReload => {
                    report
                        .stages
                        .push(self.record(stage, || self.index.reload(self.store)));
                }
            }
        }

        progress.emit("indexing", "done", 100);
        info!(
            stages = report.stages.len(),
            failures = report.failures(),
            cancelled = report.cancelled,
            "indexing pipeline finished"
        );
        report
    }
}
