use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info};

use crate::data::{repository, Store};
use crate::error::AppError;
use crate::services::supervised::supervise;

/// OS icon lookup supplied by the host. Both calls are best-effort.
pub trait IconExtractor: Send + Sync {
    /// Encoded icon for one file, typically an application shortcut.
    fn extract_icon(&self, path: &Path) -> Option<String>;

    /// Generic icon for every file with `extension` (".pdf").
    fn extension_icon(&self, extension: &str) -> Option<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IconScanReport {
    pub missing: usize,
    pub cached: usize,
    pub failed: usize,
}

/// Caches one icon per extension that has none yet.
pub fn run_icon_scan(
    store: &Store,
    extractor: &dyn IconExtractor,
    cancel: &AtomicBool,
) -> Result<IconScanReport, AppError> {
    let missing = store.with_conn(repository::extensions_missing_icon)?;
    let mut report = IconScanReport {
        missing: missing.len(),
        ..IconScanReport::default()
    };

    for extension in missing {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let icon = supervise(|| Ok(extractor.extension_icon(&extension)))
            .ok()
            .flatten()
            .filter(|icon| !icon.is_empty());
        let Some(icon) = icon else {
            debug!(extension = %extension, "no icon available");
            report.failed += 1;
            continue;
        };
        match store.with_conn(|conn| repository::set_extension_icon(conn, &extension, &icon)) {
            Ok(()) => report.cached += 1,
            Err(e) => {
                debug!(extension = %extension, error = %e, "failed to cache icon");
                report.failed += 1;
            }
        }
    }

    info!(cached = report.cached, missing = report.missing, "icon scan finished");
    Ok(report)
}
