use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::data::{repository, BatchWriter, Store, QUICK_SCAN_BATCH_SIZE};
use crate::error::AppError;
use crate::models::file_record::{normalized_extension, FileWrite};
use crate::models::progress::ProgressSink;
use crate::services::icon_service::IconExtractor;
use crate::services::supervised::supervise;

const APP_EXTENSIONS: &[&str] = &[".lnk", ".exe", ".url"];
const PACKAGE_CACHE: [&str; 3] = ["AppData", "Local", "Packages"];
const PROGRESS_EVERY: usize = 1000;

fn is_package_cache(path: &Path) -> bool {
    let names: Vec<&OsStr> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name),
            _ => None,
        })
        .collect();
    names.len() >= PACKAGE_CACHE.len()
        && names[names.len() - PACKAGE_CACHE.len()..]
            .iter()
            .zip(PACKAGE_CACHE)
            .all(|(a, b)| *a == OsStr::new(b))
}

/// Directories that are never descended into. The scan root itself is never pruned.
fn should_prune(entry: &walkdir::DirEntry, settings: &Settings) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();

    if name.starts_with('.') || settings.ignored_dirs.iter().any(|d| *d == name) {
        return true;
    }
    if entry.depth() == 1 && settings.root_ignored_dirs.iter().any(|d| *d == name) {
        return true;
    }
    is_package_cache(entry.path())
}

fn modified_seconds(metadata: &std::fs::Metadata) -> Result<i64, AppError> {
    let modified = metadata.modified()?;
    Ok(chrono::DateTime::<chrono::Utc>::from(modified).timestamp())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuickScanReport {
    pub root: String,
    pub seen: usize,
    pub unchanged: usize,
    pub inserted: usize,
    pub updated: usize,
    pub entry_errors: usize,
    pub write_failures: usize,
    pub cancelled: bool,
    /// Stored paths under the root that the walk no longer found.
    pub stale: Vec<String>,
}

/// Walks `root` and reconciles every regular file against the store.
pub fn run_quick_scan(
    store: &Store,
    root: &Path,
    settings: &Settings,
    cancel: &AtomicBool,
    progress: &dyn ProgressSink,
) -> Result<QuickScanReport, AppError> {
    let root = root.canonicalize()?;
    if !root.is_dir() {
        return Err(AppError::General(format!(
            "scan root is not a directory: {}",
            root.display()
        )));
    }
    let root_str = root.to_string_lossy().into_owned();
    let mut known: HashMap<String, i64> =
        store.with_conn(|conn| repository::load_file_map(conn, &root_str))?;
    info!(root = %root_str, known = known.len(), "quick scan started");

    let mut report = QuickScanReport {
        root: root_str.clone(),
        ..QuickScanReport::default()
    };
    let mut writer = BatchWriter::new(store, QUICK_SCAN_BATCH_SIZE);

    let walker = walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_entry(|e| !should_prune(e, settings));

    for entry in walker {
        if cancel.load(Ordering::Relaxed) {
            report.cancelled = true;
            break;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                report.entry_errors += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let modified_time = match entry
            .metadata()
            .map_err(|e| AppError::Io(e.into()))
            .and_then(|m| modified_seconds(&m))
        {
            Ok(t) => t,
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "skipping file without metadata");
                report.entry_errors += 1;
                continue;
            }
        };

        report.seen += 1;
        let path = entry.path().to_string_lossy().into_owned();
        match known.remove(&path) {
            Some(stored) if stored == modified_time => report.unchanged += 1,
            Some(_) => {
                writer.push(FileWrite::Touch {
                    path,
                    modified_time,
                })?;
                report.updated += 1;
            }
            None => {
                writer.push(FileWrite::Insert {
                    filename: entry.file_name().to_string_lossy().into_owned(),
                    extension: normalized_extension(entry.path()),
                    path,
                    modified_time,
                })?;
                report.inserted += 1;
            }
        }

        if report.seen % PROGRESS_EVERY == 0 {
            progress.emit(
                "quick_scan",
                &format!("Scanned {} files in {}", report.seen, root_str),
                0,
            );
        }
    }

    let (_, write_failures) = writer.finish()?;
    report.write_failures = write_failures;

    // An interrupted walk cannot tell missing files from unvisited ones.
    if !report.cancelled {
        let mut stale: Vec<String> = known.into_keys().collect();
        stale.sort();
        report.stale = stale;
    }

    progress.emit("quick_scan", &format!("Scanned {root_str}"), 100);
    info!(
        root = %root_str,
        seen = report.seen,
        inserted = report.inserted,
        updated = report.updated,
        stale = report.stale.len(),
        "quick scan finished"
    );
    Ok(report)
}

/// Deletes records for paths that no longer exist. Their vectors cascade.
pub fn sweep_stale(store: &Store, stale: &[String]) -> Result<usize, AppError> {
    if stale.is_empty() {
        return Ok(0);
    }
    let deleted = store.with_conn_mut(|conn| {
        let tx = conn.transaction()?;
        let deleted = repository::delete_paths(&tx, stale)?;
        tx.commit()?;
        Ok(deleted)
    })?;
    info!(deleted, "stale records removed");
    Ok(deleted)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AppScanReport {
    pub roots_scanned: usize,
    pub added: usize,
    pub refreshed: usize,
    pub failed: usize,
}

fn is_app(path: &Path) -> bool {
    APP_EXTENSIONS.contains(&normalized_extension(path).as_str())
}

/// Registers launcher shortcuts and executables found under `roots`.
pub fn run_app_scan(
    store: &Store,
    roots: &[PathBuf],
    icons: Option<&dyn IconExtractor>,
    cancel: &AtomicBool,
) -> Result<AppScanReport, AppError> {
    let mut report = AppScanReport::default();

    for root in roots {
        if !root.is_dir() {
            debug!(root = %root.display(), "app root missing, skipping");
            continue;
        }
        report.roots_scanned += 1;

        let mut found = Vec::new();
        for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if cancel.load(Ordering::Relaxed) {
                return Ok(report);
            }
            if !entry.file_type().is_file() || !is_app(entry.path()) {
                continue;
            }
            let Ok(modified_time) = entry
                .metadata()
                .map_err(|e| AppError::Io(e.into()))
                .and_then(|m| modified_seconds(&m))
            else {
                continue;
            };
            let icon = icons.and_then(|extractor| {
                supervise(|| Ok(extractor.extract_icon(entry.path())))
                    .ok()
                    .flatten()
                    .filter(|icon| !icon.is_empty())
            });
            found.push((entry.into_path(), modified_time, icon));
        }

        store.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for (path, modified_time, icon) in &found {
                let path_str = path.to_string_lossy();
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let stem = path
                    .file_stem()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let existed = repository::get_by_path(&tx, &path_str)?.is_some();
                let result = repository::upsert_app(
                    &tx,
                    &path_str,
                    &filename,
                    &normalized_extension(path),
                    *modified_time,
                    &format!("{stem} Application"),
                    icon.as_deref(),
                );
                match result {
                    Ok(_) if existed => report.refreshed += 1,
                    Ok(_) => report.added += 1,
                    Err(e) => {
                        warn!(path = %path_str, error = %e, "failed to register application");
                        report.failed += 1;
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })?;
    }

    info!(added = report.added, refreshed = report.refreshed, "application scan finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::progress::NoopProgress;
    use std::fs;
    use std::time::{Duration, SystemTime};

    fn scan(store: &Store, root: &Path) -> QuickScanReport {
        run_quick_scan(
            store,
            root,
            &Settings::default(),
            &AtomicBool::new(false),
            &NoopProgress,
        )
        .unwrap()
    }

    fn canonical(p: &Path) -> String {
        p.canonicalize().unwrap().to_string_lossy().into_owned()
    }

    fn set_mtime(path: &Path, secs_ago: u64) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago))
            .unwrap();
    }

    struct StubIcons;

    impl IconExtractor for StubIcons {
        fn extract_icon(&self, path: &Path) -> Option<String> {
            Some(format!("icon:{}", path.file_name()?.to_string_lossy()))
        }

        fn extension_icon(&self, _extension: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_scan_inserts_new_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("B.PDF"), "pdf").unwrap();

        let store = Store::open_in_memory().unwrap();
        let report = scan(&store, dir.path());
        assert_eq!(report.inserted, 2);
        assert_eq!(report.seen, 2);

        let record = store
            .with_conn(|conn| {
                repository::get_by_path(conn, &canonical(&dir.path().join("sub").join("B.PDF")))
            })
            .unwrap()
            .unwrap();
        assert_eq!(record.filename, "B.PDF");
        assert_eq!(record.extension, ".pdf");
        assert!(record.summary.is_none());
    }

    #[test]
    fn test_rescan_of_unchanged_tree_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        fs::write(dir.path().join("b.txt"), "world").unwrap();

        let store = Store::open_in_memory().unwrap();
        scan(&store, dir.path());
        let second = scan(&store, dir.path());
        assert_eq!(second.unchanged, 2);
        assert_eq!(second.inserted + second.updated, 0);
        assert!(second.stale.is_empty());
    }

    #[test]
    fn test_touched_file_clears_summary() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "hello").unwrap();
        set_mtime(&file, 3_600);

        let store = Store::open_in_memory().unwrap();
        scan(&store, dir.path());
        let key = canonical(&file);
        store
            .with_conn(|conn| repository::set_summary(conn, &key, "hello"))
            .unwrap();

        set_mtime(&file, 10);
        let report = scan(&store, dir.path());
        assert_eq!(report.updated, 1);

        let record = store
            .with_conn(|conn| repository::get_by_path(conn, &key))
            .unwrap()
            .unwrap();
        assert!(record.summary.is_none());
    }

    #[test]
    fn test_deleted_files_are_reported_stale_and_swept() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone.txt");
        fs::write(&gone, "bye").unwrap();
        fs::write(dir.path().join("kept.txt"), "hi").unwrap();

        let store = Store::open_in_memory().unwrap();
        scan(&store, dir.path());
        let gone_key = canonical(&gone);
        fs::remove_file(&gone).unwrap();

        let report = scan(&store, dir.path());
        assert_eq!(report.stale, vec![gone_key.clone()]);

        assert_eq!(sweep_stale(&store, &report.stale).unwrap(), 1);
        assert!(store
            .with_conn(|conn| repository::get_by_path(conn, &gone_key))
            .unwrap()
            .is_none());
        assert_eq!(store.with_conn(repository::count_files).unwrap(), 1);
    }

    #[test]
    fn test_pruned_directories_are_not_descended() {
        let dir = tempfile::tempdir().unwrap();
        for sub in [".git", "node_modules", "Windows", "docs"] {
            fs::create_dir(dir.path().join(sub)).unwrap();
            fs::write(dir.path().join(sub).join("f.txt"), "x").unwrap();
        }
        let nested_windows = dir.path().join("docs").join("Windows");
        fs::create_dir(&nested_windows).unwrap();
        fs::write(nested_windows.join("g.txt"), "x").unwrap();
        let packages = dir.path().join("AppData").join("Local").join("Packages");
        fs::create_dir_all(&packages).unwrap();
        fs::write(packages.join("h.txt"), "x").unwrap();

        let store = Store::open_in_memory().unwrap();
        let report = scan(&store, dir.path());
        assert_eq!(report.inserted, 2, "{report:?}");
        let nested = store
            .with_conn(|conn| repository::get_by_path(conn, &canonical(&nested_windows.join("g.txt"))))
            .unwrap();
        assert!(nested.is_some());
    }

    #[test]
    fn test_scan_is_scoped_to_its_root() {
        let dir = tempfile::tempdir().unwrap();
        let left = dir.path().join("left");
        let right = dir.path().join("right");
        fs::create_dir(&left).unwrap();
        fs::create_dir(&right).unwrap();
        fs::write(left.join("a.txt"), "a").unwrap();
        fs::write(right.join("b.txt"), "b").unwrap();

        let store = Store::open_in_memory().unwrap();
        scan(&store, &left);
        let report = scan(&store, &right);
        assert!(report.stale.is_empty());
        assert_eq!(store.with_conn(repository::count_files).unwrap(), 2);
    }

    #[test]
    fn test_case_variant_sibling_root_is_not_swept() {
        let dir = tempfile::tempdir().unwrap();
        let lower = dir.path().join("docs");
        let upper = dir.path().join("Docs");
        fs::create_dir(&lower).unwrap();
        // Case-insensitive filesystems cannot hold both.
        if fs::create_dir(&upper).is_err() {
            return;
        }
        fs::write(lower.join("keep.txt"), "keep").unwrap();
        fs::write(upper.join("other.txt"), "other").unwrap();

        let store = Store::open_in_memory().unwrap();
        scan(&store, &lower);
        let report = scan(&store, &upper);
        assert!(report.stale.is_empty(), "{:?}", report.stale);

        assert_eq!(sweep_stale(&store, &report.stale).unwrap(), 0);
        let kept = store
            .with_conn(|conn| repository::get_by_path(conn, &canonical(&lower.join("keep.txt"))))
            .unwrap();
        assert!(kept.is_some());
        assert_eq!(store.with_conn(repository::count_files).unwrap(), 2);
    }

    #[test]
    fn test_cancelled_scan_reports_no_stale_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        let store = Store::open_in_memory().unwrap();
        scan(&store, dir.path());

        let report = run_quick_scan(
            &store,
            dir.path(),
            &Settings::default(),
            &AtomicBool::new(true),
            &NoopProgress,
        )
        .unwrap();
        assert!(report.cancelled);
        assert!(report.stale.is_empty());
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let store = Store::open_in_memory().unwrap();
        let result = run_quick_scan(
            &store,
            Path::new("/definitely/not/here"),
            &Settings::default(),
            &AtomicBool::new(false),
            &NoopProgress,
        );
        assert!(matches!(result, Err(AppError::Io(_))));
    }

    #[test]
    fn test_app_scan_registers_launchers() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Editor.lnk"), "lnk").unwrap();
        fs::write(dir.path().join("readme.txt"), "txt").unwrap();

        let store = Store::open_in_memory().unwrap();
        let roots = vec![dir.path().to_path_buf(), PathBuf::from("/missing/apps")];
        let first = run_app_scan(&store, &roots, Some(&StubIcons), &AtomicBool::new(false)).unwrap();
        assert_eq!(first.roots_scanned, 1);
        assert_eq!(first.added, 1);

        let second = run_app_scan(&store, &roots, None, &AtomicBool::new(false)).unwrap();
        assert_eq!(second.refreshed, 1);

        let key = dir.path().join("Editor.lnk").to_string_lossy().into_owned();
        let record = store
            .with_conn(|conn| repository::get_by_path(conn, &key))
            .unwrap()
            .unwrap();
        assert_eq!(record.summary.as_deref(), Some("Editor Application"));
        assert_eq!(record.icon_data.as_deref(), Some("icon:Editor.lnk"));
        assert_eq!(record.extension, ".lnk");
    }
}
