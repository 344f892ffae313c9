pub mod migrations;
pub mod repository;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::file_record::FileWrite;

pub const QUICK_SCAN_BATCH_SIZE: usize = 2000;
pub const DEEP_SCAN_BATCH_SIZE: usize = 100;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Single SQLite connection shared by every component.
pub struct Store {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations::run_migrations(&conn)?;
        debug!(path = %path.display(), "store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let conn = self.lock();
        f(&conn)
    }

    pub fn with_conn_mut<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut conn = self.lock();
        f(&mut conn)
    }
}

/// Buffers file writes and applies each full batch inside one transaction.
///
/// A failing statement is logged and counted without rolling back its batch;
/// only a failure of the transaction itself is returned.
pub struct BatchWriter<'a> {
    store: &'a Store,
    batch_size: usize,
    pending: Vec<FileWrite>,
    applied: usize,
    failed: usize,
}

impl<'a> BatchWriter<'a> {
    pub fn new(store: &'a Store, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            pending: Vec::with_capacity(batch_size.max(1)),
            applied: 0,
            failed: 0,
        }
    }

    pub fn push(&mut self, write: FileWrite) -> Result<(), AppError> {
        self.pending.push(write);
        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), AppError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.pending);
        let (applied, failed) = self.store.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut applied = 0;
            let mut failed = 0;
            for write in &batch {
                match repository::apply_write(&tx, write) {
                    Ok(_) => applied += 1,
                    Err(e) => {
                        warn!(path = write.path(), error = %e, "batched write failed");
                        failed += 1;
                    }
                }
            }
            tx.commit()?;
            Ok((applied, failed))
        })?;
        debug!(applied, failed, "batch committed");
        self.applied += applied;
        self.failed += failed;
        Ok(())
    }

    /// Commits whatever is left and returns `(applied, failed)`.
    pub fn finish(mut self) -> Result<(usize, usize), AppError> {
        self.flush()?;
        Ok((self.applied, self.failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(path: &str) -> FileWrite {
        FileWrite::Insert {
            path: path.to_string(),
            filename: path.rsplit('/').next().unwrap().to_string(),
            extension: ".txt".to_string(),
            modified_time: 1,
        }
    }

    #[test]
    fn test_open_on_disk_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("index.db");
        let store = Store::open(&db).unwrap();
        assert!(db.exists());
        assert_eq!(store.path(), Some(db.as_path()));
    }

    #[test]
    fn test_batch_writer_commits_every_batch() {
        let store = Store::open_in_memory().unwrap();
        let mut writer = BatchWriter::new(&store, 2);
        writer.push(insert("/d/a.txt")).unwrap();
        writer.push(insert("/d/b.txt")).unwrap();

        let mid = store.with_conn(repository::count_files).unwrap();
        assert_eq!(mid, 2);

        writer.push(insert("/d/c.txt")).unwrap();
        let (applied, failed) = writer.finish().unwrap();
        assert_eq!((applied, failed), (3, 0));
        assert_eq!(store.with_conn(repository::count_files).unwrap(), 3);
    }

    #[test]
    fn test_duplicate_inserts_in_one_batch_are_noops() {
        let store = Store::open_in_memory().unwrap();
        let mut writer = BatchWriter::new(&store, 10);
        writer.push(insert("/d/a.txt")).unwrap();
        writer.push(insert("/d/a.txt")).unwrap();
        writer.finish().unwrap();
        assert_eq!(store.with_conn(repository::count_files).unwrap(), 1);
    }

    #[test]
    fn test_failed_statement_does_not_roll_back_batch() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_bad BEFORE INSERT ON files
                     WHEN new.path = '/d/bad.txt'
                     BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
                )?;
                Ok(())
            })
            .unwrap();

        let mut writer = BatchWriter::new(&store, 10);
        writer.push(insert("/d/good.txt")).unwrap();
        writer.push(insert("/d/bad.txt")).unwrap();
        writer.push(insert("/d/other.txt")).unwrap();
        let (applied, failed) = writer.finish().unwrap();

        assert_eq!((applied, failed), (2, 1));
        assert_eq!(store.with_conn(repository::count_files).unwrap(), 2);
    }
}
