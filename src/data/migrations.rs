use rusqlite::Connection;

use crate::error::AppError;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT UNIQUE NOT NULL,
    filename TEXT NOT NULL,
    extension TEXT NOT NULL DEFAULT '',
    modified_time INTEGER NOT NULL DEFAULT 0,
    summary TEXT,
    icon_data TEXT
);

CREATE INDEX IF NOT EXISTS idx_files_extension ON files(extension);
CREATE INDEX IF NOT EXISTS idx_files_modified ON files(modified_time);

CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(
    filename,
    summary,
    path UNINDEXED,
    content='files',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS files_ai AFTER INSERT ON files BEGIN
    INSERT INTO files_fts(rowid, filename, summary, path)
    VALUES (new.id, new.filename, new.summary, new.path);
END;

CREATE TRIGGER IF NOT EXISTS files_ad AFTER DELETE ON files BEGIN
    INSERT INTO files_fts(files_fts, rowid, filename, summary, path)
    VALUES ('delete', old.id, old.filename, old.summary, old.path);
END;

CREATE TRIGGER IF NOT EXISTS files_au AFTER UPDATE ON files BEGIN
    INSERT INTO files_fts(files_fts, rowid, filename, summary, path)
    VALUES ('delete', old.id, old.filename, old.summary, old.path);
    INSERT INTO files_fts(rowid, filename, summary, path)
    VALUES (new.id, new.filename, new.summary, new.path);
END;

CREATE TABLE IF NOT EXISTS file_vectors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL,
    chunk_index INTEGER NOT NULL,
    vector_blob BLOB NOT NULL,
    FOREIGN KEY(file_id) REFERENCES files(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_vectors_file ON file_vectors(file_id);

CREATE TRIGGER IF NOT EXISTS files_summary_reset AFTER UPDATE OF summary ON files
WHEN new.summary IS NULL BEGIN
    DELETE FROM file_vectors WHERE file_id = new.id;
END;

CREATE TABLE IF NOT EXISTS extension_icons (
    extension TEXT PRIMARY KEY,
    icon_data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS usage_counts (
    path TEXT PRIMARY KEY,
    open_count INTEGER NOT NULL DEFAULT 0
);
";

pub fn run_migrations(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.execute_batch(SCHEMA_V1)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_migration_creates_tables() {
        let conn = setup_db();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for expected in [
            "files",
            "files_fts",
            "file_vectors",
            "extension_icons",
            "settings",
            "usage_counts",
        ] {
            assert!(
                tables.contains(&expected.to_string()),
                "missing table {expected}"
            );
        }
    }

    #[test]
    fn test_migration_enables_wal() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("test.db")).unwrap();
        run_migrations(&conn).unwrap();

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_migration_idempotent() {
        let conn = setup_db();
        run_migrations(&conn).unwrap(); // should not error
    }

    #[test]
    fn test_triggers_keep_fts_in_sync() {
        let conn = setup_db();
        conn.execute(
            "INSERT INTO files (path, filename, extension, modified_time, summary)
             VALUES ('/d/plan.txt', 'plan.txt', '.txt', 1, NULL)",
            [],
        )
        .unwrap();

        let hits = |term: &str| -> i64 {
            conn.query_row(
                "SELECT COUNT(*) FROM files_fts WHERE files_fts MATCH ?1",
                params![term],
                |row| row.get(0),
            )
            .unwrap()
        };
        assert_eq!(hits("plan"), 1);
        assert_eq!(hits("budget"), 0);

        conn.execute(
            "UPDATE files SET summary = 'quarterly budget' WHERE path = '/d/plan.txt'",
            [],
        )
        .unwrap();
        assert_eq!(hits("budget"), 1);

        conn.execute("DELETE FROM files WHERE path = '/d/plan.txt'", [])
            .unwrap();
        assert_eq!(hits("plan"), 0);
        assert_eq!(hits("budget"), 0);
    }

    #[test]
    fn test_vectors_cascade_with_file() {
        let conn = setup_db();
        conn.execute(
            "INSERT INTO files (path, filename, extension, modified_time)
             VALUES ('/d/a.txt', 'a.txt', '.txt', 1)",
            [],
        )
        .unwrap();
        let file_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO file_vectors (file_id, chunk_index, vector_blob) VALUES (?1, 0, x'0000803f')",
            params![file_id],
        )
        .unwrap();

        conn.execute("DELETE FROM files WHERE id = ?1", params![file_id])
            .unwrap();

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM file_vectors", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_summary_reset_drops_vectors() {
        let conn = setup_db();
        conn.execute(
            "INSERT INTO files (path, filename, extension, modified_time, summary)
             VALUES ('/d/a.txt', 'a.txt', '.txt', 1, 'old text')",
            [],
        )
        .unwrap();
        let file_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO file_vectors (file_id, chunk_index, vector_blob) VALUES (?1, 0, x'0000803f')",
            params![file_id],
        )
        .unwrap();
        let count = |conn: &Connection| -> i64 {
            conn.query_row("SELECT COUNT(*) FROM file_vectors", [], |row| row.get(0))
                .unwrap()
        };

        conn.execute("UPDATE files SET summary = 'new text' WHERE id = ?1", params![file_id])
            .unwrap();
        assert_eq!(count(&conn), 1);

        conn.execute("UPDATE files SET summary = NULL WHERE id = ?1", params![file_id])
            .unwrap();
        assert_eq!(count(&conn), 0);
    }
}
