use std::collections::HashMap;
use std::path::MAIN_SEPARATOR;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::error::AppError;
use crate::models::file_record::{FileRecord, FileWrite, PendingContent, PendingEmbedding};
use crate::models::search::{MatchSource, SearchResult, TimeWindow};
use crate::services::vector_index::{decode_vector, encode_vector, CachedVector};

const FILE_COLUMNS: &str = "id, path, filename, extension, modified_time, summary, icon_data";
const FTS_SNIPPET_TOKENS: i64 = 15;
const FTS_RANK_SCALE: f32 = 1.5;
const DELETE_CHUNK: usize = 500;

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        filename: row.get(2)?,
        extension: row.get(3)?,
        modified_time: row.get(4)?,
        summary: row.get(5)?,
        icon_data: row.get(6)?,
    })
}

/// `root` with a trailing separator, so sibling directories never share its prefix.
fn root_prefix(root: &str) -> String {
    let mut prefix = root.to_string();
    if !prefix.ends_with(MAIN_SEPARATOR) && !prefix.ends_with('/') {
        prefix.push(MAIN_SEPARATOR);
    }
    prefix
}

/// Paths strictly below `root`. The prefix comparison is exact: LIKE would fold ASCII case.
pub fn load_file_map(conn: &Connection, root: &str) -> Result<HashMap<String, i64>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT path, modified_time FROM files WHERE substr(path, 1, length(?1)) = ?1",
    )?;
    let map = stmt
        .query_map(params![root_prefix(root)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(map)
}

/// Update-or-insert keyed by path. The summary survives only when the mtime is unchanged.
pub fn upsert_file(
    conn: &Connection,
    path: &str,
    filename: &str,
    extension: &str,
    modified_time: i64,
) -> Result<usize, AppError> {
    let changed = conn.execute(
        "INSERT INTO files (path, filename, extension, modified_time, summary)
         VALUES (?1, ?2, ?3, ?4, NULL)
         ON CONFLICT(path) DO UPDATE SET
            filename = excluded.filename,
            extension = excluded.extension,
            summary = CASE WHEN files.modified_time = excluded.modified_time
                           THEN files.summary ELSE NULL END,
            modified_time = excluded.modified_time",
        params![path, filename, extension, modified_time],
    )?;
    Ok(changed)
}

/// Inserts a scanned file and returns its row id. A path already present is
/// refreshed through `upsert_file` instead, so duplicate inserts are no-ops.
pub fn insert_file(
    conn: &Connection,
    path: &str,
    filename: &str,
    extension: &str,
    modified_time: i64,
) -> Result<i64, AppError> {
    upsert_file(conn, path, filename, extension, modified_time)?;
    let id = conn.query_row(
        "SELECT id FROM files WHERE path = ?1",
        params![path],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn update_modified(conn: &Connection, path: &str, modified_time: i64) -> Result<usize, AppError> {
    Ok(conn.execute(
        "UPDATE files SET modified_time = ?1, summary = NULL WHERE path = ?2",
        params![modified_time, path],
    )?)
}

pub fn set_summary(conn: &Connection, path: &str, summary: &str) -> Result<usize, AppError> {
    Ok(conn.execute(
        "UPDATE files SET summary = ?1 WHERE path = ?2",
        params![summary, path],
    )?)
}

pub fn apply_write(conn: &Connection, write: &FileWrite) -> Result<usize, AppError> {
    match write {
        FileWrite::Insert {
            path,
            filename,
            extension,
            modified_time,
        } => insert_file(conn, path, filename, extension, *modified_time).map(|_| 1),
        FileWrite::Touch {
            path,
            modified_time,
        } => update_modified(conn, path, *modified_time),
        FileWrite::Summary { path, summary } => set_summary(conn, path, summary),
    }
}

pub fn upsert_app(
    conn: &Connection,
    path: &str,
    filename: &str,
    extension: &str,
    modified_time: i64,
    summary: &str,
    icon_data: Option<&str>,
) -> Result<usize, AppError> {
    let changed = conn.execute(
        "INSERT INTO files (path, filename, extension, modified_time, summary, icon_data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(path) DO UPDATE SET
            modified_time = excluded.modified_time,
            summary = excluded.summary,
            icon_data = COALESCE(excluded.icon_data, files.icon_data)",
        params![path, filename, extension, modified_time, summary, icon_data],
    )?;
    Ok(changed)
}

pub fn delete_paths(conn: &Connection, paths: &[String]) -> Result<usize, AppError> {
    let mut deleted = 0;
    for chunk in paths.chunks(DELETE_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!("DELETE FROM files WHERE path IN ({placeholders})");
        deleted += conn.execute(&sql, params_from_iter(chunk.iter()))?;
    }
    Ok(deleted)
}

pub fn get_by_path(conn: &Connection, path: &str) -> Result<Option<FileRecord>, AppError> {
    let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE path = ?1");
    let record = conn
        .query_row(&sql, params![path], file_from_row)
        .optional()?;
    Ok(record)
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<FileRecord>, AppError> {
    let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1");
    let record = conn.query_row(&sql, params![id], file_from_row).optional()?;
    Ok(record)
}

pub fn count_files(conn: &Connection) -> Result<i64, AppError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?)
}

pub fn files_needing_content(conn: &Connection) -> Result<Vec<PendingContent>, AppError> {
    let mut stmt =
        conn.prepare("SELECT path, extension FROM files WHERE summary IS NULL ORDER BY id")?;
    let pending = stmt
        .query_map([], |row| {
            Ok(PendingContent {
                path: row.get(0)?,
                extension: row.get(1)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(pending)
}

pub fn files_needing_embedding(conn: &Connection) -> Result<Vec<PendingEmbedding>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT id, summary FROM files
         WHERE summary IS NOT NULL AND summary != ''
           AND id NOT IN (SELECT DISTINCT file_id FROM file_vectors)
         ORDER BY id",
    )?;
    let pending = stmt
        .query_map([], |row| {
            Ok(PendingEmbedding {
                file_id: row.get(0)?,
                summary: row.get(1)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(pending)
}

pub fn delete_vectors(conn: &Connection, file_id: i64) -> Result<usize, AppError> {
    Ok(conn.execute(
        "DELETE FROM file_vectors WHERE file_id = ?1",
        params![file_id],
    )?)
}

pub fn insert_vector(
    conn: &Connection,
    file_id: i64,
    chunk_index: usize,
    vector: &[f32],
) -> Result<i64, AppError> {
    conn.execute(
        "INSERT INTO file_vectors (file_id, chunk_index, vector_blob) VALUES (?1, ?2, ?3)",
        params![file_id, chunk_index as i64, encode_vector(vector)],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn load_all_vectors(conn: &Connection) -> Result<Vec<CachedVector>, AppError> {
    let mut stmt =
        conn.prepare("SELECT file_id, chunk_index, vector_blob FROM file_vectors ORDER BY id")?;
    let vectors = stmt
        .query_map([], |row| {
            let blob: Vec<u8> = row.get(2)?;
            Ok(CachedVector {
                file_id: row.get(0)?,
                chunk_index: row.get::<_, i64>(1)? as usize,
                data: decode_vector(&blob),
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(vectors)
}

pub fn count_vectors(conn: &Connection) -> Result<i64, AppError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM file_vectors", [], |row| row.get(0))?)
}

/// Runs an FTS5 MATCH over filename and summary, restricted to `window`.
pub fn search_fts(
    conn: &Connection,
    fts_query: &str,
    window: TimeWindow,
    limit: usize,
) -> Result<Vec<SearchResult>, AppError> {
    let mut sql = format!(
        "SELECT f.path, f.filename, f.extension,
                COALESCE(snippet(files_fts, 1, '[', ']', '...', {FTS_SNIPPET_TOKENS}), ''),
                f.icon_data, files_fts.rank
         FROM files_fts
         JOIN files f ON f.id = files_fts.rowid
         WHERE files_fts MATCH ?1"
    );
    let mut args: Vec<rusqlite::types::Value> = vec![fts_query.to_string().into()];
    if let Some(start) = window.lower() {
        sql.push_str(" AND f.modified_time >= ?");
        args.push(start.into());
    }
    if let Some(end) = window.upper() {
        sql.push_str(" AND f.modified_time <= ?");
        args.push(end.into());
    }
    sql.push_str(" ORDER BY files_fts.rank LIMIT ?");
    args.push((limit as i64).into());

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
        let rank: f64 = row.get(5)?;
        Ok(SearchResult {
            path: row.get(0)?,
            file_name: row.get(1)?,
            extension: row.get(2)?,
            snippet: row.get(3)?,
            icon_data: row.get(4)?,
            score: (rank.abs() as f32) * FTS_RANK_SCALE,
            match_source: MatchSource::Keyword,
        })
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

pub fn extension_icons(conn: &Connection) -> Result<HashMap<String, String>, AppError> {
    let mut stmt = conn.prepare("SELECT extension, icon_data FROM extension_icons")?;
    let icons = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(icons)
}

pub fn extensions_missing_icon(conn: &Connection) -> Result<Vec<String>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT lower(extension) FROM files
         WHERE extension != ''
           AND lower(extension) NOT IN (SELECT extension FROM extension_icons)
         ORDER BY 1",
    )?;
    let missing = stmt
        .query_map([], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(missing)
}

pub fn set_extension_icon(conn: &Connection, extension: &str, icon: &str) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO extension_icons (extension, icon_data) VALUES (?1, ?2)
         ON CONFLICT(extension) DO UPDATE SET icon_data = excluded.icon_data",
        params![extension.to_lowercase(), icon],
    )?;
    Ok(())
}

pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>, AppError> {
    let value = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub fn increment_usage(conn: &Connection, path: &str) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO usage_counts (path, open_count) VALUES (?1, 1)
         ON CONFLICT(path) DO UPDATE SET open_count = open_count + 1",
        params![path],
    )?;
    Ok(())
}

pub fn usage_snapshot(conn: &Connection) -> Result<HashMap<String, u64>, AppError> {
    let mut stmt = conn.prepare("SELECT path, open_count FROM usage_counts")?;
    let counts = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?.max(0) as u64))
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::migrations::run_migrations;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn insert(conn: &Connection, path: &str, modified_time: i64) {
        let name = path.rsplit('/').next().unwrap().to_string();
        apply_write(
            conn,
            &FileWrite::Insert {
                path: path.to_string(),
                filename: name,
                extension: ".txt".to_string(),
                modified_time,
            },
        )
        .unwrap();
    }

    fn set_summary(conn: &Connection, path: &str, summary: &str) {
        apply_write(
            conn,
            &FileWrite::Summary {
                path: path.to_string(),
                summary: summary.to_string(),
            },
        )
        .unwrap();
    }

    #[test]
    fn test_file_crud() {
        let conn = setup_db();
        insert(&conn, "/home/user/docs/readme.txt", 10);

        let fetched = get_by_path(&conn, "/home/user/docs/readme.txt")
            .unwrap()
            .unwrap();
        assert_eq!(fetched.filename, "readme.txt");
        assert_eq!(fetched.modified_time, 10);
        assert!(fetched.summary.is_none());

        let by_id = get_by_id(&conn, fetched.id).unwrap().unwrap();
        assert_eq!(by_id, fetched);

        let count = delete_paths(&conn, &["/home/user/docs/readme.txt".to_string()]).unwrap();
        assert_eq!(count, 1);
        assert!(get_by_path(&conn, "/home/user/docs/readme.txt")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_duplicate_insert_keeps_summary_when_mtime_unchanged() {
        let conn = setup_db();
        insert(&conn, "/d/a.txt", 10);
        set_summary(&conn, "/d/a.txt", "hello");

        insert(&conn, "/d/a.txt", 10);
        let same = get_by_path(&conn, "/d/a.txt").unwrap().unwrap();
        assert_eq!(same.summary.as_deref(), Some("hello"));
        assert_eq!(count_files(&conn).unwrap(), 1);

        insert(&conn, "/d/a.txt", 11);
        let moved = get_by_path(&conn, "/d/a.txt").unwrap().unwrap();
        assert!(moved.summary.is_none());
        assert_eq!(moved.modified_time, 11);
    }

    #[test]
    fn test_insert_file_returns_stable_id() {
        let conn = setup_db();
        let first = insert_file(&conn, "/d/a.txt", "a.txt", ".txt", 10).unwrap();
        insert_file(&conn, "/d/b.txt", "b.txt", ".txt", 10).unwrap();
        let again = insert_file(&conn, "/d/a.txt", "a.txt", ".txt", 10).unwrap();
        assert_eq!(first, again);
        assert_eq!(get_by_path(&conn, "/d/a.txt").unwrap().unwrap().id, first);
        assert_eq!(count_files(&conn).unwrap(), 2);
    }

    #[test]
    fn test_touch_clears_summary() {
        let conn = setup_db();
        insert(&conn, "/d/a.txt", 10);
        set_summary(&conn, "/d/a.txt", "hello");

        apply_write(
            &conn,
            &FileWrite::Touch {
                path: "/d/a.txt".to_string(),
                modified_time: 20,
            },
        )
        .unwrap();

        let record = get_by_path(&conn, "/d/a.txt").unwrap().unwrap();
        assert_eq!(record.modified_time, 20);
        assert!(record.summary.is_none());
    }

    #[test]
    fn test_load_file_map_is_scoped_to_root() {
        let conn = setup_db();
        let sep = MAIN_SEPARATOR;
        let inside = format!("{sep}data{sep}docs{sep}a.txt");
        let sibling = format!("{sep}data{sep}docs2{sep}b.txt");
        let outside = format!("{sep}other{sep}c.txt");
        insert(&conn, &inside, 1);
        insert(&conn, &sibling, 2);
        insert(&conn, &outside, 3);

        let map = load_file_map(&conn, &format!("{sep}data{sep}docs")).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&inside), Some(&1));
    }

    #[test]
    fn test_load_file_map_is_case_sensitive() {
        let conn = setup_db();
        let sep = MAIN_SEPARATOR;
        let lower = format!("{sep}root{sep}docs{sep}keep.txt");
        let upper = format!("{sep}root{sep}Docs{sep}other.txt");
        insert(&conn, &lower, 1);
        insert(&conn, &upper, 2);

        let map = load_file_map(&conn, &format!("{sep}root{sep}Docs")).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&upper), Some(&2));
    }

    #[test]
    fn test_load_file_map_treats_wildcards_literally() {
        let conn = setup_db();
        let sep = MAIN_SEPARATOR;
        insert(&conn, &format!("{sep}a_b{sep}x.txt"), 1);
        insert(&conn, &format!("{sep}aXb{sep}y.txt"), 1);

        let map = load_file_map(&conn, &format!("{sep}a_b")).unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_pending_content_and_embedding() {
        let conn = setup_db();
        insert(&conn, "/d/a.txt", 1);
        insert(&conn, "/d/b.txt", 1);
        insert(&conn, "/d/c.txt", 1);
        set_summary(&conn, "/d/b.txt", "");
        set_summary(&conn, "/d/c.txt", "quarterly report");

        let pending = files_needing_content(&conn).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].path, "/d/a.txt");
        assert_eq!(pending[0].extension, ".txt");

        let needing = files_needing_embedding(&conn).unwrap();
        assert_eq!(needing.len(), 1);
        assert_eq!(needing[0].summary, "quarterly report");

        insert_vector(&conn, needing[0].file_id, 0, &[1.0, 0.0]).unwrap();
        assert!(files_needing_embedding(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_vectors_round_trip_through_store() {
        let conn = setup_db();
        insert(&conn, "/d/a.txt", 1);
        let id = get_by_path(&conn, "/d/a.txt").unwrap().unwrap().id;

        insert_vector(&conn, id, 0, &[0.6, 0.8]).unwrap();
        insert_vector(&conn, id, 1, &[1.0, 0.0]).unwrap();

        let vectors = load_all_vectors(&conn).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].data, vec![0.6, 0.8]);
        assert_eq!(vectors[1].chunk_index, 1);

        assert_eq!(delete_vectors(&conn, id).unwrap(), 2);
        assert_eq!(count_vectors(&conn).unwrap(), 0);
    }

    #[test]
    fn test_search_fts_matches_summary_and_applies_window() {
        let conn = setup_db();
        insert(&conn, "/d/report.txt", 1_000);
        set_summary(&conn, "/d/report.txt", "the quarterly report for finance");
        insert(&conn, "/d/old.txt", 10);
        set_summary(&conn, "/d/old.txt", "an older report");

        let all = search_fts(&conn, "report*", TimeWindow::UNBOUNDED, 50).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|r| r.score > 0.0));
        assert!(all.iter().all(|r| r.match_source == MatchSource::Keyword));

        let recent = search_fts(
            &conn,
            "report*",
            TimeWindow {
                start: 500,
                end: 2_000,
            },
            50,
        )
        .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].path, "/d/report.txt");
        assert!(recent[0].snippet.contains("report"));
    }

    #[test]
    fn test_extension_icon_cache() {
        let conn = setup_db();
        insert(&conn, "/d/a.txt", 1);
        apply_write(
            &conn,
            &FileWrite::Insert {
                path: "/d/b.pdf".to_string(),
                filename: "b.pdf".to_string(),
                extension: ".pdf".to_string(),
                modified_time: 1,
            },
        )
        .unwrap();

        assert_eq!(
            extensions_missing_icon(&conn).unwrap(),
            vec![".pdf".to_string(), ".txt".to_string()]
        );

        set_extension_icon(&conn, ".PDF", "data:image/png;base64,AAAA").unwrap();
        assert_eq!(
            extensions_missing_icon(&conn).unwrap(),
            vec![".txt".to_string()]
        );
        let icons = extension_icons(&conn).unwrap();
        assert_eq!(
            icons.get(".pdf").map(String::as_str),
            Some("data:image/png;base64,AAAA")
        );
    }

    #[test]
    fn test_upsert_app_refreshes_summary() {
        let conn = setup_db();
        upsert_app(&conn, "/apps/Editor.lnk", "Editor.lnk", ".lnk", 1, "Editor Application", Some("icon"))
            .unwrap();
        upsert_app(&conn, "/apps/Editor.lnk", "Editor.lnk", ".lnk", 2, "Editor Application", None)
            .unwrap();

        let record = get_by_path(&conn, "/apps/Editor.lnk").unwrap().unwrap();
        assert_eq!(record.modified_time, 2);
        assert_eq!(record.icon_data.as_deref(), Some("icon"));
        assert_eq!(record.summary.as_deref(), Some("Editor Application"));
    }

    #[test]
    fn test_settings_and_usage() {
        let conn = setup_db();
        assert!(get_setting(&conn, "indexer").unwrap().is_none());
        set_setting(&conn, "indexer", "{}").unwrap();
        set_setting(&conn, "indexer", "{\"a\":1}").unwrap();
        assert_eq!(
            get_setting(&conn, "indexer").unwrap().as_deref(),
            Some("{\"a\":1}")
        );

        increment_usage(&conn, "/d/a.txt").unwrap();
        increment_usage(&conn, "/d/a.txt").unwrap();
        let usage = usage_snapshot(&conn).unwrap();
        assert_eq!(usage.get("/d/a.txt"), Some(&2));
    }
}
