use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub filename: String,
    /// Lowercase with the leading dot (".pdf"), empty when the file has none.
    pub extension: String,
    pub modified_time: i64,
    pub summary: Option<String>,
    pub icon_data: Option<String>,
}

/// A pending write against `files`, applied inside a batch transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum FileWrite {
    /// Update-or-insert keyed by path; the summary is reset only when the mtime moved.
    Insert {
        path: String,
        filename: String,
        extension: String,
        modified_time: i64,
    },
    /// Known path whose mtime changed: store the new mtime and force re-extraction.
    Touch { path: String, modified_time: i64 },
    Summary { path: String, summary: String },
}

impl FileWrite {
    pub fn path(&self) -> &str {
        match self {
            Self::Insert { path, .. } | Self::Touch { path, .. } | Self::Summary { path, .. } => {
                path
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingContent {
    pub path: String,
    pub extension: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingEmbedding {
    pub file_id: i64,
    pub summary: String,
}

pub fn normalized_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}
