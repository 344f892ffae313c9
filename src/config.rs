use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::data::{repository, Store};
use crate::error::AppError;

const SETTINGS_KEY: &str = "settings";
pub const DATABASE_FILE: &str = "index.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStrategy {
    /// One vector per file from the leading words of the summary.
    #[default]
    Simple,
    /// Overlapping word windows, up to `max_chunks_per_file` vectors per file.
    #[serde(alias = "accurate")]
    Windowed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub embedding_strategy: EmbeddingStrategy,
    pub max_chunks_per_file: usize,
    /// Directory names pruned anywhere in the tree.
    #[serde(alias = "ignored_paths")]
    pub ignored_dirs: Vec<String>,
    /// Directory names pruned only directly below a scan root.
    pub root_ignored_dirs: Vec<String>,
    pub allowed_extensions: Vec<String>,
    pub image_extensions: Vec<String>,
    pub app_roots: Vec<PathBuf>,
    pub scan_roots: Vec<PathBuf>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            embedding_strategy: EmbeddingStrategy::Simple,
            max_chunks_per_file: 15,
            ignored_dirs: strings(&[
                "node_modules",
                ".git",
                "$RECYCLE.BIN",
                "System Volume Information",
            ]),
            root_ignored_dirs: strings(&["Windows", "Program Files", "Program Files (x86)"]),
            allowed_extensions: strings(&[".txt", ".md", ".markdown", ".pdf", ".docx", ".rtf"]),
            image_extensions: strings(&[".png", ".jpg", ".jpeg", ".bmp", ".gif", ".webp"]),
            app_roots: default_app_roots(),
            scan_roots: Vec::new(),
        }
    }
}

impl Settings {
    /// Reads the stored document, falling back to defaults when missing or unreadable.
    pub fn load(store: &Store) -> Self {
        let raw = match store.with_conn(|conn| repository::get_setting(conn, SETTINGS_KEY)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Self::default(),
            Err(e) => {
                warn!(error = %e, "failed to read settings, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "stored settings are corrupt, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, store: &Store) -> Result<(), AppError> {
        let raw = serde_json::to_string(self)?;
        store.with_conn(|conn| repository::set_setting(conn, SETTINGS_KEY, &raw))
    }

    pub fn is_content_readable(&self, extension: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }

    pub fn is_image(&self, extension: &str) -> bool {
        self.image_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }

    /// Chunk budget for the active strategy; simple mode always embeds once.
    pub fn effective_max_chunks(&self) -> usize {
        match self.embedding_strategy {
            EmbeddingStrategy::Simple => 1,
            EmbeddingStrategy::Windowed => self.max_chunks_per_file.max(1),
        }
    }
}

/// Start-menu folders on Windows; nothing elsewhere.
fn default_app_roots() -> Vec<PathBuf> {
    if !cfg!(windows) {
        return Vec::new();
    }
    ["ProgramData", "APPDATA"]
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .map(|base| {
            Path::new(&base)
                .join("Microsoft")
                .join("Windows")
                .join("Start Menu")
                .join("Programs")
        })
        .collect()
}

/// Per-user data directory, created on first use.
pub fn data_dir() -> Result<PathBuf, AppError> {
    let dirs = ProjectDirs::from("", "", "Anything")
        .ok_or_else(|| AppError::General("could not resolve a home directory".to_string()))?;
    let dir = dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn database_path() -> Result<PathBuf, AppError> {
    Ok(data_dir()?.join(DATABASE_FILE))
}
