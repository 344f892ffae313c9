use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::data::{repository, BatchWriter, Store, DEEP_SCAN_BATCH_SIZE};
use crate::error::AppError;
use crate::models::file_record::FileWrite;
use crate::models::progress::{percent, ProgressSink};
use crate::services::supervised::{run_with_deadline, TaskOutcome};
use crate::services::text_cleaner::{clean_text, is_markup_extension, strip_rtf};

pub const MAX_READ_SIZE: usize = 50 * 1024;
pub const FILE_TIMEOUT: Duration = Duration::from_secs(2);
pub const MAX_PDF_PAGES: usize = 5;
const MIN_IMAGE_DIMENSION: u32 = 64;
const DOCX_BODY: &str = "word/document.xml";
const PROGRESS_EVERY: usize = 100;

/// Text recognition for image files, supplied by the host.
pub trait ImageTextExtractor: Send + Sync {
    fn extract_text(&self, path: &Path) -> Result<String, AppError>;
}

fn read_capped(path: &Path) -> Result<String, AppError> {
    let mut buf = Vec::with_capacity(8 * 1024);
    File::open(path)?
        .take(MAX_READ_SIZE as u64)
        .read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn read_text(path: &Path, extension: &str) -> Result<String, AppError> {
    let raw = read_capped(path)?;
    if extension == ".rtf" {
        return Ok(clean_text(&strip_rtf(&raw), false));
    }
    Ok(clean_text(&raw, is_markup_extension(extension)))
}

fn read_pdf(path: &Path) -> Result<String, AppError> {
    let doc = lopdf::Document::load(path)
        .map_err(|e| AppError::Extraction(format!("pdf load: {e}")))?;

    let mut text = String::new();
    for page in doc.get_pages().into_keys().take(MAX_PDF_PAGES) {
        match doc.extract_text(&[page]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push(' ');
            }
            Err(e) => debug!(page, error = %e, "pdf page has no text"),
        }
        if text.len() > MAX_READ_SIZE {
            break;
        }
    }
    Ok(clean_text(&text, false))
}

fn read_docx(path: &Path) -> Result<String, AppError> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)
        .map_err(|e| AppError::Extraction(format!("docx container: {e}")))?;
    let body = archive
        .by_name(DOCX_BODY)
        .map_err(|e| AppError::Extraction(format!("docx body: {e}")))?;

    let mut buf = Vec::new();
    body.take(MAX_READ_SIZE as u64).read_to_end(&mut buf)?;
    Ok(clean_text(&String::from_utf8_lossy(&buf), true))
}

fn read_image(path: &Path, extractor: &dyn ImageTextExtractor) -> Result<String, AppError> {
    let (width, height) = image::image_dimensions(path)
        .map_err(|e| AppError::Extraction(format!("image header: {e}")))?;
    if width < MIN_IMAGE_DIMENSION || height < MIN_IMAGE_DIMENSION {
        return Ok(String::new());
    }
    Ok(clean_text(&extractor.extract_text(path)?, false))
}

/// Reads and normalizes the content of one file by extension.
///
/// Passing `images` routes the file to text recognition instead.
pub fn extract_content(
    path: &Path,
    extension: &str,
    images: Option<&dyn ImageTextExtractor>,
) -> Result<String, AppError> {
    let mut text = match (extension, images) {
        (".pdf", _) => read_pdf(path)?,
        (".docx", _) => read_docx(path)?,
        (_, Some(extractor)) => read_image(path, extractor)?,
        _ => read_text(path, extension)?,
    };
    truncate_at_boundary(&mut text, MAX_READ_SIZE);
    Ok(text)
}

fn truncate_at_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeepScanReport {
    pub candidates: usize,
    pub extracted: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub write_failures: usize,
    pub cancelled: bool,
}

/// Content extraction over every file whose summary is unset.
pub struct DeepScan {
    images: Option<Arc<dyn ImageTextExtractor>>,
    timeout: Duration,
}

impl DeepScan {
    pub fn new(images: Option<Arc<dyn ImageTextExtractor>>) -> Self {
        Self {
            images,
            timeout: FILE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn wants(&self, settings: &Settings, extension: &str) -> bool {
        if settings.is_image(extension) {
            return self.images.is_some();
        }
        settings.is_content_readable(extension)
    }

    pub fn run(
        &self,
        store: &Store,
        settings: &Settings,
        cancel: &AtomicBool,
        progress: &dyn ProgressSink,
    ) -> Result<DeepScanReport, AppError> {
        let pending: Vec<_> = store
            .with_conn(repository::files_needing_content)?
            .into_iter()
            .filter(|p| self.wants(settings, &p.extension))
            .collect();

        let mut report = DeepScanReport {
            candidates: pending.len(),
            ..DeepScanReport::default()
        };
        info!(candidates = report.candidates, "deep scan started");
        if pending.is_empty() {
            return Ok(report);
        }

        let mut writer = BatchWriter::new(store, DEEP_SCAN_BATCH_SIZE);
        for (i, item) in pending.into_iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                report.cancelled = true;
                break;
            }

            let path = item.path.clone();
            let extension = item.extension.clone();
            let images = if settings.is_image(&extension) {
                self.images.clone()
            } else {
                None
            };
            let outcome = run_with_deadline(self.timeout, move || {
                extract_content(Path::new(&path), &extension, images.as_deref())
            });

            // Failures store "" so the file is not retried until its mtime moves.
            let summary = match outcome {
                TaskOutcome::Completed(text) => {
                    report.extracted += 1;
                    text
                }
                TaskOutcome::TimedOut => {
                    warn!(path = %item.path, "extraction timed out");
                    report.timed_out += 1;
                    String::new()
                }
                TaskOutcome::Failed(message) => {
                    debug!(path = %item.path, error = %message, "extraction failed");
                    report.failed += 1;
                    String::new()
                }
            };
            writer.push(FileWrite::Summary {
                path: item.path.clone(),
                summary,
            })?;

            let done = i + 1;
            if done % PROGRESS_EVERY == 0 || done == report.candidates {
                let name = Path::new(&item.path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                progress.emit(
                    "deep_scan",
                    &format!("Reading {name}"),
                    percent(done, report.candidates),
                );
            }
        }

        let (_, write_failures) = writer.finish()?;
        report.write_failures = write_failures;
        info!(
            extracted = report.extracted,
            timed_out = report.timed_out,
            failed = report.failed,
            cancelled = report.cancelled,
            "deep scan finished"
        );
        Ok(report)
    }
}
