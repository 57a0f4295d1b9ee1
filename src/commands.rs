use chrono::{SubsecRound, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, ConfigError};
use crate::db::{Db, ReceiptStore};
use crate::delimited::{self, CsvOptions};
use crate::error::{AppError, ExportError};
use crate::excel;
use crate::extract::{extract_json, value_at_path};
use crate::ocr::{CollaboratorError, MessagesClient, VisionModel};
use crate::projection::{project_with, ProjectionOptions};
use crate::prompt::build_receipt_prompt;
use crate::types::{BatchScanResult, FailedScan, ItemStatus, ReceiptRecord, StoredReceipt};
use crate::validation::validate;

/// Shown instead of the raw upstream error when the model rejects our credentials.
pub const CREDENTIALS_GUIDANCE: &str =
    "Model credentials expired or were rejected. Refresh RECEIPT_MODEL_API_KEY in your .env and try again.";

/// Everything a command needs: settings, the receipt store and (when configured) the model.
pub struct AppState {
    pub config: Config,
    store: Box<dyn ReceiptStore>,
    model: Option<Box<dyn VisionModel>>,
}

impl AppState {
    pub fn new(config: Config, store: Box<dyn ReceiptStore>, model: Option<Box<dyn VisionModel>>) -> Self {
        AppState { config, store, model }
    }

    /// Open the SQLite store at the configured path and build the HTTP model client if
    /// credentials are present. Missing credentials only fail transcription.
    pub fn open(config: Config) -> Result<Self, AppError> {
        let db = Db::open(&config.db_path)?;
        let model: Option<Box<dyn VisionModel>> = match config.model_settings() {
            Ok(settings) => Some(Box::new(MessagesClient::new(settings)?)),
            Err(e) => {
                tracing::debug!(error = %e, "vision model not configured");
                None
            }
        };
        Ok(Self::new(config, Box::new(db), model))
    }

    pub fn store(&self) -> &dyn ReceiptStore {
        self.store.as_ref()
    }

    fn model(&self) -> Result<&dyn VisionModel, AppError> {
        match &self.model {
            Some(model) => Ok(model.as_ref()),
            None => {
                let missing = self
                    .config
                    .model_settings()
                    .err()
                    .unwrap_or(ConfigError::Missing("RECEIPT_MODEL_API_KEY"));
                Err(CollaboratorError::from(missing).into())
            }
        }
    }
}

pub fn model_status(state: &AppState) -> &'static str {
    if state.model.is_some() {
        "configured"
    } else {
        state.config.model_status()
    }
}

/// An accepted upload: name, media type and contents.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub file_name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

/// Accept only existing image files (by extension) no larger than `max_bytes`.
pub fn check_image_file(path: &Path, max_bytes: u64) -> Result<ImageFile, AppError> {
    if !path.exists() {
        return Err(AppError::InvalidInput("File not found.".to_string()));
    }
    let media_type = mime_guess::from_path(path)
        .first()
        .filter(|m| m.type_() == mime_guess::mime::IMAGE)
        .ok_or_else(|| AppError::InvalidInput("File must be an image".to_string()))?;
    let metadata = fs::metadata(path).map_err(|e| AppError::InvalidInput(format!("Could not open: {}", e)))?;
    if metadata.len() > max_bytes {
        return Err(AppError::InvalidInput(format!(
            "Image too large (max {} bytes)",
            max_bytes
        )));
    }
    let bytes = fs::read(path).map_err(|e| AppError::InvalidInput(format!("Could not read file: {}", e)))?;
    let file_name = path
        .file_name()
        .and_then(|o| o.to_str())
        .unwrap_or("")
        .to_string();
    Ok(ImageFile {
        file_name,
        media_type: media_type.essence_str().to_string(),
        bytes,
    })
}

/// Model text → JSON → validated record.
pub fn parse_model_output(text: &str) -> Result<ReceiptRecord, AppError> {
    let json = extract_json(text)?;
    tracing::debug!(
        merchant = ?value_at_path(&json, "merchant.name"),
        total = ?value_at_path(&json, "totals.total"),
        "model JSON extracted"
    );
    Ok(validate(&json).into_result()?)
}

fn run_pipeline(state: &AppState, image: &[u8], media_type: &str) -> Result<ReceiptRecord, AppError> {
    let model = state.model()?;
    let text = model.transcribe(image, media_type, &build_receipt_prompt())?;
    parse_model_output(&text)
}

/// Run the model on `image` and record the outcome on `item`, then persist it.
fn process(state: &AppState, item: &mut StoredReceipt, image: &[u8]) -> Result<(), AppError> {
    tracing::info!(receipt_id = %item.id, file = %item.file_name, "transcribing receipt");
    match run_pipeline(state, image, &item.media_type) {
        Ok(record) => {
            item.status = ItemStatus::Done;
            item.error = None;
            item.details.clear();
            item.receipt = Some(record);
            tracing::info!(receipt_id = %item.id, "receipt transcribed");
        }
        Err(err) => {
            item.status = ItemStatus::Error;
            item.receipt = None;
            item.details = match &err {
                AppError::Schema(violations) => violations.0.clone(),
                _ => Vec::new(),
            };
            item.error = Some(if err.is_credentials_expired() {
                CREDENTIALS_GUIDANCE.to_string()
            } else if matches!(err, AppError::Schema(_)) {
                "Model returned JSON that didn't match the expected schema".to_string()
            } else {
                err.to_string()
            });
            tracing::warn!(
                receipt_id = %item.id,
                violation_count = item.details.len(),
                error = %err,
                "receipt transcription failed"
            );
        }
    }
    state.store.put(item)?;
    Ok(())
}

/// Store the image, then transcribe it. A failed transcription is kept with status
/// `error` and still returned; only bad input or storage failures are errors here.
pub fn transcribe_file(state: &AppState, path: &Path) -> Result<StoredReceipt, AppError> {
    let image = check_image_file(path, state.config.max_image_bytes)?;
    let mut item = StoredReceipt {
        id: uuid::Uuid::new_v4().to_string(),
        created_at: Utc::now().trunc_subsecs(3),
        file_name: image.file_name,
        media_type: image.media_type,
        size: image.bytes.len() as u64,
        status: ItemStatus::Processing,
        error: None,
        details: Vec::new(),
        receipt: None,
    };
    state.store.put_image(&item.id, &image.bytes)?;
    state.store.put(&item)?;
    process(state, &mut item, &image.bytes)?;
    Ok(item)
}

/// Re-run transcription from the stored image.
pub fn retry_item(state: &AppState, id: &str) -> Result<StoredReceipt, AppError> {
    let mut item = get_item(state, id)?;
    let image = state
        .store
        .get_image(id)?
        .ok_or_else(|| AppError::NotFound(format!("{} (image)", id)))?;
    item.status = ItemStatus::Processing;
    item.error = None;
    item.details.clear();
    state.store.put(&item)?;
    process(state, &mut item, &image)?;
    Ok(item)
}

fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|o| o.to_str())
        .unwrap_or("")
        .to_string()
}

/// Transcribe up to `concurrency` files at a time; returns both successful and failed results.
pub fn batch_transcribe(state: &AppState, paths: &[String]) -> BatchScanResult {
    let mut successes = Vec::new();
    let mut failures = Vec::new();

    for chunk in paths.chunks(state.config.concurrency.max(1)) {
        let results: Vec<(&String, Result<StoredReceipt, AppError>)> = std::thread::scope(|s| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|path| (path, s.spawn(move || transcribe_file(state, Path::new(path)))))
                .collect();
            handles
                .into_iter()
                .map(|(path, h)| {
                    let result = h
                        .join()
                        .unwrap_or_else(|_| Err(AppError::InvalidInput("Transcription worker panicked".to_string())));
                    (path, result)
                })
                .collect()
        });

        for (path, result) in results {
            match result {
                Ok(item) if item.status == ItemStatus::Done => successes.push(item),
                Ok(item) => failures.push(FailedScan {
                    file_path: path.clone(),
                    file_name: item.file_name,
                    error: item.error.unwrap_or_default(),
                }),
                Err(e) => failures.push(FailedScan {
                    file_path: path.clone(),
                    file_name: file_name_of(path),
                    error: e.to_string(),
                }),
            }
        }
    }

    tracing::info!(succeeded = successes.len(), failed = failures.len(), "batch finished");
    BatchScanResult { successes, failures }
}

pub fn list_items(state: &AppState) -> Result<Vec<StoredReceipt>, AppError> {
    Ok(state.store.list()?)
}

pub fn get_item(state: &AppState, id: &str) -> Result<StoredReceipt, AppError> {
    state
        .store
        .get(id)?
        .ok_or_else(|| AppError::NotFound(id.to_string()))
}

pub fn delete_item(state: &AppState, id: &str) -> Result<(), AppError> {
    if state.store.delete(id)? {
        Ok(())
    } else {
        Err(AppError::NotFound(id.to_string()))
    }
}

/// Done items, oldest first so the running number follows upload order.
pub fn exportable_items(state: &AppState) -> Result<Vec<StoredReceipt>, AppError> {
    let mut items: Vec<StoredReceipt> = state
        .store
        .list()?
        .into_iter()
        .rev()
        .filter(StoredReceipt::is_exportable)
        .collect();
    items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(items)
}

/// Use `requested` (forcing the extension) or pick `Receipts_<timestamp>[_n].<ext>` in `dir`.
pub fn resolve_export_path(dir: &Path, requested: Option<&Path>, extension: &str) -> Result<PathBuf, ExportError> {
    if let Some(p) = requested {
        let mut pb = p.to_path_buf();
        let matches = pb
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if !matches {
            pb.set_extension(extension);
        }
        if let Some(parent) = pb.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ExportError::Path(format!("Folder does not exist: {}", parent.display())));
            }
        }
        return Ok(pb);
    }

    fs::create_dir_all(dir)?;
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let mut p = dir.join(format!("Receipts_{}.{}", stamp, extension));
    let mut counter = 2u32;
    while p.exists() {
        p = dir.join(format!("Receipts_{}_{}.{}", stamp, counter, extension));
        counter += 1;
    }
    Ok(p)
}

pub fn export_csv(state: &AppState, out: Option<&Path>, options: &CsvOptions) -> Result<PathBuf, AppError> {
    let items = exportable_items(state)?;
    let table = project_with(&items, &ProjectionOptions::default());
    let bytes = delimited::to_csv_bytes(&table, options)?;
    let path = resolve_export_path(&state.config.export_dir, out, "csv")?;
    fs::write(&path, bytes).map_err(ExportError::from)?;
    tracing::info!(rows = items.len(), columns = table.columns.len(), path = %path.display(), "exported CSV");
    Ok(path)
}

pub fn export_xlsx(state: &AppState, out: Option<&Path>, sheet: Option<&str>) -> Result<PathBuf, AppError> {
    let items = exportable_items(state)?;
    let table = project_with(&items, &ProjectionOptions::default());
    let bytes = excel::table_to_xlsx_bytes(&table, sheet)?;
    let path = resolve_export_path(&state.config.export_dir, out, "xlsx")?;
    fs::write(&path, bytes).map_err(ExportError::from)?;
    tracing::info!(rows = items.len(), columns = table.columns.len(), path = %path.display(), "exported Excel");
    Ok(path)
}
