use thiserror::Error;

use crate::db::StoreError;
use crate::extract::ExtractionError;
use crate::ocr::CollaboratorError;
use crate::validation::SchemaViolation;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Excel error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Path(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Receipt {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Schema(#[from] SchemaViolation),

    #[error(transparent)]
    Model(#[from] CollaboratorError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),
}

impl AppError {
    /// True when the model service rejected our credentials; callers show refresh
    /// guidance instead of a generic failure.
    pub fn is_credentials_expired(&self) -> bool {
        matches!(self, AppError::Model(e) if e.is_credentials_expired())
    }
}
