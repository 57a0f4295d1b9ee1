use std::path::PathBuf;

use thiserror::Error;

pub const DEFAULT_MODEL_ENDPOINT: &str = "https://api.anthropic.com";
pub const DEFAULT_MAX_TOKENS: u32 = 1200;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 8 * 1024 * 1024;
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_LOG_FILTER: &str = "info";

const APP_DIR_NAME: &str = "receipt-scanner";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} not set in .env")]
    Missing(&'static str),

    #[error("{name} must be a positive integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
}

/// Everything needed to call the vision model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSettings {
    pub api_key: String,
    pub endpoint: String,
    pub model_id: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model_id: Option<String>,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_image_bytes: u64,
    pub concurrency: usize,
    pub db_path: PathBuf,
    pub export_dir: PathBuf,
    pub log_filter: String,
}

/// Load `.env` from the working directory, then from the app data folder so installed
/// users can keep credentials there. Variables already set win.
fn load_env() {
    let _ = dotenvy::dotenv();
    if let Some(dir) = app_data_dir() {
        let env_path = dir.join(".env");
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
        }
    }
}

pub fn app_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(APP_DIR_NAME))
}

/// Downloads folder if available, else Desktop, else the working directory.
pub fn default_export_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::desktop_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_positive<T: std::str::FromStr + PartialOrd + Default>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match non_blank(value) {
        None => Ok(default),
        Some(v) => match v.parse::<T>() {
            Ok(n) if n > T::default() => Ok(n),
            _ => Err(ConfigError::InvalidNumber { name, value: v }),
        },
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        load_env();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoint = non_blank(lookup("RECEIPT_MODEL_ENDPOINT"))
            .unwrap_or_else(|| DEFAULT_MODEL_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();
        let db_path = non_blank(lookup("RECEIPT_DB_PATH"))
            .map(PathBuf::from)
            .or_else(|| app_data_dir().map(|d| d.join("receipts.db")))
            .unwrap_or_else(|| PathBuf::from("receipts.db"));
        let export_dir = non_blank(lookup("RECEIPT_EXPORT_DIR"))
            .map(PathBuf::from)
            .unwrap_or_else(default_export_dir);

        Ok(Config {
            api_key: non_blank(lookup("RECEIPT_MODEL_API_KEY")),
            endpoint,
            model_id: non_blank(lookup("RECEIPT_MODEL_ID")),
            max_tokens: parse_positive("RECEIPT_MODEL_MAX_TOKENS", lookup("RECEIPT_MODEL_MAX_TOKENS"), DEFAULT_MAX_TOKENS)?,
            timeout_secs: parse_positive("RECEIPT_MODEL_TIMEOUT_SECS", lookup("RECEIPT_MODEL_TIMEOUT_SECS"), DEFAULT_TIMEOUT_SECS)?,
            max_image_bytes: parse_positive("RECEIPT_MAX_IMAGE_BYTES", lookup("RECEIPT_MAX_IMAGE_BYTES"), DEFAULT_MAX_IMAGE_BYTES)?,
            concurrency: parse_positive("RECEIPT_CONCURRENCY", lookup("RECEIPT_CONCURRENCY"), DEFAULT_CONCURRENCY)?,
            db_path,
            export_dir,
            log_filter: non_blank(lookup("RECEIPT_LOG")).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        })
    }

    /// Model credentials are only required once a transcription is attempted.
    pub fn model_settings(&self) -> Result<ModelSettings, ConfigError> {
        let api_key = self.api_key.clone().ok_or(ConfigError::Missing("RECEIPT_MODEL_API_KEY"))?;
        let model_id = self.model_id.clone().ok_or(ConfigError::Missing("RECEIPT_MODEL_ID"))?;
        Ok(ModelSettings {
            api_key,
            endpoint: self.endpoint.clone(),
            model_id,
            max_tokens: self.max_tokens,
            timeout_secs: self.timeout_secs,
        })
    }

    pub fn model_status(&self) -> &'static str {
        if self.model_settings().is_ok() {
            "configured"
        } else {
            "not_configured"
        }
    }
}
