pub mod commands;
pub mod config;
pub mod db;
pub mod delimited;
pub mod error;
pub mod excel;
pub mod extract;
pub mod numeric;
pub mod ocr;
pub mod projection;
pub mod prompt;
pub mod types;
pub mod validation;

pub use commands::AppState;
pub use config::Config;
pub use error::AppError;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the fmt subscriber. `RUST_LOG` wins over `default_filter`. Calling twice is harmless.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
