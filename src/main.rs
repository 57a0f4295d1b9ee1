use clap::{Parser, Subcommand};
use std::path::PathBuf;

use receipt_scanner_lib::commands::{self, CREDENTIALS_GUIDANCE};
use receipt_scanner_lib::delimited::CsvOptions;
use receipt_scanner_lib::types::{ItemStatus, StoredReceipt};
use receipt_scanner_lib::{init_tracing, AppError, AppState, Config};

#[derive(Parser)]
#[command(name = "receipt-scanner")]
#[command(about = "Transcribe receipt images with a vision model and export them as CSV or Excel")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transcribe one or more receipt images
    Transcribe {
        /// Image files (jpg, png, webp, ...)
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Re-run transcription for a stored receipt
    Retry {
        /// Receipt id
        id: String,
    },
    /// List stored receipts, newest first
    List,
    /// Print one stored receipt as JSON
    Show {
        /// Receipt id
        id: String,
    },
    /// Delete a stored receipt and its image
    Delete {
        /// Receipt id
        id: String,
    },
    /// Export transcribed receipts to CSV
    ExportCsv {
        /// Output file (defaults to a timestamped file in the export folder)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Omit the UTF-8 byte order mark
        #[arg(long)]
        no_bom: bool,
    },
    /// Export transcribed receipts to an Excel workbook
    ExportXlsx {
        /// Output file (defaults to a timestamped file in the export folder)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Worksheet name
        #[arg(long)]
        sheet: Option<String>,
    },
    /// Show whether the vision model is configured
    Status,
}

fn print_item(item: &StoredReceipt) {
    let merchant = item
        .receipt
        .as_ref()
        .and_then(|r| r.merchant.as_ref())
        .map(|m| m.name.as_str())
        .unwrap_or("-");
    println!(
        "{}  {}  {:<10}  {}  {}",
        item.id,
        item.created_at.format("%Y-%m-%d %H:%M:%S"),
        item.status.as_str(),
        item.file_name,
        merchant
    );
    if let Some(err) = &item.error {
        println!("    error: {}", err);
        for violation in &item.details {
            println!("      {}", violation);
        }
    }
}

fn run(cli: Cli, state: &AppState) -> Result<bool, AppError> {
    let mut ok = true;
    match cli.command {
        Commands::Transcribe { paths } => {
            let result = commands::batch_transcribe(state, &paths);
            for item in &result.successes {
                print_item(item);
            }
            for failure in &result.failures {
                eprintln!("Failed {}: {}", failure.file_path, failure.error);
            }
            println!(
                "{} transcribed, {} failed",
                result.successes.len(),
                result.failures.len()
            );
            ok = result.failures.is_empty();
        }
        Commands::Retry { id } => {
            let item = commands::retry_item(state, &id)?;
            print_item(&item);
            ok = item.status == ItemStatus::Done;
        }
        Commands::List => {
            let items = commands::list_items(state)?;
            if items.is_empty() {
                println!("No receipts found.");
            }
            for item in &items {
                print_item(item);
            }
        }
        Commands::Show { id } => {
            let item = commands::get_item(state, &id)?;
            let json = serde_json::to_string_pretty(&item)
                .map_err(|e| AppError::InvalidInput(e.to_string()))?;
            println!("{}", json);
        }
        Commands::Delete { id } => {
            commands::delete_item(state, &id)?;
            println!("Deleted {}", id);
        }
        Commands::ExportCsv { out, no_bom } => {
            let options = CsvOptions {
                byte_order_mark: !no_bom,
            };
            let path = commands::export_csv(state, out.as_deref(), &options)?;
            println!("{}", path.display());
        }
        Commands::ExportXlsx { out, sheet } => {
            let path = commands::export_xlsx(state, out.as_deref(), sheet.as_deref())?;
            println!("{}", path.display());
        }
        Commands::Status => {
            println!("{}", commands::model_status(state));
        }
    }
    Ok(ok)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(&config.log_filter);

    let state = AppState::open(config)?;
    match run(cli, &state) {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) if e.is_credentials_expired() => {
            eprintln!("{}", CREDENTIALS_GUIDANCE);
            std::process::exit(1)
        }
        Err(e) => Err(e.into()),
    }
}
