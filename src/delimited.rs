use csv::{QuoteStyle, Terminator, WriterBuilder};
use std::io::Write;

use crate::error::ExportError;
use crate::projection::ExportTable;

/// UTF-8 BOM; lets Excel on Windows pick the right encoding for Turkish characters.
const BYTE_ORDER_MARK: &str = "\u{feff}";

#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub byte_order_mark: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions {
            byte_order_mark: true,
        }
    }
}

/// Write the header row and one line per row. Fields containing a comma, quote or line
/// break are quoted with inner quotes doubled.
pub fn write_csv<W: Write>(table: &ExportTable, mut out: W, options: &CsvOptions) -> Result<W, ExportError> {
    if options.byte_order_mark {
        out.write_all(BYTE_ORDER_MARK.as_bytes())?;
    }

    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(out);

    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(|cell| cell.render()))?;
    }
    writer.flush()?;
    writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))
}

pub fn to_csv_bytes(table: &ExportTable, options: &CsvOptions) -> Result<Vec<u8>, ExportError> {
    write_csv(table, Vec::new(), options)
}
