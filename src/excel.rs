use rust_xlsxwriter::{
    Color, DocProperties, ExcelDateTime, Format, FormatAlign, Workbook, Worksheet, XlsxError,
};

use crate::error::ExportError;
use crate::projection::{Cell, ExportTable};

pub const DEFAULT_SHEET_NAME: &str = "Receipts";

/// Excel rejects strings longer than this.
const MAX_CELL_CHARS: usize = 32_767;
const AMOUNT_WIDTH: f64 = 14.0;

/// Drop characters that are illegal in sheet XML (control chars except tab, newline, CR)
/// and cap the length at Excel's cell limit.
fn sanitize_cell(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars().take(MAX_CELL_CHARS) {
        let u = c as u32;
        if c == '\t' || c == '\n' || c == '\r' {
            out.push(c);
        } else if u < 0x20 || u == 0x7F || u == 0xFFFE || u == 0xFFFF {
            // skip control and invalid
        } else {
            out.push(c);
        }
    }
    out
}

fn write_text_cell_safe(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    text: &str,
    format: &Format,
) -> Result<(), XlsxError> {
    let cleaned = sanitize_cell(text);
    worksheet.write_string_with_format(row, col, &cleaned, format).map(|_| ())
}

fn write_number_cell_safe(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: f64,
    format: &Format,
) -> Result<(), XlsxError> {
    worksheet.write_number_with_format(row, col, value, format).map(|_| ())
}

/// Estimate column width from text length (char count × 1.2, clamped 10–50).
fn estimate_text_width(text: &str) -> f64 {
    let w = text.chars().count() as f64 * 1.2;
    w.clamp(10.0, 50.0)
}

/// Per-column widths: the widest of header and cells; amount columns fixed at 14.
fn calculate_export_column_widths(table: &ExportTable) -> Vec<f64> {
    let mut widths: Vec<f64> = table.columns.iter().map(|h| estimate_text_width(h)).collect();
    let mut numeric = vec![false; table.columns.len()];
    for row in &table.rows {
        for (col_idx, cell) in row.iter().enumerate().take(widths.len()) {
            match cell {
                Cell::Number(_) => numeric[col_idx] = true,
                Cell::Empty => {}
                other => {
                    let w = estimate_text_width(&other.render());
                    if w > widths[col_idx] {
                        widths[col_idx] = w;
                    }
                }
            }
        }
    }
    for (width, is_amount) in widths.iter_mut().zip(numeric) {
        if is_amount && *width < AMOUNT_WIDTH {
            *width = AMOUNT_WIDTH;
        }
    }
    widths
}

/// Fixed document properties so identical tables produce identical files.
fn fixed_properties() -> Result<DocProperties, XlsxError> {
    let created = ExcelDateTime::from_ymd(2000, 1, 1)?;
    Ok(DocProperties::new().set_creation_datetime(&created))
}

/// Render the table as an .xlsx workbook with one header row and one row per record.
pub fn table_to_xlsx_bytes(table: &ExportTable, sheet_name: Option<&str>) -> Result<Vec<u8>, ExportError> {
    let sheet_name = sheet_name.unwrap_or(DEFAULT_SHEET_NAME).trim();
    let sheet_name = if sheet_name.is_empty() { DEFAULT_SHEET_NAME } else { sheet_name };

    let mut workbook = Workbook::new();
    workbook.set_properties(&fixed_properties()?);
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name)?;

    let header_format = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(0x2563EB))
        .set_font_color(Color::RGB(0xFFFFFF));
    let text_format_wrap = Format::new().set_text_wrap();
    let amount_format = Format::new()
        .set_num_format("#,##0.00")
        .set_align(FormatAlign::Right);
    let integer_format = Format::new().set_align(FormatAlign::Right);

    for (col, &w) in calculate_export_column_widths(table).iter().enumerate() {
        worksheet.set_column_width(col as u16, w)?;
    }

    for (col, header) in table.columns.iter().enumerate() {
        write_text_cell_safe(worksheet, 0, col as u16, header, &header_format)?;
    }

    for (row_idx, cells) in table.rows.iter().enumerate() {
        let row = (row_idx + 1) as u32;
        let mut max_text_len = 0usize;
        for (col_idx, cell) in cells.iter().enumerate() {
            let col = col_idx as u16;
            match cell {
                Cell::Empty => {}
                Cell::Number(n) => write_number_cell_safe(worksheet, row, col, *n, &amount_format)?,
                Cell::Integer(n) => write_number_cell_safe(worksheet, row, col, *n as f64, &integer_format)?,
                other => {
                    let text = other.render();
                    max_text_len = max_text_len.max(text.chars().count());
                    write_text_cell_safe(worksheet, row, col, &text, &text_format_wrap)?;
                }
            }
        }
        // Set row height so wrapped text stays visible
        let row_height = if max_text_len > 80 {
            ((max_text_len as f64 / 50.0).ceil() * 15.0).min(100.0)
        } else if max_text_len > 40 {
            30.0
        } else {
            15.0
        };
        worksheet.set_row_height(row, row_height)?;
    }

    worksheet.set_freeze_panes(1, 0)?;
    Ok(workbook.save_to_buffer()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ExportTable {
        ExportTable {
            columns: vec!["no".into(), "merchant_name".into(), "total".into(), "line_items".into()],
            rows: vec![vec![
                Cell::Integer(1),
                Cell::Text("Cafe X".into()),
                Cell::Number(12.5),
                Cell::Json(serde_json::json!([{"description": "Coffee"}])),
            ]],
        }
    }

    #[test]
    fn sanitize_drops_control_chars() {
        assert_eq!(sanitize_cell("a\u{0}b\u{7}c\td\ne"), "abc\td\ne");
        assert_eq!(sanitize_cell("Tom & Jerry <3>"), "Tom & Jerry <3>");
        assert_eq!(sanitize_cell(&"x".repeat(40_000)).len(), MAX_CELL_CHARS);
    }

    #[test]
    fn widths_follow_content() {
        let widths = calculate_export_column_widths(&table());
        assert_eq!(widths.len(), 4);
        assert_eq!(widths[0], 10.0);
        assert_eq!(widths[2], AMOUNT_WIDTH);
        assert!(widths[1] >= estimate_text_width("merchant_name"));
    }

    #[test]
    fn writes_zip_container() {
        let bytes = table_to_xlsx_bytes(&table(), None).unwrap();
        assert!(bytes.starts_with(&[0x50, 0x4B, 0x03, 0x04]));
    }

    #[test]
    fn identical_tables_give_identical_bytes() {
        let a = table_to_xlsx_bytes(&table(), Some("Fişler")).unwrap();
        let b = table_to_xlsx_bytes(&table(), Some("Fişler")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_sheet_name_is_an_error() {
        let err = table_to_xlsx_bytes(&table(), Some("bad[name]")).unwrap_err();
        assert!(matches!(err, ExportError::Xlsx(_)));
    }

    #[test]
    fn workbook_reads_back_like_csv() {
        use crate::delimited::{to_csv_bytes, CsvOptions};
        use calamine::{open_workbook_from_rs, DataType, Reader, Xlsx};
        use std::io::Cursor;

        let table = ExportTable {
            columns: vec![
                "no".into(),
                "merchant_name".into(),
                "total".into(),
                "line_items".into(),
                "KDV 1% matrah".into(),
                "KDV 1% tutar".into(),
            ],
            rows: vec![
                vec![
                    Cell::Integer(1),
                    Cell::Text("Market \"A\", Şube 2".into()),
                    Cell::Number(1234.56),
                    Cell::Json(serde_json::json!([{"description": "Çay", "quantity": 2}])),
                    Cell::Number(495.05),
                    Cell::Number(4.95),
                ],
                vec![
                    Cell::Integer(2),
                    Cell::Text("Cafe X".into()),
                    Cell::Number(12.5),
                    Cell::Empty,
                    Cell::Empty,
                    Cell::Number(0.13),
                ],
            ],
        };

        let bytes = table_to_xlsx_bytes(&table, None).unwrap();
        let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes)).unwrap();
        let range = workbook.worksheet_range(DEFAULT_SHEET_NAME).unwrap();
        let from_xlsx: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(|c| c.as_string().unwrap_or_default()).collect())
            .collect();

        let csv = to_csv_bytes(&table, &CsvOptions { byte_order_mark: false }).unwrap();
        let from_csv: Vec<Vec<String>> = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(csv.as_slice())
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect();

        assert_eq!(from_xlsx.len(), 3);
        assert_eq!(from_xlsx, from_csv);
        assert_eq!(from_xlsx[0][5], "KDV 1% tutar");
        assert_eq!(from_xlsx[1][3], r#"[{"description":"Çay","quantity":2}]"#);
        assert_eq!(from_xlsx[2][3], "");
    }
}
