//! Flatten stored receipts into a rectangular table for export.
//!
//! The column set is closed before any row is built: the fixed columns come first, then
//! two columns per tax rate found anywhere in the input. Every row carries exactly one
//! cell per column.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::types::{ItemStatus, ReceiptRecord, StoredReceipt, TaxRateEntry};

pub const FIXED_COLUMNS: &[&str] = &[
    "no",
    "id",
    "status",
    "created_at",
    "file_name",
    "document_type",
    "merchant_name",
    "merchant_tax_office",
    "merchant_tax_number",
    "receipt_number",
    "date",
    "time",
    "currency",
    "payment_method",
    "subtotal",
    "tax",
    "tip",
    "discount",
    "total",
    "line_items_count",
    "line_items",
    "notes",
    "error",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Integer(i64),
    /// Structured data, rendered as compact JSON text.
    Json(Value),
}

impl Cell {
    pub fn render(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => n.to_string(),
            Cell::Integer(n) => n.to_string(),
            Cell::Json(v) => v.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }
}

impl From<Option<f64>> for Cell {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Cell::Empty, Cell::Number)
    }
}

impl From<Option<&str>> for Cell {
    fn from(value: Option<&str>) -> Self {
        match value {
            Some(s) if !s.is_empty() => Cell::Text(s.to_string()),
            _ => Cell::Empty,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl ExportTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let col = self.column_index(column)?;
        self.rows.get(row)?.get(col)
    }
}

#[derive(Debug, Clone)]
pub struct ProjectionOptions {
    /// Decimal separator used in rate labels ("8,5%"). Stored values are unaffected.
    pub rate_decimal_separator: char,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        ProjectionOptions {
            rate_decimal_separator: ',',
        }
    }
}

/// Human-readable rate label: 1 → "1%", 8.5 → "8,5%".
pub fn rate_label(rate: f64, options: &ProjectionOptions) -> String {
    let text = rate.to_string();
    let text = if options.rate_decimal_separator == '.' {
        text
    } else {
        text.replace('.', &options.rate_decimal_separator.to_string())
    };
    format!("{text}%")
}

/// The (matrah, tutar) column names for one rate.
pub fn rate_columns(rate: f64, options: &ProjectionOptions) -> (String, String) {
    let label = rate_label(rate, options);
    (format!("KDV {label} matrah"), format!("KDV {label} tutar"))
}

/// Distinct rates across every receipt, ascending.
pub fn discover_rates(items: &[StoredReceipt]) -> Vec<f64> {
    let mut rates: Vec<f64> = items
        .iter()
        .filter_map(|item| item.receipt.as_ref())
        .flat_map(|receipt| receipt.tax_rates.iter().map(|entry| entry.rate))
        .collect();
    rates.sort_by(|a, b| a.total_cmp(b));
    rates.dedup_by(|a, b| a == b);
    rates
}

pub fn project(items: &[StoredReceipt]) -> ExportTable {
    project_with(items, &ProjectionOptions::default())
}

/// Build the export table. Rows follow input order; sort the input first for a
/// different order.
pub fn project_with(items: &[StoredReceipt], options: &ProjectionOptions) -> ExportTable {
    let rates = discover_rates(items);

    let mut columns: Vec<String> = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect();
    for &rate in &rates {
        let (base, amount) = rate_columns(rate, options);
        columns.push(base);
        columns.push(amount);
    }

    let rows = items
        .iter()
        .enumerate()
        .map(|(idx, item)| build_row(idx + 1, item, &rates))
        .collect();

    ExportTable { columns, rows }
}

fn build_row(no: usize, item: &StoredReceipt, rates: &[f64]) -> Vec<Cell> {
    let mut row = Vec::with_capacity(FIXED_COLUMNS.len() + rates.len() * 2);
    row.push(Cell::Integer(no as i64));
    row.push(Cell::Text(item.id.clone()));
    row.push(Cell::Text(item.status.as_str().to_string()));
    row.push(Cell::Text(
        item.created_at
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    ));
    row.push(Cell::from(Some(item.file_name.as_str())));

    match &item.receipt {
        Some(receipt) => push_receipt_cells(&mut row, receipt),
        None => row.resize(FIXED_COLUMNS.len() - 1, Cell::Empty),
    }

    let error = match item.status {
        ItemStatus::Error => item.error.as_deref(),
        _ => None,
    };
    row.push(Cell::from(error));

    for &rate in rates {
        let (base, amount) = match &item.receipt {
            Some(receipt) => first_values_for_rate(&receipt.tax_rates, rate),
            None => (None, None),
        };
        row.push(Cell::from(base));
        row.push(Cell::from(amount));
    }
    row
}

/// Cells from `document_type` through `notes`.
fn push_receipt_cells(row: &mut Vec<Cell>, receipt: &ReceiptRecord) {
    let merchant = receipt.merchant.as_ref();
    let transaction = receipt.transaction.as_ref();
    let totals = receipt.totals.clone().unwrap_or_default();

    row.push(Cell::Text(receipt.document_type.as_str().to_string()));
    row.push(Cell::from(merchant.map(|m| m.name.as_str())));
    row.push(Cell::from(merchant.and_then(|m| m.tax_office.as_deref())));
    row.push(Cell::from(merchant.and_then(|m| m.tax_number.as_deref())));
    row.push(Cell::from(transaction.and_then(|t| t.receipt_number.as_deref())));
    row.push(match transaction.and_then(|t| t.date.as_deref()) {
        Some(date) => Cell::from(Some(normalize_date_dmy(date).as_str())),
        None => Cell::Empty,
    });
    row.push(Cell::from(transaction.and_then(|t| t.time.as_deref())));
    row.push(Cell::from(transaction.and_then(|t| t.currency.as_deref())));
    row.push(Cell::from(transaction.and_then(|t| t.payment_method.as_deref())));
    row.push(Cell::from(totals.subtotal));
    row.push(Cell::from(totals.tax));
    row.push(Cell::from(totals.tip));
    row.push(Cell::from(totals.discount));
    row.push(Cell::from(totals.total));
    row.push(Cell::Integer(receipt.line_items.len() as i64));
    row.push(if receipt.line_items.is_empty() {
        Cell::Empty
    } else {
        json_cell(&receipt.line_items)
    });
    row.push(if receipt.notes.is_empty() {
        Cell::Empty
    } else {
        json_cell(&receipt.notes)
    });
}

fn json_cell<T: serde::Serialize>(value: &T) -> Cell {
    serde_json::to_value(value).map_or(Cell::Empty, |v| Cell::Json(whole_numbers_as_integers(v)))
}

/// `1.0` becomes `1` so amounts read the same in JSON cells as in number cells.
fn whole_numbers_as_integers(value: Value) -> Value {
    const EXACT: f64 = 9_007_199_254_740_992.0;
    match value {
        Value::Number(n) if n.as_i64().is_none() && n.as_u64().is_none() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() <= EXACT => Value::from(f as i64),
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(whole_numbers_as_integers).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, whole_numbers_as_integers(v)))
                .collect(),
        ),
        other => other,
    }
}

/// First non-empty matrah and first non-empty tax amount among entries at `rate`;
/// later duplicates are ignored.
fn first_values_for_rate(entries: &[TaxRateEntry], rate: f64) -> (Option<f64>, Option<f64>) {
    let mut at_rate = entries.iter().filter(|e| e.rate == rate);
    let mut base = None;
    let mut amount = None;
    for entry in &mut at_rate {
        base = base.or(entry.taxable_amount);
        amount = amount.or(entry.tax_amount);
        if base.is_some() && amount.is_some() {
            break;
        }
    }
    (base, amount)
}

fn date_parts() -> &'static Regex {
    static DATE: OnceLock<Regex> = OnceLock::new();
    DATE.get_or_init(|| {
        Regex::new(r"(\d{1,4})\D+(\d{1,2})\D+(\d{1,4})").expect("date pattern is valid")
    })
}

/// Rewrite common receipt dates (YYYY-MM-DD, DD.MM.YYYY, DD/MM/YY) as DD/MM/YYYY.
/// Anything unrecognised is returned trimmed but otherwise untouched.
pub fn normalize_date_dmy(input: &str) -> String {
    let s = input.trim();
    let Some(caps) = date_parts().captures(s) else {
        return s.to_string();
    };
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let (Some(a), Some(b), Some(c)) = (part(1), part(2), part(3)) else {
        return s.to_string();
    };

    if a >= 1900 {
        return format!("{c:02}/{b:02}/{a}");
    }
    let year = if c < 100 { 2000 + c } else { c };
    format!("{a:02}/{b:02}/{year}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LineItem, Merchant, Totals, Transaction};
    use chrono::{TimeZone, Utc};

    fn entry(rate: f64, base: Option<f64>, amount: Option<f64>) -> TaxRateEntry {
        TaxRateEntry {
            rate,
            taxable_amount: base,
            tax_amount: amount,
        }
    }

    fn done(id: &str, receipt: ReceiptRecord) -> StoredReceipt {
        StoredReceipt {
            id: id.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
            file_name: format!("{id}.jpg"),
            media_type: "image/jpeg".into(),
            size: 1024,
            status: ItemStatus::Done,
            error: None,
            details: vec![],
            receipt: Some(receipt),
        }
    }

    fn with_rates(id: &str, rates: Vec<TaxRateEntry>) -> StoredReceipt {
        done(
            id,
            ReceiptRecord {
                tax_rates: rates,
                ..Default::default()
            },
        )
    }

    #[test]
    fn discovers_rate_columns_across_records() {
        let items = vec![
            with_rates("a", vec![entry(1.0, Some(495.05), Some(4.95)), entry(10.0, None, Some(3.0))]),
            with_rates("b", vec![entry(10.0, Some(100.0), Some(10.0)), entry(20.0, Some(50.0), Some(10.0))]),
            with_rates("c", vec![entry(1.0, None, Some(0.5))]),
        ];
        let options = ProjectionOptions::default();
        let table = project(&items);

        let dynamic: Vec<&str> = table.columns[FIXED_COLUMNS.len()..]
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(
            dynamic,
            vec![
                "KDV 1% matrah",
                "KDV 1% tutar",
                "KDV 10% matrah",
                "KDV 10% tutar",
                "KDV 20% matrah",
                "KDV 20% tutar",
            ]
        );

        let (base20, amount20) = rate_columns(20.0, &options);
        assert_eq!(table.cell(0, &base20), Some(&Cell::Empty));
        assert_eq!(table.cell(0, &amount20), Some(&Cell::Empty));
        assert_eq!(table.cell(2, &base20), Some(&Cell::Empty));
        assert_eq!(table.cell(1, &amount20), Some(&Cell::Number(10.0)));

        let (base10, amount10) = rate_columns(10.0, &options);
        assert_eq!(table.cell(0, &base10), Some(&Cell::Empty));
        assert_eq!(table.cell(0, &amount10), Some(&Cell::Number(3.0)));
        assert_eq!(table.cell(2, &amount10), Some(&Cell::Empty));

        for row in &table.rows {
            assert_eq!(row.len(), table.columns.len());
        }
    }

    #[test]
    fn duplicate_rate_keeps_first_values() {
        let items = vec![with_rates(
            "a",
            vec![entry(1.0, Some(495.05), Some(4.95)), entry(1.0, Some(999.0), Some(9.99))],
        )];
        let table = project(&items);
        assert_eq!(table.cell(0, "KDV 1% matrah"), Some(&Cell::Number(495.05)));
        assert_eq!(table.cell(0, "KDV 1% tutar"), Some(&Cell::Number(4.95)));
    }

    #[test]
    fn duplicate_rate_fills_gaps_per_field() {
        let items = vec![with_rates(
            "a",
            vec![entry(1.0, None, Some(4.95)), entry(1.0, Some(495.05), Some(9.99))],
        )];
        let table = project(&items);
        assert_eq!(table.cell(0, "KDV 1% matrah"), Some(&Cell::Number(495.05)));
        assert_eq!(table.cell(0, "KDV 1% tutar"), Some(&Cell::Number(4.95)));
    }

    #[test]
    fn fractional_rate_label() {
        let options = ProjectionOptions::default();
        assert_eq!(rate_label(8.5, &options), "8,5%");
        assert_eq!(rate_label(18.0, &options), "18%");
        let dotted = ProjectionOptions {
            rate_decimal_separator: '.',
        };
        assert_eq!(rate_label(8.5, &dotted), "8.5%");
    }

    #[test]
    fn fixed_columns_from_receipt() {
        let receipt = ReceiptRecord {
            merchant: Some(Merchant {
                name: "Cafe X".into(),
                address: None,
                phone: None,
                website: None,
                tax_office: Some("Beyoğlu".into()),
                tax_number: Some("1234567890".into()),
            }),
            transaction: Some(Transaction {
                date: Some("2024-01-15".into()),
                receipt_number: Some("0042".into()),
                ..Default::default()
            }),
            totals: Some(Totals {
                total: Some(12.5),
                ..Default::default()
            }),
            line_items: vec![LineItem {
                description: "Coffee".into(),
                quantity: Some(1.0),
                unit_price: None,
                total_price: Some(12.5),
            }],
            notes: vec!["paid by card".into(), "table 4".into()],
            ..Default::default()
        };
        let table = project(&[done("r1", receipt)]);

        assert_eq!(table.columns.len(), FIXED_COLUMNS.len());
        assert_eq!(table.cell(0, "no"), Some(&Cell::Integer(1)));
        assert_eq!(table.cell(0, "status").map(Cell::render).as_deref(), Some("done"));
        assert_eq!(
            table.cell(0, "created_at").map(Cell::render).as_deref(),
            Some("2024-03-01T09:30:00.000Z")
        );
        assert_eq!(table.cell(0, "merchant_name"), Some(&Cell::Text("Cafe X".into())));
        assert_eq!(
            table.cell(0, "merchant_tax_number").map(Cell::render).as_deref(),
            Some("1234567890")
        );
        assert_eq!(table.cell(0, "date").map(Cell::render).as_deref(), Some("15/01/2024"));
        assert_eq!(table.cell(0, "total"), Some(&Cell::Number(12.5)));
        assert_eq!(table.cell(0, "tip"), Some(&Cell::Empty));
        assert_eq!(table.cell(0, "line_items_count"), Some(&Cell::Integer(1)));
        assert_eq!(
            table.cell(0, "line_items").map(Cell::render).as_deref(),
            Some(r#"[{"description":"Coffee","quantity":1,"total_price":12.5}]"#)
        );
        assert_eq!(
            table.cell(0, "notes").map(Cell::render).as_deref(),
            Some(r#"["paid by card","table 4"]"#)
        );
        assert_eq!(table.cell(0, "error"), Some(&Cell::Empty));
    }

    #[test]
    fn notes_keep_their_boundaries() {
        let with_notes = |notes: &[&str]| ReceiptRecord {
            notes: notes.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        };
        let table = project(&[
            done("one", with_notes(&["a; b"])),
            done("two", with_notes(&["a", "b"])),
            done("none", with_notes(&[])),
        ]);
        let notes: Vec<String> = (0..3)
            .map(|r| table.cell(r, "notes").map(Cell::render).unwrap_or_default())
            .collect();
        assert_eq!(notes, vec![r#"["a; b"]"#, r#"["a","b"]"#, ""]);
        assert_eq!(table.cell(2, "notes"), Some(&Cell::Empty));
    }

    #[test]
    fn whole_amounts_in_line_items_render_as_integers() {
        let receipt = ReceiptRecord {
            line_items: vec![LineItem {
                description: "Su".into(),
                quantity: Some(2.0),
                unit_price: Some(0.5),
                total_price: Some(-3.0),
            }],
            ..Default::default()
        };
        let table = project(&[done("r1", receipt)]);
        assert_eq!(
            table.cell(0, "line_items").map(Cell::render).as_deref(),
            Some(r#"[{"description":"Su","quantity":2,"total_price":-3,"unit_price":0.5}]"#)
        );
    }

    #[test]
    fn failed_items_degrade_to_empty_cells() {
        let mut failed = done("bad", ReceiptRecord::default());
        failed.status = ItemStatus::Error;
        failed.receipt = None;
        failed.error = Some("Could not locate a JSON object in model output".into());
        let items = vec![failed, with_rates("ok", vec![entry(10.0, Some(1.0), Some(0.1))])];

        let table = project(&items);
        assert_eq!(table.rows[0].len(), table.columns.len());
        assert_eq!(table.cell(0, "no"), Some(&Cell::Integer(1)));
        assert_eq!(table.cell(0, "status").map(Cell::render).as_deref(), Some("error"));
        assert_eq!(table.cell(0, "merchant_name"), Some(&Cell::Empty));
        assert_eq!(table.cell(0, "KDV 10% tutar"), Some(&Cell::Empty));
        assert_eq!(
            table.cell(0, "error").map(Cell::render).as_deref(),
            Some("Could not locate a JSON object in model output")
        );
        assert_eq!(table.cell(1, "no"), Some(&Cell::Integer(2)));
    }

    #[test]
    fn row_order_follows_input() {
        let items = vec![with_rates("z", vec![]), with_rates("a", vec![])];
        let table = project(&items);
        assert_eq!(table.cell(0, "id").map(Cell::render).as_deref(), Some("z"));
        assert_eq!(table.cell(1, "id").map(Cell::render).as_deref(), Some("a"));
    }

    #[test]
    fn empty_collection_still_has_fixed_columns() {
        let table = project(&[]);
        assert_eq!(table.columns.len(), FIXED_COLUMNS.len());
        assert!(table.rows.is_empty());
    }

    #[test]
    fn date_normalization() {
        assert_eq!(normalize_date_dmy("2024-01-15"), "15/01/2024");
        assert_eq!(normalize_date_dmy("15.01.2024"), "15/01/2024");
        assert_eq!(normalize_date_dmy("5/1/24"), "05/01/2024");
        assert_eq!(normalize_date_dmy(" 15-01-2024 14:32 "), "15/01/2024");
        assert_eq!(normalize_date_dmy("yesterday"), "yesterday");
    }

    #[test]
    fn cell_rendering() {
        assert_eq!(Cell::Empty.render(), "");
        assert_eq!(Cell::Number(1234.56).render(), "1234.56");
        assert_eq!(Cell::Number(12.0).render(), "12");
        assert_eq!(Cell::Integer(3).render(), "3");
        assert_eq!(Cell::from(Some("")), Cell::Empty);
        assert_eq!(Cell::from(None::<f64>), Cell::Empty);
    }
}
