//! Strict receipt schema.
//!
//! Validation runs in two passes over the extracted JSON. The structural pass checks
//! that every object only carries known keys and that each field has the right shape,
//! producing a typed record whose amounts are still raw. The numeric pass then runs
//! every amount through [`crate::numeric::normalize`]. Problems from both passes are
//! collected, so a caller sees every violation from one model response at once.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::numeric::{self, RawAmount};
use crate::types::{
    DocumentType, LineItem, Merchant, ReceiptRecord, TaxRateEntry, Totals, Transaction,
};

pub const ROOT_FIELDS: &[&str] = &[
    "document_type",
    "merchant",
    "transaction",
    "totals",
    "tax_rates",
    "line_items",
    "notes",
];
pub const MERCHANT_FIELDS: &[&str] = &[
    "name",
    "address",
    "phone",
    "website",
    "tax_office",
    "tax_number",
];
pub const TRANSACTION_FIELDS: &[&str] = &[
    "date",
    "time",
    "receipt_number",
    "payment_method",
    "card_last4",
    "currency",
];
pub const TOTALS_FIELDS: &[&str] = &["subtotal", "tax", "tip", "discount", "total"];
pub const TAX_RATE_FIELDS: &[&str] = &["rate", "taxable_amount", "tax_amount"];
pub const LINE_ITEM_FIELDS: &[&str] = &["description", "quantity", "unit_price", "total_price"];

pub const ROOT_PATH: &str = "(root)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    UnknownField,
    Missing,
    EmptyString,
    WrongType,
    InvalidNumber,
    InvalidValue,
}

impl ViolationKind {
    fn default_message(self) -> &'static str {
        match self {
            Self::UnknownField => "unknown field",
            Self::Missing => "required field is missing",
            Self::EmptyString => "must not be empty",
            Self::WrongType => "wrong type",
            Self::InvalidNumber => "not a finite number",
            Self::InvalidValue => "value not allowed",
        }
    }
}

/// One problem found in a model response, addressed by its field path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{path}: {message}")]
pub struct FieldViolation {
    pub path: String,
    pub kind: ViolationKind,
    pub message: String,
}

impl FieldViolation {
    pub fn new(path: impl Into<String>, kind: ViolationKind) -> Self {
        Self::with_message(path, kind, kind.default_message())
    }

    pub fn with_message(
        path: impl Into<String>,
        kind: ViolationKind,
        message: impl Into<String>,
    ) -> Self {
        FieldViolation {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Every violation found in a rejected receipt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Model returned JSON that didn't match the expected schema ({} problem(s))", .0.len())]
pub struct SchemaViolation(pub Vec<FieldViolation>);

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Valid(ReceiptRecord),
    Invalid(Vec<FieldViolation>),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid(_))
    }

    pub fn into_result(self) -> Result<ReceiptRecord, SchemaViolation> {
        match self {
            ValidationOutcome::Valid(record) => Ok(record),
            ValidationOutcome::Invalid(violations) => Err(SchemaViolation(violations)),
        }
    }
}

/// An amount that passed the structural check but has not been normalized yet.
#[derive(Debug, Clone)]
struct PendingAmount<'a> {
    path: String,
    raw: RawAmount<'a>,
}

pub fn validate(json: &Value) -> ValidationOutcome {
    let mut structure = StructureCheck::default();
    let shaped = structure.receipt(json);

    let mut numeric_violations = Vec::new();
    let record = shaped.map_amounts(|pending| match numeric::normalize(pending.raw) {
        Ok(n) => Some(n),
        Err(e) => {
            numeric_violations.push(FieldViolation::with_message(
                pending.path,
                ViolationKind::InvalidNumber,
                e.to_string(),
            ));
            None
        }
    });

    let mut violations = structure.violations;
    violations.extend(numeric_violations);
    if violations.is_empty() {
        ValidationOutcome::Valid(record)
    } else {
        ValidationOutcome::Invalid(violations)
    }
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Present and not JSON null.
fn field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

#[derive(Default)]
struct StructureCheck {
    violations: Vec<FieldViolation>,
}

impl StructureCheck {
    fn push(&mut self, path: String, kind: ViolationKind) {
        self.violations.push(FieldViolation::new(path, kind));
    }

    fn push_with(&mut self, path: String, kind: ViolationKind, message: impl Into<String>) {
        self.violations
            .push(FieldViolation::with_message(path, kind, message));
    }

    fn receipt<'a>(&mut self, json: &'a Value) -> ReceiptRecord<PendingAmount<'a>> {
        let mut record = ReceiptRecord {
            document_type: DocumentType::default(),
            merchant: None,
            transaction: None,
            totals: None,
            tax_rates: Vec::new(),
            line_items: Vec::new(),
            notes: Vec::new(),
        };
        let Some(obj) = self.object(json, "", ROOT_FIELDS) else {
            return record;
        };

        if let Some(value) = field(obj, "document_type") {
            match value.as_str() {
                Some(s) => match DocumentType::parse(s) {
                    Some(t) => record.document_type = t,
                    None => self.push_with(
                        "document_type".into(),
                        ViolationKind::InvalidValue,
                        "expected one of receipt, invoice, other",
                    ),
                },
                None => self.push_with(
                    "document_type".into(),
                    ViolationKind::WrongType,
                    "expected string",
                ),
            }
        }

        record.merchant = field(obj, "merchant").and_then(|v| self.merchant(v));
        record.transaction = field(obj, "transaction").and_then(|v| self.transaction(v));
        record.totals = field(obj, "totals").and_then(|v| self.totals(v));
        record.tax_rates = self.array(obj, "tax_rates", |check, item, path| {
            check.tax_rate(item, &path)
        });
        record.line_items = self.array(obj, "line_items", |check, item, path| {
            check.line_item(item, &path)
        });
        record.notes = self.array(obj, "notes", |check, item, path| match item.as_str() {
            Some(s) => Some(s.to_string()),
            None => {
                check.push_with(path, ViolationKind::WrongType, "expected string");
                None
            }
        });

        record
    }

    /// Check that `value` is an object carrying only `allowed` keys. Every unknown key is
    /// reported; the object is still returned so its known fields get checked too.
    fn object<'a>(
        &mut self,
        value: &'a Value,
        path: &str,
        allowed: &[&str],
    ) -> Option<&'a Map<String, Value>> {
        let Some(obj) = value.as_object() else {
            let at = if path.is_empty() { ROOT_PATH.to_string() } else { path.to_string() };
            self.push_with(at, ViolationKind::WrongType, "expected object");
            return None;
        };
        for key in obj.keys() {
            if !allowed.contains(&key.as_str()) {
                self.push(child_path(path, key), ViolationKind::UnknownField);
            }
        }
        Some(obj)
    }

    fn array<'a, T>(
        &mut self,
        obj: &'a Map<String, Value>,
        key: &str,
        mut check_item: impl FnMut(&mut Self, &'a Value, String) -> Option<T>,
    ) -> Vec<T> {
        let Some(value) = field(obj, key) else {
            return Vec::new();
        };
        let Some(items) = value.as_array() else {
            self.push_with(key.to_string(), ViolationKind::WrongType, "expected array");
            return Vec::new();
        };
        items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| check_item(&mut *self, item, format!("{key}[{i}]")))
            .collect()
    }

    fn optional_string(&mut self, obj: &Map<String, Value>, key: &str, parent: &str) -> Option<String> {
        let value = field(obj, key)?;
        match value.as_str() {
            Some(s) => Some(s.to_string()),
            None => {
                self.push_with(child_path(parent, key), ViolationKind::WrongType, "expected string");
                None
            }
        }
    }

    /// Required whenever its parent object is present; must be non-blank.
    fn required_text(&mut self, obj: &Map<String, Value>, key: &str, parent: &str) -> Option<String> {
        let path = child_path(parent, key);
        let Some(value) = field(obj, key) else {
            self.push(path, ViolationKind::Missing);
            return None;
        };
        match value.as_str().map(str::trim) {
            Some("") => {
                self.push(path, ViolationKind::EmptyString);
                None
            }
            Some(s) => Some(s.to_string()),
            None => {
                self.push_with(path, ViolationKind::WrongType, "expected string");
                None
            }
        }
    }

    fn amount<'a>(
        &mut self,
        obj: &'a Map<String, Value>,
        key: &str,
        parent: &str,
    ) -> Option<PendingAmount<'a>> {
        let value = field(obj, key)?;
        let path = child_path(parent, key);
        let raw = match value {
            Value::Number(n) => match n.as_f64() {
                Some(n) => RawAmount::Number(n),
                None => {
                    self.push_with(path, ViolationKind::InvalidNumber, format!("{n} is out of range"));
                    return None;
                }
            },
            Value::String(s) => RawAmount::Text(s),
            _ => {
                self.push_with(path, ViolationKind::WrongType, "expected number or string");
                return None;
            }
        };
        Some(PendingAmount { path, raw })
    }

    fn merchant(&mut self, value: &Value) -> Option<Merchant> {
        let obj = self.object(value, "merchant", MERCHANT_FIELDS)?;
        let name = self.required_text(obj, "name", "merchant");
        let merchant = Merchant {
            name: name.unwrap_or_default(),
            address: self.optional_string(obj, "address", "merchant"),
            phone: self.optional_string(obj, "phone", "merchant"),
            website: self.optional_string(obj, "website", "merchant"),
            tax_office: self.optional_string(obj, "tax_office", "merchant"),
            tax_number: self.optional_string(obj, "tax_number", "merchant"),
        };
        Some(merchant)
    }

    fn transaction(&mut self, value: &Value) -> Option<Transaction> {
        let obj = self.object(value, "transaction", TRANSACTION_FIELDS)?;
        Some(Transaction {
            date: self.optional_string(obj, "date", "transaction"),
            time: self.optional_string(obj, "time", "transaction"),
            receipt_number: self.optional_string(obj, "receipt_number", "transaction"),
            payment_method: self.optional_string(obj, "payment_method", "transaction"),
            card_last4: self.optional_string(obj, "card_last4", "transaction"),
            currency: self.optional_string(obj, "currency", "transaction"),
        })
    }

    fn totals<'a>(&mut self, value: &'a Value) -> Option<Totals<PendingAmount<'a>>> {
        let obj = self.object(value, "totals", TOTALS_FIELDS)?;
        Some(Totals {
            subtotal: self.amount(obj, "subtotal", "totals"),
            tax: self.amount(obj, "tax", "totals"),
            tip: self.amount(obj, "tip", "totals"),
            discount: self.amount(obj, "discount", "totals"),
            total: self.amount(obj, "total", "totals"),
        })
    }

    fn tax_rate<'a>(&mut self, value: &'a Value, path: &str) -> Option<TaxRateEntry<PendingAmount<'a>>> {
        let obj = self.object(value, path, TAX_RATE_FIELDS)?;
        let rate = self.amount(obj, "rate", path);
        if rate.is_none() && field(obj, "rate").is_none() {
            self.push(child_path(path, "rate"), ViolationKind::Missing);
        }
        let taxable_amount = self.amount(obj, "taxable_amount", path);
        let tax_amount = self.amount(obj, "tax_amount", path);
        Some(TaxRateEntry {
            rate: rate?,
            taxable_amount,
            tax_amount,
        })
    }

    fn line_item<'a>(&mut self, value: &'a Value, path: &str) -> Option<LineItem<PendingAmount<'a>>> {
        let obj = self.object(value, path, LINE_ITEM_FIELDS)?;
        let description = self.required_text(obj, "description", path);
        let quantity = self.amount(obj, "quantity", path);
        let unit_price = self.amount(obj, "unit_price", path);
        let total_price = self.amount(obj, "total_price", path);
        Some(LineItem {
            description: description?,
            quantity,
            unit_price,
            total_price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paths(outcome: &ValidationOutcome) -> Vec<&str> {
        match outcome {
            ValidationOutcome::Valid(_) => vec![],
            ValidationOutcome::Invalid(v) => v.iter().map(|f| f.path.as_str()).collect(),
        }
    }

    fn full_receipt() -> Value {
        json!({
            "document_type": "receipt",
            "merchant": {
                "name": "  Migros  ",
                "address": "Kadıköy, İstanbul",
                "tax_office": "Kadıköy",
                "tax_number": "6220529513"
            },
            "transaction": {
                "date": "15.01.2024",
                "time": "14:32",
                "receipt_number": "0042",
                "currency": "TRY"
            },
            "totals": {"subtotal": "1.234,56", "tax": 12.35, "total": "₺1.246,91"},
            "tax_rates": [
                {"rate": "%1", "taxable_amount": "495,05", "tax_amount": "4,95"},
                {"rate": 20, "tax_amount": 7.40}
            ],
            "line_items": [
                {"description": "Ekmek", "quantity": 2, "unit_price": "7,50", "total_price": "15,00"},
                {"description": "Süt"}
            ],
            "notes": ["thank you"]
        })
    }

    #[test]
    fn accepts_complete_receipt() {
        let record = validate(&full_receipt()).into_result().unwrap();
        assert_eq!(record.document_type, DocumentType::Receipt);
        let merchant = record.merchant.unwrap();
        assert_eq!(merchant.name, "Migros");
        assert_eq!(merchant.tax_number.as_deref(), Some("6220529513"));
        let totals = record.totals.unwrap();
        assert_eq!(totals.subtotal, Some(1234.56));
        assert_eq!(totals.tax, Some(12.35));
        assert_eq!(totals.total, Some(1246.91));
        assert_eq!(totals.tip, None);
        assert_eq!(record.tax_rates.len(), 2);
        assert_eq!(record.tax_rates[0].rate, 1.0);
        assert_eq!(record.tax_rates[0].taxable_amount, Some(495.05));
        assert_eq!(record.tax_rates[1].taxable_amount, None);
        assert_eq!(record.line_items[0].unit_price, Some(7.5));
        assert_eq!(record.line_items[1].quantity, None);
        assert_eq!(record.notes, vec!["thank you".to_string()]);
    }

    #[test]
    fn absent_fields_stay_absent() {
        let record = validate(&json!({})).into_result().unwrap();
        assert_eq!(record.merchant, None);
        assert_eq!(record.totals, None);
        assert!(record.line_items.is_empty());
        assert!(record.notes.is_empty());
        assert_eq!(record.document_type, DocumentType::Receipt);
    }

    #[test]
    fn nulls_count_as_absent() {
        let record = validate(&json!({
            "merchant": null,
            "totals": {"total": null, "tax": 1},
            "transaction": {"date": null}
        }))
        .into_result()
        .unwrap();
        assert_eq!(record.merchant, None);
        assert_eq!(record.totals.unwrap().total, None);
        assert_eq!(record.transaction.unwrap().date, None);
    }

    #[test]
    fn unknown_top_level_key_rejects_whole_record() {
        let mut json = full_receipt();
        json["loyalty_points"] = json!(12);
        let outcome = validate(&json);
        assert!(!outcome.is_valid());
        assert_eq!(paths(&outcome), vec!["loyalty_points"]);
    }

    #[test]
    fn every_unknown_key_is_listed() {
        let outcome = validate(&json!({
            "FİŞ NO": "12",
            "KDV %1": 4.95,
            "merchant": {"name": "A", "fax": "x"}
        }));
        let mut found = paths(&outcome);
        found.sort();
        assert_eq!(found, vec!["FİŞ NO", "KDV %1", "merchant.fax"]);
    }

    #[test]
    fn reports_every_bad_amount() {
        let outcome = validate(&json!({
            "totals": {"subtotal": "abc", "total": "n/a"}
        }));
        match outcome {
            ValidationOutcome::Invalid(violations) => {
                let found: Vec<_> = violations.iter().map(|v| v.path.as_str()).collect();
                assert!(found.contains(&"totals.subtotal"));
                assert!(found.contains(&"totals.total"));
                assert!(violations
                    .iter()
                    .all(|v| v.kind == ViolationKind::InvalidNumber));
            }
            ValidationOutcome::Valid(_) => panic!("expected invalid outcome"),
        }
    }

    #[test]
    fn out_of_range_number_is_a_field_violation() {
        let json = crate::extract::extract_json(r#"{"totals":{"total":1e400,"tax":2}}"#).unwrap();
        match validate(&json) {
            ValidationOutcome::Invalid(violations) => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].path, "totals.total");
                assert_eq!(violations[0].kind, ViolationKind::InvalidNumber);
                assert_eq!(violations[0].message, "1e400 is out of range");
            }
            ValidationOutcome::Valid(_) => panic!("expected invalid outcome"),
        }
    }

    #[test]
    fn structural_and_numeric_problems_reported_together() {
        let outcome = validate(&json!({
            "extra": true,
            "merchant": {"name": "   "},
            "totals": {"total": "abc", "tip": [1]}
        }));
        let found = paths(&outcome);
        assert!(found.contains(&"extra"));
        assert!(found.contains(&"merchant.name"));
        assert!(found.contains(&"totals.tip"));
        assert!(found.contains(&"totals.total"));
        assert_eq!(found.len(), 4);
    }

    #[test]
    fn merchant_requires_name() {
        let outcome = validate(&json!({"merchant": {"address": "Main St"}}));
        match outcome {
            ValidationOutcome::Invalid(v) => {
                assert_eq!(
                    v,
                    vec![FieldViolation::new("merchant.name", ViolationKind::Missing)]
                );
            }
            ValidationOutcome::Valid(_) => panic!("merchant without name accepted"),
        }
    }

    #[test]
    fn one_bad_line_item_invalidates_record() {
        let outcome = validate(&json!({
            "line_items": [
                {"description": "Tea", "total_price": 3},
                {"description": ""},
                {"description": "Cake", "quantity": "two"}
            ]
        }));
        assert_eq!(
            paths(&outcome),
            vec!["line_items[1].description", "line_items[2].quantity"]
        );
    }

    #[test]
    fn tax_rates_keep_duplicates() {
        let record = validate(&json!({
            "tax_rates": [
                {"rate": 1, "tax_amount": 4.95},
                {"rate": "1", "tax_amount": 9.99}
            ]
        }))
        .into_result()
        .unwrap();
        assert_eq!(record.tax_rates.len(), 2);
        assert_eq!(record.tax_rates[1].tax_amount, Some(9.99));
    }

    #[test]
    fn tax_rate_needs_rate() {
        let outcome = validate(&json!({"tax_rates": [{"tax_amount": 1}, {"rate": "x"}]}));
        assert_eq!(paths(&outcome), vec!["tax_rates[0].rate", "tax_rates[1].rate"]);
    }

    #[test]
    fn wrong_shapes() {
        let outcome = validate(&json!({
            "document_type": "bill",
            "transaction": "today",
            "line_items": {"description": "x"},
            "notes": ["ok", 3]
        }));
        assert_eq!(
            paths(&outcome),
            vec!["document_type", "transaction", "line_items", "notes[1]"]
        );
    }

    #[test]
    fn non_object_root() {
        let outcome = validate(&json!([1, 2, 3]));
        assert_eq!(paths(&outcome), vec![ROOT_PATH]);
    }

    #[test]
    fn violation_display_and_serde() {
        let v = FieldViolation::with_message(
            "totals.total",
            ViolationKind::InvalidNumber,
            "could not read a number from \"abc\"",
        );
        assert_eq!(v.to_string(), "totals.total: could not read a number from \"abc\"");
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["path"], "totals.total");
        assert_eq!(json["kind"], "invalid_number");
        let back: FieldViolation = serde_json::from_value(json).unwrap();
        assert_eq!(back, v);
    }
}
