use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validation::FieldViolation;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    #[default]
    Receipt,
    Invoice,
    Other,
}

impl DocumentType {
    pub const ALL: [DocumentType; 3] = [Self::Receipt, Self::Invoice, Self::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receipt => "receipt",
            Self::Invoice => "invoice",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Merchant {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// Vergi Dairesi.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_office: Option<String>,
    /// VKN / TCKN / Vergi No.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Fiş No / Belge No.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_last4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

/// Receipt-level amounts. `A` is `f64` on validated records; the validator uses it to
/// carry raw values between its structural and numeric passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals<A = f64> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<A>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax: Option<A>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip: Option<A>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount: Option<A>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<A>,
}

/// One KDV bracket: the percentage rate, its matrah and the tax amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxRateEntry<A = f64> {
    pub rate: A,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taxable_amount: Option<A>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_amount: Option<A>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem<A = f64> {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<A>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<A>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_price: Option<A>,
}

/// A receipt that passed validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRecord<A = f64> {
    #[serde(default)]
    pub document_type: DocumentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant: Option<Merchant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Transaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totals: Option<Totals<A>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tax_rates: Vec<TaxRateEntry<A>>,
    #[serde(default)]
    pub line_items: Vec<LineItem<A>>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl<A> Totals<A> {
    fn map_amounts<B>(self, f: &mut impl FnMut(A) -> Option<B>) -> Totals<B> {
        Totals {
            subtotal: self.subtotal.and_then(&mut *f),
            tax: self.tax.and_then(&mut *f),
            tip: self.tip.and_then(&mut *f),
            discount: self.discount.and_then(&mut *f),
            total: self.total.and_then(&mut *f),
        }
    }
}

impl<A> ReceiptRecord<A> {
    /// Convert every amount with `f`. Amounts for which `f` returns `None` are dropped,
    /// and so is a tax entry whose rate cannot be converted.
    pub fn map_amounts<B>(self, mut f: impl FnMut(A) -> Option<B>) -> ReceiptRecord<B> {
        let totals = self.totals.map(|t| t.map_amounts(&mut f));
        let tax_rates = self
            .tax_rates
            .into_iter()
            .filter_map(|entry| {
                let rate = f(entry.rate);
                let taxable_amount = entry.taxable_amount.and_then(&mut f);
                let tax_amount = entry.tax_amount.and_then(&mut f);
                rate.map(|rate| TaxRateEntry {
                    rate,
                    taxable_amount,
                    tax_amount,
                })
            })
            .collect();
        let line_items = self
            .line_items
            .into_iter()
            .map(|item| LineItem {
                description: item.description,
                quantity: item.quantity.and_then(&mut f),
                unit_price: item.unit_price.and_then(&mut f),
                total_price: item.total_price.and_then(&mut f),
            })
            .collect();

        ReceiptRecord {
            document_type: self.document_type,
            merchant: self.merchant,
            transaction: self.transaction,
            totals,
            tax_rates,
            line_items,
            notes: self.notes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Processing,
    Done,
    Error,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One uploaded receipt image and whatever the pipeline made of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReceipt {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub file_name: String,
    pub media_type: String,
    pub size: u64,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Field-level problems from the last failed validation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<FieldViolation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<ReceiptRecord>,
}

impl StoredReceipt {
    pub fn is_exportable(&self) -> bool {
        self.status == ItemStatus::Done && self.receipt.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedScan {
    pub file_path: String,
    pub file_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchScanResult {
    pub successes: Vec<StoredReceipt>,
    pub failures: Vec<FailedScan>,
}
