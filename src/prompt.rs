/// Instructions sent alongside every receipt image. The JSON shape listed here must stay
/// in step with the field lists in `validation`.
pub fn build_receipt_prompt() -> String {
    [
        "You are a careful OCR and information extraction system.",
        "Given an image of a receipt or invoice, first locate the document in the image.",
        "Then extract structured data as JSON ONLY.",
        "",
        "Rules:",
        "- Output MUST be a single valid JSON object (no markdown, no code fences, no commentary).",
        "- Output MUST contain ONLY the keys listed in the JSON shape below. Do not add any extra keys at any level.",
        "- If a value is unknown, omit that key (preferred) or set it to null.",
        "- Amounts must be numbers (not strings). Use dot as decimal separator in JSON (e.g. 1368.01).",
        "- Dates as printed are fine; prefer DD/MM/YYYY when unambiguous.",
        "- For Turkish receipts: recognize 'Fiş No'/'Belge No' (receipt_number), 'Vergi Dairesi' (merchant.tax_office), and 'VKN'/'TCKN'/'Vergi No' (merchant.tax_number, often right below the tax office).",
        "- For KDV (VAT): add one tax_rates entry per distinct rate (e.g. 1, 10, 20) with the rate as a plain number, taxable_amount (matrah) and tax_amount (KDV only).",
        "- Many receipts show line items with a KDV rate and a tax-included line total (sometimes written as 'KDV'li', 'Tutar', 'Toplam', or shown next to the % rate). In those cases:",
        "  - First aggregate (SUM) all tax-included amounts for the SAME KDV rate across ALL line items.",
        "  - Then compute the amounts for that rate from the tax-included total:",
        "      gross = sum of tax-included amounts for that rate",
        "      net = gross / (1 + rate/100)",
        "      tax = gross - net",
        "    Round net and tax to 2 decimals.",
        "  - Example: gross=500 at %1 => net=500/1.01=495.05, tax=500-495.0495...=4.95",
        "- If the receipt already provides an explicit KDV breakdown table (e.g. 'KDV TUTARI', 'MATRAH' per rate), prefer those explicit amounts over recomputing.",
        "",
        "Return this JSON shape (keys must match exactly):",
        "{",
        r#"  "document_type"?: "receipt" | "invoice" | "other","#,
        r#"  "merchant": {"#,
        r#"    "name": string,"#,
        r#"    "address"?: string, "phone"?: string, "website"?: string,"#,
        r#"    "tax_office"?: string, "tax_number"?: string"#,
        r#"  },"#,
        r#"  "transaction"?: {"#,
        r#"    "date"?: string, "time"?: string, "receipt_number"?: string,"#,
        r#"    "payment_method"?: string, "card_last4"?: string, "currency"?: string"#,
        r#"  },"#,
        r#"  "totals"?: {"#,
        r#"    "subtotal"?: number, "tax"?: number, "tip"?: number, "discount"?: number, "total"?: number"#,
        r#"  },"#,
        r#"  "tax_rates"?: [ { "rate": number, "taxable_amount"?: number, "tax_amount"?: number } ],"#,
        r#"  "line_items": [ { "description": string, "quantity"?: number, "unit_price"?: number, "total_price"?: number } ],"#,
        r#"  "notes"?: [ string ]"#,
        "}",
    ]
    .join("\n")
}
