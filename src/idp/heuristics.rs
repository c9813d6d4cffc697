//! Regex extraction of invoice fields from raw text
//!
//! Used when no LLM is configured or when the LLM call fails. Labelled
//! values (`Total HT : 1 000,00 €`) score higher than unlabelled guesses.

use crate::idp::{ExtractedInvoice, ExtractionMethod};
use crate::intent::entities::INVOICE_NUMBER_PATTERN;
use crate::text::parse_number;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

const LABELLED: f32 = 0.7;
const UNLABELLED: f32 = 0.4;

const AMOUNT: &str = r"[€$£]?\s?(\d{1,3}(?:[ \x{a0}\x{202f}.,]\d{3})+(?:[.,]\d{1,2})?|\d+(?:[.,]\d{1,2})?)";

static NUMBER_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:facture|invoice)\s*(?:n[°o]\.?|no\.?|number|num[ée]ro|#)?\s*[:#]?\s*([A-Z0-9][A-Z0-9\-/_]*\d[A-Z0-9\-/_]*)",
    )
    .expect("valid invoice number label pattern")
});

static SUPPLIER_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:fournisseur|supplier|vendor|[ée]metteur|from|soci[ée]t[ée])\s*:\s*(.+?)\s*$")
        .expect("valid supplier label pattern")
});

const DATE: &str = r"(\d{4}-\d{2}-\d{2}|\d{1,2}[/.\-]\d{1,2}[/.\-]\d{4})";

static ISSUE_DATE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)(?:date\s*(?:de\s*(?:la\s*)?facture|d'[ée]mission)?|invoice\s*date|issued?(?:\s*on)?|[ée]mise?\s*le)\s*:?\s*{DATE}"
    ))
    .expect("valid issue date pattern")
});

static DUE_DATE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)(?:[ée]ch[ée]ance|due\s*date|date\s*limite(?:\s*de\s*paiement)?|payable\s*(?:avant|before|by)|[àa]\s*payer\s*avant|due)\s*:?\s*(?:le\s*)?{DATE}"
    ))
    .expect("valid due date pattern")
});

static ANY_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(DATE).expect("valid date pattern"));

static EXCL_TAX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)(?:total\s*)?(?:\bht\b|hors\s*taxes?|excl(?:\.|uding)?\s*(?:vat|tax)|sub-?total|net\s*amount)\s*:?\s*{AMOUNT}"
    ))
    .expect("valid excl. tax pattern")
});

static INCL_TAX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)(?:total\s*)?(?:\bttc\b|toutes\s*taxes\s*comprises|incl(?:\.|uding)?\s*(?:vat|tax)|amount\s*due|total\s*due|net\s*[àa]\s*payer|\btotal\b)\s*:?\s*{AMOUNT}"
    ))
    .expect("valid incl. tax pattern")
});

static VAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:tva|vat)\b(?:\s*\(?\d{{1,2}}(?:[.,]\d+)?\s*%\)?)?\s*:?\s*{AMOUNT}"
    ))
    .expect("valid VAT pattern")
});

static CURRENCY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(€|\beur\b|\beuros?\b|\$|\busd\b|£|\bgbp\b)").expect("valid currency pattern"));

/// Parse `2024-03-01`, `01/03/2024` or `01.03.2024` (day first)
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    let parts: Vec<&str> = raw.split(['/', '.', '-']).collect();
    if let [day, month, year] = parts.as_slice() {
        return NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?);
    }
    None
}

/// Replace a match with spaces so later patterns cannot reuse it
fn take_amount(text: &mut String, pattern: &Regex) -> Option<f64> {
    let (range, value) = {
        let caps = pattern.captures(text)?;
        let whole = caps.get(0)?;
        (whole.range(), parse_number(caps.get(1)?.as_str())?)
    };
    text.replace_range(range.clone(), &" ".repeat(range.len()));
    Some(value)
}

pub fn extract(text: &str) -> ExtractedInvoice {
    let mut invoice = ExtractedInvoice::empty(ExtractionMethod::Heuristic);

    if let Some(caps) = NUMBER_LABEL.captures(text) {
        invoice.set_invoice_number(caps[1].to_string(), LABELLED);
    } else if let Some(caps) = INVOICE_NUMBER_PATTERN.captures(text) {
        invoice.set_invoice_number(caps[1].to_uppercase(), UNLABELLED);
    }

    if let Some(caps) = SUPPLIER_LABEL.captures(text) {
        invoice.set_supplier(caps[1].to_string(), LABELLED);
    } else if let Some(line) = text.lines().map(str::trim).find(|line| {
        line.chars().any(char::is_alphabetic)
            && !line.to_lowercase().starts_with("facture")
            && !line.to_lowercase().starts_with("invoice")
    }) {
        invoice.set_supplier(line.to_string(), 0.3);
    }

    let issue = ISSUE_DATE_LABEL
        .captures(text)
        .and_then(|caps| parse_date(&caps[1]));
    match issue {
        Some(date) => invoice.set_issue_date(date, LABELLED),
        None => {
            if let Some(date) = ANY_DATE.find(text).and_then(|m| parse_date(m.as_str())) {
                invoice.set_issue_date(date, UNLABELLED);
            }
        }
    }
    if let Some(date) = DUE_DATE_LABEL.captures(text).and_then(|caps| parse_date(&caps[1])) {
        invoice.set_due_date(date, LABELLED);
    }

    // TTC first: "Total TTC" must not be read as a bare excl. tax total
    let mut remaining = text.to_string();
    let excl = take_amount(&mut remaining, &EXCL_TAX);
    let incl = take_amount(&mut remaining, &INCL_TAX);
    let vat = take_amount(&mut remaining, &VAT);
    if let Some(value) = excl {
        invoice.set_amount_excl_tax(value, LABELLED);
    }
    if let Some(value) = incl {
        invoice.set_amount_incl_tax(value, LABELLED);
    }
    if let Some(value) = vat {
        invoice.set_vat_amount(value, LABELLED);
    }

    if let Some(caps) = CURRENCY.captures(text) {
        let currency = match caps[1].to_lowercase().as_str() {
            "$" | "usd" => "USD",
            "£" | "gbp" => "GBP",
            _ => "EUR",
        };
        invoice.set_currency(currency.to_string(), LABELLED);
    }

    invoice
}
