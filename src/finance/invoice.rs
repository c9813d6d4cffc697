//! Invoice records

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a supplier invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    Validated,
    Paid,
    Overdue,
    Rejected,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Validated => "validated",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Rejected => "rejected",
        }
    }

    /// Still owed to the supplier
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Pending | InvoiceStatus::Validated | InvoiceStatus::Overdue
        )
    }

    /// Counts towards spending figures
    pub fn is_committed(&self) -> bool {
        !matches!(self, InvoiceStatus::Draft | InvoiceStatus::Rejected)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_currency() -> String {
    "EUR".to_string()
}

/// A supplier invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Invoice {
    /// Defaults to the invoice number when omitted
    #[serde(default)]
    pub id: String,
    pub number: String,
    pub supplier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub issue_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_date: Option<NaiveDate>,
    pub amount_excl_tax: f64,
    #[serde(default)]
    pub vat_amount: f64,
    #[serde(default)]
    pub amount_incl_tax: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub status: InvoiceStatus,
}

impl Invoice {
    /// Fill fields that can be derived from the others
    pub(crate) fn normalize(&mut self) {
        if self.id.trim().is_empty() {
            self.id = self.number.clone();
        }
        if self.amount_incl_tax == 0.0 && self.amount_excl_tax != 0.0 {
            self.amount_incl_tax = round_money(self.amount_excl_tax + self.vat_amount);
        }
    }

    /// Open and past its due date, or explicitly flagged overdue
    pub fn is_overdue(&self, as_of: NaiveDate) -> bool {
        match self.status {
            InvoiceStatus::Overdue => true,
            status if status.is_open() => self.due_date.is_some_and(|due| due < as_of),
            _ => false,
        }
    }

    pub fn days_overdue(&self, as_of: NaiveDate) -> i64 {
        self.due_date
            .map(|due| (as_of - due).num_days().max(0))
            .unwrap_or(0)
    }
}

/// Round to cents
pub fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Uppercase alphanumerics only, so `inv 2024/001` matches `INV-2024-001`
pub fn normalize_reference(reference: &str) -> String {
    reference
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice(status: InvoiceStatus, due: Option<&str>) -> Invoice {
        Invoice {
            id: String::new(),
            number: "INV-1".to_string(),
            supplier: "Acme".to_string(),
            category: None,
            issue_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            due_date: due.map(|d| d.parse().unwrap()),
            paid_date: None,
            amount_excl_tax: 100.0,
            vat_amount: 20.0,
            amount_incl_tax: 0.0,
            currency: "EUR".to_string(),
            status,
        }
    }

    #[test]
    fn test_normalize_fills_id_and_total() {
        let mut inv = invoice(InvoiceStatus::Pending, None);
        inv.normalize();
        assert_eq!(inv.id, "INV-1");
        assert_eq!(inv.amount_incl_tax, 120.0);
    }

    #[test]
    fn test_overdue_rules() {
        let as_of = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(invoice(InvoiceStatus::Pending, Some("2024-02-01")).is_overdue(as_of));
        assert!(!invoice(InvoiceStatus::Paid, Some("2024-02-01")).is_overdue(as_of));
        assert!(!invoice(InvoiceStatus::Pending, Some("2024-03-15")).is_overdue(as_of));
        assert!(invoice(InvoiceStatus::Overdue, None).is_overdue(as_of));
        assert_eq!(invoice(InvoiceStatus::Pending, Some("2024-02-01")).days_overdue(as_of), 29);
    }

    #[test]
    fn test_normalize_reference() {
        assert_eq!(normalize_reference("inv 2024/001"), "INV2024001");
        assert_eq!(normalize_reference("INV-2024-001"), "INV2024001");
    }

    #[test]
    fn test_status_serde() {
        let status: InvoiceStatus = serde_json::from_str("\"validated\"").unwrap();
        assert_eq!(status, InvoiceStatus::Validated);
        assert!(status.is_open());
        assert!(!InvoiceStatus::Rejected.is_committed());
    }
}
