//! Invoice data and finance analytics
//!
//! The [`InvoiceLedger`] is loaded from JSON and answers the questions the
//! finance tools expose: search, spending summaries, overdue invoices,
//! supplier rankings and short-term cash forecasts.

pub mod invoice;
pub mod ledger;
pub mod period;

pub use invoice::{normalize_reference, round_money, Invoice, InvoiceStatus};
pub use ledger::{
    CashForecast, GroupBy, InvoiceFilter, InvoiceLedger, InvoiceSearchResult, OverdueReport,
    SpendingSummary, SupplierTotal,
};
pub use period::Period;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to read ledger: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse ledger JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid period: {0}")]
    InvalidPeriod(String),
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
}
