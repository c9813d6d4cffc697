//! Builtin finance and document tools
//!
//! Each tool deserializes its parameters into a typed struct whose JSON
//! schema (generated with `schemars`) is what the model sees.

pub mod analytics;
pub mod documents;
pub mod invoices;

pub use analytics::{CashForecastTool, SpendingSummaryTool, TopSuppliersTool};
pub use documents::SearchDocumentsTool;
pub use invoices::{OverdueInvoicesTool, SearchInvoicesTool};

use crate::finance::Period;
use crate::tools::ToolError;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

fn to_output<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value)
        .map_err(|e| ToolError::ExecutionError(format!("Failed to serialize result: {e}")))
}

/// Explicit dates win over a period key; both dates are required together
fn resolve_period(
    period: Option<&str>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    as_of: NaiveDate,
) -> Result<Option<Period>, ToolError> {
    match (start_date, end_date) {
        (Some(start), Some(end)) => Ok(Some(Period::between(start, end)?)),
        (None, None) => Ok(period.map(|key| Period::parse(key, as_of)).transpose()?),
        _ => Err(ToolError::ValidationError(
            "start_date and end_date must be given together".to_string(),
        )),
    }
}

fn config_u64(config: Option<&Value>, key: &str) -> Option<u64> {
    config.and_then(|c| c.get(key)).and_then(Value::as_u64)
}

fn config_str<'a>(config: Option<&'a Value>, key: &str) -> Option<&'a str> {
    config.and_then(|c| c.get(key)).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_resolve_period_precedence() {
        let as_of = date("2024-03-20");

        let explicit = resolve_period(Some("2023"), Some(date("2024-01-01")), Some(date("2024-01-31")), as_of)
            .unwrap()
            .unwrap();
        assert_eq!(explicit.end, date("2024-01-31"));

        let keyed = resolve_period(Some("last_month"), None, None, as_of).unwrap().unwrap();
        assert_eq!(keyed.label, "2024-02");

        assert!(resolve_period(None, None, None, as_of).unwrap().is_none());
        assert!(matches!(
            resolve_period(None, Some(date("2024-01-01")), None, as_of),
            Err(ToolError::ValidationError(_))
        ));
    }
}
