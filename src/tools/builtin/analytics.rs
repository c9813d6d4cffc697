//! Spending, supplier and cash analytics

use super::{config_str, config_u64, resolve_period, to_output};
use crate::finance::{GroupBy, Period};
use crate::tools::{parameters_schema, parse_parameters, Tool, ToolContext, ToolDescription, ToolError};
use async_trait::async_trait;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct SpendingParams {
    /// Period key: this_month, last_month, this_quarter, last_quarter, this_year, last_year, 2024-Q1, 2024-03, 2024, last_90_days
    #[serde(default)]
    period: Option<String>,
    /// Range start (YYYY-MM-DD), requires end_date
    #[serde(default)]
    start_date: Option<NaiveDate>,
    /// Range end (YYYY-MM-DD), requires start_date
    #[serde(default)]
    end_date: Option<NaiveDate>,
    /// Grouping of the totals (default supplier)
    #[serde(default)]
    group_by: Option<GroupBy>,
}

/// Committed spending over a period, grouped by supplier, category or month
pub struct SpendingSummaryTool {
    context: ToolContext,
    default_period: String,
}

impl SpendingSummaryTool {
    pub fn new(context: ToolContext) -> Self {
        Self {
            context,
            default_period: "this_month".to_string(),
        }
    }
}

#[async_trait]
impl Tool for SpendingSummaryTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "spending_summary".to_string(),
            description: format!(
                "Total spending (excluding draft and rejected invoices) over a period, with \
                 totals excluding tax, VAT and including tax, grouped by supplier, category or \
                 month. Defaults to {} grouped by supplier.",
                self.default_period
            ),
            parameters: parameters_schema::<SpendingParams>(),
        }
    }

    async fn initialize(&mut self, config: Option<&Value>) -> Result<(), ToolError> {
        if let Some(period) = config_str(config, "default_period") {
            let today = self.context.as_of();
            Period::parse(period, today)
                .map_err(|e| ToolError::InitializationError(e.to_string()))?;
            self.default_period = period.to_string();
        }
        Ok(())
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let params: SpendingParams = parse_parameters(parameters)?;
        let as_of = self.context.as_of();
        let key = params.period.as_deref().unwrap_or(&self.default_period);

        let period = resolve_period(Some(key), params.start_date, params.end_date, as_of)?
            .ok_or_else(|| ToolError::ValidationError("a period is required".to_string()))?;
        let summary = self
            .context
            .ledger
            .spending_summary(&period, params.group_by.unwrap_or_default());
        to_output(&summary)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct TopSuppliersParams {
    /// Number of suppliers (default 5)
    #[serde(default)]
    #[schemars(range(min = 1, max = 50))]
    limit: Option<usize>,
    /// Optional period key on the issue date; all invoices when omitted
    #[serde(default)]
    period: Option<String>,
    #[serde(default)]
    start_date: Option<NaiveDate>,
    #[serde(default)]
    end_date: Option<NaiveDate>,
}

/// Suppliers ranked by spending
pub struct TopSuppliersTool {
    context: ToolContext,
}

impl TopSuppliersTool {
    pub fn new(context: ToolContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for TopSuppliersTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "top_suppliers".to_string(),
            description: "Rank suppliers by total spending including tax, with invoice counts and \
                          share of the total in percent."
                .to_string(),
            parameters: parameters_schema::<TopSuppliersParams>(),
        }
    }

    async fn initialize(&mut self, _config: Option<&Value>) -> Result<(), ToolError> {
        Ok(())
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let params: TopSuppliersParams = parse_parameters(parameters)?;
        let period = resolve_period(
            params.period.as_deref(),
            params.start_date,
            params.end_date,
            self.context.as_of(),
        )?;

        let suppliers = self
            .context
            .ledger
            .top_suppliers(params.limit.unwrap_or(5), period.as_ref());
        Ok(json!({
            "period": to_output(&period)?,
            "currency": self.context.ledger.currency(),
            "suppliers": to_output(&suppliers)?,
        }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct CashForecastParams {
    /// Horizon in days from today
    #[serde(default)]
    #[schemars(range(min = 1, max = 365))]
    days: Option<u32>,
}

/// Upcoming supplier payments in weekly buckets
pub struct CashForecastTool {
    context: ToolContext,
    default_days: u32,
}

impl CashForecastTool {
    pub fn new(context: ToolContext) -> Self {
        Self {
            context,
            default_days: 30,
        }
    }
}

#[async_trait]
impl Tool for CashForecastTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "cash_forecast".to_string(),
            description: format!(
                "Forecast outgoing payments from unpaid invoices due within the next N days \
                 (default {}), in 7-day buckets, plus the amount already overdue.",
                self.default_days
            ),
            parameters: parameters_schema::<CashForecastParams>(),
        }
    }

    async fn initialize(&mut self, config: Option<&Value>) -> Result<(), ToolError> {
        if let Some(days) = config_u64(config, "default_days") {
            if !(1..=365).contains(&days) {
                return Err(ToolError::InitializationError(format!(
                    "default_days must be within 1..=365, got {days}"
                )));
            }
            self.default_days = days as u32;
        }
        Ok(())
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let params: CashForecastParams = parse_parameters(parameters)?;
        let forecast = self
            .context
            .ledger
            .cash_forecast(params.days.unwrap_or(self.default_days), self.context.as_of());
        to_output(&forecast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finance::ledger::tests::sample_ledger;
    use std::sync::Arc;

    fn context() -> ToolContext {
        ToolContext {
            ledger: Arc::new(sample_ledger()),
            rag: None,
            today: NaiveDate::from_ymd_opt(2024, 3, 20),
        }
    }

    #[tokio::test]
    async fn test_spending_summary_default_period_is_this_month() {
        let tool = SpendingSummaryTool::new(context());
        let output = tool.execute(&json!({})).await.unwrap();

        assert_eq!(output["period"]["label"], "2024-03");
        // the rejected Cloudly invoice is excluded
        assert_eq!(output["total_incl_tax"], 2400.0);
        assert_eq!(output["groups"][0]["key"], "Cloudly");
    }

    #[tokio::test]
    async fn test_spending_summary_by_category() {
        let tool = SpendingSummaryTool::new(context());
        let output = tool
            .execute(&json!({"period": "2024-Q1", "group_by": "category"}))
            .await
            .unwrap();

        assert_eq!(output["groups"][0]["key"], "software");
        assert_eq!(output["groups"][1]["key"], "office");
        assert_eq!(output["groups"][1]["total_incl_tax"], 1500.0);
    }

    #[tokio::test]
    async fn test_spending_summary_configured_default() {
        let mut tool = SpendingSummaryTool::new(context());
        tool.initialize(Some(&json!({"default_period": "this_year"}))).await.unwrap();
        let output = tool.execute(&json!({})).await.unwrap();
        assert_eq!(output["period"]["label"], "2024");

        let mut bad = SpendingSummaryTool::new(context());
        let result = bad.initialize(Some(&json!({"default_period": "soon"}))).await;
        assert!(matches!(result, Err(ToolError::InitializationError(_))));
    }

    #[tokio::test]
    async fn test_top_suppliers_with_period() {
        let tool = TopSuppliersTool::new(context());
        let output = tool
            .execute(&json!({"limit": 1, "period": "2024-02"}))
            .await
            .unwrap();

        let suppliers = output["suppliers"].as_array().unwrap();
        assert_eq!(suppliers.len(), 1);
        assert_eq!(suppliers[0]["supplier"], "Énergie Plus");
        assert_eq!(output["period"]["label"], "2024-02");
    }

    #[tokio::test]
    async fn test_cash_forecast_default_horizon() {
        let tool = CashForecastTool::new(context());
        let output = tool.execute(&json!({})).await.unwrap();

        assert_eq!(output["horizon_days"], 30);
        assert_eq!(output["total_due"], 2400.0);
        assert_eq!(output["overdue_total"], 1860.0);
    }
}
