//! Invoice lookup tools

use super::{config_u64, to_output};
use crate::finance::ledger::MAX_SEARCH_LIMIT;
use crate::finance::InvoiceFilter;
use crate::tools::{parameters_schema, parse_parameters, Tool, ToolContext, ToolDescription, ToolError};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

/// Find invoices by number, supplier, category, status, dates or amount
pub struct SearchInvoicesTool {
    context: ToolContext,
    max_results: usize,
}

impl SearchInvoicesTool {
    pub fn new(context: ToolContext) -> Self {
        Self {
            context,
            max_results: MAX_SEARCH_LIMIT,
        }
    }
}

#[async_trait]
impl Tool for SearchInvoicesTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "search_invoices".to_string(),
            description: "Search supplier invoices by number, supplier, category, status, issue \
                          period or amount. Returns matching invoices newest first with the total \
                          amount including tax."
                .to_string(),
            parameters: parameters_schema::<InvoiceFilter>(),
        }
    }

    async fn initialize(&mut self, config: Option<&Value>) -> Result<(), ToolError> {
        if let Some(max_results) = config_u64(config, "max_results") {
            if max_results == 0 {
                return Err(ToolError::InitializationError(
                    "max_results must be at least 1".to_string(),
                ));
            }
            self.max_results = (max_results as usize).min(MAX_SEARCH_LIMIT);
        }
        Ok(())
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let mut filter: InvoiceFilter = parse_parameters(parameters)?;
        filter.limit = Some(filter.limit.unwrap_or(self.max_results).min(self.max_results));

        let result = self.context.ledger.search(&filter, self.context.as_of())?;
        to_output(&result)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct OverdueParams {
    /// Maximum number of invoices listed (default 20)
    #[serde(default)]
    #[schemars(range(min = 1, max = 100))]
    limit: Option<usize>,
}

/// Open invoices past their due date, with aging buckets
pub struct OverdueInvoicesTool {
    context: ToolContext,
}

impl OverdueInvoicesTool {
    pub fn new(context: ToolContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for OverdueInvoicesTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "overdue_invoices".to_string(),
            description: "List unpaid invoices past their due date as of today, most overdue \
                          first, with the total outstanding and aging buckets (1-30, 31-60, \
                          61-90, 90+ days)."
                .to_string(),
            parameters: parameters_schema::<OverdueParams>(),
        }
    }

    async fn initialize(&mut self, _config: Option<&Value>) -> Result<(), ToolError> {
        Ok(())
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let params: OverdueParams = parse_parameters(parameters)?;
        let mut report = self.context.ledger.overdue(self.context.as_of());

        let limit = params.limit.unwrap_or(20);
        let listed = report.invoices.len().min(limit);
        report.invoices.truncate(listed);

        let mut output = to_output(&report)?;
        output["listed"] = json!(listed);
        Ok(output)
    }
}
