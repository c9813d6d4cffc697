//! Tool system for the assistant's tool-calling loop
//!
//! Tools describe themselves with a JSON schema, receive their optional
//! configuration from the `[tools]` section once at startup, and run with
//! parameters that have already been validated against that schema.

use crate::config::ToolConfig;
use crate::finance::{InvoiceLedger, LedgerError};
use crate::observability::metrics::metrics;
use crate::rag::RagPipeline;
use crate::tool_span;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn, Instrument};

pub mod builtin;

/// A capability the model can call
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, description and JSON schema of the parameters
    fn describe(&self) -> ToolDescription;

    /// Called once at startup with the tool's `config` table, if any
    async fn initialize(&mut self, config: Option<&Value>) -> Result<(), ToolError>;

    /// Run with parameters already validated against `describe().parameters`
    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError>;

    async fn shutdown(&mut self) -> Result<(), ToolError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Shared data the builtin tools work on
#[derive(Clone)]
pub struct ToolContext {
    pub ledger: Arc<InvoiceLedger>,
    pub rag: Option<Arc<RagPipeline>>,
    /// Fixed reference date; today's date when unset
    pub today: Option<NaiveDate>,
}

impl ToolContext {
    pub fn new(ledger: Arc<InvoiceLedger>, rag: Option<Arc<RagPipeline>>) -> Self {
        Self {
            ledger,
            rag,
            today: None,
        }
    }

    pub fn as_of(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }
}

/// Builtins registered when `[tools]` is empty
pub const DEFAULT_TOOLS: [&str; 6] = [
    "search_invoices",
    "spending_summary",
    "overdue_invoices",
    "top_suppliers",
    "cash_forecast",
    "search_documents",
];

/// Registry and executor for the configured tools
pub struct ToolSystem {
    context: ToolContext,
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolSystem {
    pub fn new(context: ToolContext) -> Self {
        Self {
            context,
            tools: HashMap::new(),
        }
    }

    /// Instantiate and initialize the tools named in `[tools]`.
    ///
    /// An empty table registers every builtin whose data is available.
    pub async fn initialize(
        &mut self,
        tool_configs: &HashMap<String, ToolConfig>,
    ) -> Result<(), ToolError> {
        if tool_configs.is_empty() {
            for name in DEFAULT_TOOLS {
                if name == "search_documents" && self.context.rag.is_none() {
                    debug!("Document search disabled: no RAG pipeline");
                    continue;
                }
                let mut tool = self.create_builtin_tool(name)?;
                tool.initialize(None).await?;
                self.tools.insert(name.to_string(), tool);
            }
            return Ok(());
        }

        for (tool_name, tool_config) in tool_configs {
            let mut tool = self.create_tool(tool_name, tool_config)?;

            let config = match tool_config {
                ToolConfig::Simple(_) => None,
                ToolConfig::Complex { config, .. } => Some(
                    serde_json::to_value(config)
                        .map_err(|e| ToolError::InitializationError(e.to_string()))?,
                ),
            };
            tool.initialize(config.as_ref()).await?;

            self.tools.insert(tool_name.clone(), tool);
        }

        Ok(())
    }

    /// Add an already initialized tool
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.describe().name;
        self.tools.insert(name, tool);
    }

    fn create_tool(&self, tool_name: &str, config: &ToolConfig) -> Result<Box<dyn Tool>, ToolError> {
        let impl_name = match config {
            ToolConfig::Simple(impl_name) => impl_name,
            ToolConfig::Complex { implementation, .. } => implementation,
        };

        match impl_name.as_str() {
            "builtin" => self.create_builtin_tool(tool_name),
            _ => Err(ToolError::UnknownImplementation(impl_name.clone())),
        }
    }

    fn create_builtin_tool(&self, tool_name: &str) -> Result<Box<dyn Tool>, ToolError> {
        let context = self.context.clone();
        match tool_name {
            "search_invoices" => Ok(Box::new(builtin::SearchInvoicesTool::new(context))),
            "spending_summary" => Ok(Box::new(builtin::SpendingSummaryTool::new(context))),
            "overdue_invoices" => Ok(Box::new(builtin::OverdueInvoicesTool::new(context))),
            "top_suppliers" => Ok(Box::new(builtin::TopSuppliersTool::new(context))),
            "cash_forecast" => Ok(Box::new(builtin::CashForecastTool::new(context))),
            "search_documents" => Ok(Box::new(builtin::SearchDocumentsTool::new(context)?)),
            _ => Err(ToolError::UnknownTool(tool_name.to_string())),
        }
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    pub fn describe_tool(&self, tool_name: &str) -> Option<ToolDescription> {
        self.tools.get(tool_name).map(|tool| tool.describe())
    }

    /// Descriptions of every registered tool, sorted by name
    pub fn descriptions(&self) -> Vec<ToolDescription> {
        let mut descriptions: Vec<ToolDescription> =
            self.tools.values().map(|tool| tool.describe()).collect();
        descriptions.sort_by(|a, b| a.name.cmp(&b.name));
        descriptions
    }

    /// Validate `parameters` and run the tool, recording metrics
    pub async fn execute_tool(&self, tool_name: &str, parameters: &Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;

        let span = tool_span!(tool_name = %tool_name);
        async {
            let start = Instant::now();
            let result = match self.validate_parameters(tool.as_ref(), parameters) {
                Ok(()) => tool.execute(parameters).await,
                Err(e) => Err(e),
            };
            let duration = start.elapsed();
            metrics().tool_executed(tool_name, duration, result.is_ok());

            match &result {
                Ok(_) => debug!(duration_ms = duration.as_millis() as u64, "Tool succeeded"),
                Err(e) => warn!(error = %e, "Tool failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    fn validate_parameters(&self, tool: &dyn Tool, parameters: &Value) -> Result<(), ToolError> {
        let description = tool.describe();
        let validator = jsonschema::validator_for(&description.parameters)
            .map_err(|e| ToolError::SchemaError(format!("Schema compilation error: {e}")))?;

        validator.validate(parameters).map_err(|errors| {
            let error_messages: Vec<String> = errors
                .map(|e| format!("At '{}': {}", e.instance_path, e))
                .collect();
            ToolError::ValidationError(error_messages.join("; "))
        })
    }

    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_tool(&self, tool_name: &str) -> bool {
        self.tools.contains_key(tool_name)
    }

    pub async fn shutdown(&mut self) -> Result<(), ToolError> {
        for tool in self.tools.values_mut() {
            tool.shutdown().await?;
        }
        Ok(())
    }
}

/// Parameter schema for `T`, with sub-schemas inlined and no `$schema` key
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let generator = SchemaSettings::draft07()
        .with(|settings| {
            settings.inline_subschemas = true;
            settings.meta_schema = None;
        })
        .into_generator();
    serde_json::to_value(generator.into_root_schema_for::<T>())
        .unwrap_or_else(|_| json!({"type": "object"}))
}

/// Deserialize validated parameters into the tool's parameter type
pub fn parse_parameters<T: DeserializeOwned>(parameters: &Value) -> Result<T, ToolError> {
    serde_json::from_value(parameters.clone())
        .map_err(|e| ToolError::ValidationError(format!("Invalid parameters: {e}")))
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Unknown tool implementation: {0}")]
    UnknownImplementation(String),
    #[error("Tool initialization failed: {0}")]
    InitializationError(String),
    #[error("Parameter validation failed: {0}")]
    ValidationError(String),
    #[error("Schema error: {0}")]
    SchemaError(String),
    #[error("Tool execution failed: {0}")]
    ExecutionError(String),
    #[error("Tool shutdown failed: {0}")]
    ShutdownError(String),
}

impl From<LedgerError> for ToolError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::InvalidPeriod(_) | LedgerError::InvalidFilter(_) => {
                ToolError::ValidationError(error.to_string())
            }
            _ => ToolError::ExecutionError(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finance::ledger::tests::sample_ledger;

    fn context() -> ToolContext {
        ToolContext {
            ledger: Arc::new(sample_ledger()),
            rag: None,
            today: NaiveDate::from_ymd_opt(2024, 3, 20),
        }
    }

    #[tokio::test]
    async fn test_default_tools_skip_document_search_without_rag() {
        let mut tool_system = ToolSystem::new(context());
        tool_system.initialize(&HashMap::new()).await.unwrap();

        assert_eq!(
            tool_system.list_tools(),
            vec!["cash_forecast", "overdue_invoices", "search_invoices", "spending_summary", "top_suppliers"]
        );
    }

    #[tokio::test]
    async fn test_configured_tools_only() {
        let mut tool_system = ToolSystem::new(context());
        let mut tool_configs = HashMap::new();
        tool_configs.insert("search_invoices".to_string(), ToolConfig::Simple("builtin".to_string()));

        tool_system.initialize(&tool_configs).await.unwrap();
        assert_eq!(tool_system.list_tools(), vec!["search_invoices"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_implementation() {
        let mut tool_system = ToolSystem::new(context());
        let mut tool_configs = HashMap::new();
        tool_configs.insert("search_invoices".to_string(), ToolConfig::Simple("plugin".to_string()));

        let result = tool_system.initialize(&tool_configs).await;
        assert!(matches!(result, Err(ToolError::UnknownImplementation(_))));
    }

    #[tokio::test]
    async fn test_unknown_builtin_tool() {
        let mut tool_system = ToolSystem::new(context());
        let mut tool_configs = HashMap::new();
        tool_configs.insert("send_payment".to_string(), ToolConfig::Simple("builtin".to_string()));

        let result = tool_system.initialize(&tool_configs).await;
        assert!(matches!(result, Err(ToolError::UnknownTool(_))));
    }

    #[tokio::test]
    async fn test_document_search_requires_rag() {
        let mut tool_system = ToolSystem::new(context());
        let mut tool_configs = HashMap::new();
        tool_configs.insert("search_documents".to_string(), ToolConfig::Simple("builtin".to_string()));

        let result = tool_system.initialize(&tool_configs).await;
        assert!(matches!(result, Err(ToolError::InitializationError(_))));
    }

    #[tokio::test]
    async fn test_parameters_are_validated_before_execution() {
        let mut tool_system = ToolSystem::new(context());
        tool_system.initialize(&HashMap::new()).await.unwrap();

        let result = tool_system
            .execute_tool("search_invoices", &json!({"supplier": 42}))
            .await;
        assert!(matches!(result, Err(ToolError::ValidationError(_))));

        let result = tool_system
            .execute_tool("search_invoices", &json!({"colour": "blue"}))
            .await;
        assert!(matches!(result, Err(ToolError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let tool_system = ToolSystem::new(context());
        let result = tool_system.execute_tool("unknown", &json!({})).await;
        assert!(matches!(result, Err(ToolError::UnknownTool(_))));
    }

    #[test]
    fn test_parameters_schema_is_inlined() {
        let schema = parameters_schema::<crate::finance::InvoiceFilter>();
        assert_eq!(schema["type"], "object");
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("definitions").is_none());
        assert_eq!(schema["additionalProperties"], false);
    }

    #[test]
    fn test_ledger_errors_map_to_validation() {
        let error: ToolError = LedgerError::InvalidPeriod("someday".to_string()).into();
        assert!(matches!(error, ToolError::ValidationError(_)));
    }
}
