//! Tool system integration tests
//!
//! Registration from `[tools]`, schema validation before execution, and the
//! finance tools answering from the fixture ledger.


use ask_daf::config::ToolConfig;
use ask_daf::tools::{ToolError, ToolSystem};
use serde_json::json;
use std::collections::HashMap;
use test_helpers::{ingest_policy, rag_pipeline, test_config, tool_context, tool_system};

#[tokio::test]
async fn test_empty_tools_table_registers_ledger_builtins() {
    let tools = tool_system(None).await;

    assert_eq!(
        tools.list_tools(),
        vec![
            "cash_forecast",
            "overdue_invoices",
            "search_invoices",
            "spending_summary",
            "top_suppliers",
        ]
    );
    assert!(!tools.has_tool("search_documents"));
}

#[tokio::test]
async fn test_document_search_registered_with_rag() {
    let (rag, _) = rag_pipeline(&test_config());
    let tools = tool_system(Some(rag)).await;

    assert!(tools.has_tool("search_documents"));
    assert_eq!(tools.list_tools().len(), 6);
}

#[tokio::test]
async fn test_configured_tools_only() {
    let mut configs = HashMap::new();
    configs.insert(
        "overdue_invoices".to_string(),
        ToolConfig::Simple("builtin".to_string()),
    );
    configs.insert(
        "search_invoices".to_string(),
        ToolConfig::Complex {
            implementation: "builtin".to_string(),
            config: HashMap::from([("max_results".to_string(), json!(1))]),
        },
    );

    let mut tools = ToolSystem::new(tool_context(None));
    tools.initialize(&configs).await.unwrap();

    assert_eq!(tools.list_tools(), vec!["overdue_invoices", "search_invoices"]);

    let output = tools
        .execute_tool("search_invoices", &json!({"supplier": "acme"}))
        .await
        .unwrap();
    assert_eq!(output["total_matches"], 2);
    assert_eq!(output["invoices"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_implementation_and_tool_fail_initialization() {
    let mut unknown_impl = ToolSystem::new(tool_context(None));
    let result = unknown_impl
        .initialize(&HashMap::from([(
            "overdue_invoices".to_string(),
            ToolConfig::Simple("plugin".to_string()),
        )]))
        .await;
    assert!(matches!(result, Err(ToolError::UnknownImplementation(name)) if name == "plugin"));

    let mut unknown_tool = ToolSystem::new(tool_context(None));
    let result = unknown_tool
        .initialize(&HashMap::from([(
            "send_payment".to_string(),
            ToolConfig::Simple("builtin".to_string()),
        )]))
        .await;
    assert!(matches!(result, Err(ToolError::UnknownTool(_))));
}

#[tokio::test]
async fn test_document_search_without_rag_fails_initialization() {
    let mut tools = ToolSystem::new(tool_context(None));
    let result = tools
        .initialize(&HashMap::from([(
            "search_documents".to_string(),
            ToolConfig::Simple("builtin".to_string()),
        )]))
        .await;
    assert!(matches!(result, Err(ToolError::InitializationError(_))));
}

#[tokio::test]
async fn test_descriptions_are_sorted_with_object_schemas() {
    let tools = tool_system(None).await;
    let descriptions = tools.descriptions();

    let names: Vec<&str> = descriptions.iter().map(|d| d.name.as_str()).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);

    for description in &descriptions {
        assert_eq!(description.parameters["type"], "object", "{}", description.name);
        assert!(description.parameters.get("$schema").is_none());
        assert!(!description.description.is_empty());
    }
}

#[tokio::test]
async fn test_parameters_validated_before_execution() {
    let tools = tool_system(None).await;

    let wrong_type = tools
        .execute_tool("cash_forecast", &json!({"days": "thirty"}))
        .await;
    assert!(matches!(wrong_type, Err(ToolError::ValidationError(_))));

    let out_of_range = tools
        .execute_tool("cash_forecast", &json!({"days": 1000}))
        .await;
    assert!(matches!(out_of_range, Err(ToolError::ValidationError(_))));

    let unknown = tools.execute_tool("delete_invoice", &json!({})).await;
    assert!(matches!(unknown, Err(ToolError::UnknownTool(_))));
}

#[tokio::test]
async fn test_overdue_invoices_as_of_reference_date() {
    let tools = tool_system(None).await;
    let output = tools
        .execute_tool("overdue_invoices", &json!({}))
        .await
        .unwrap();

    assert_eq!(output["invoice_count"], 3);
    assert_eq!(output["total_outstanding"], 1860.0);
    assert_eq!(output["currency"], "EUR");
    assert_eq!(output["invoices"][0]["number"], "INV-2023-099");
    assert_eq!(output["listed"], 3);
}

#[tokio::test]
async fn test_spending_summary_excludes_rejected_invoices() {
    let tools = tool_system(None).await;
    let output = tools
        .execute_tool(
            "spending_summary",
            &json!({"period": "2024-03", "group_by": "supplier"}),
        )
        .await
        .unwrap();

    assert_eq!(output["invoice_count"], 1);
    assert_eq!(output["total_incl_tax"], 2400.0);
    assert_eq!(output["groups"][0]["key"], "Cloudly");
}

#[tokio::test]
async fn test_spending_summary_rejects_unknown_period() {
    let tools = tool_system(None).await;
    let result = tools
        .execute_tool("spending_summary", &json!({"period": "someday"}))
        .await;
    assert!(matches!(result, Err(ToolError::ValidationError(_))));

    let half_range = tools
        .execute_tool("spending_summary", &json!({"start_date": "2024-01-01"}))
        .await;
    assert!(matches!(half_range, Err(ToolError::ValidationError(_))));
}

#[tokio::test]
async fn test_top_suppliers_ranking() {
    let tools = tool_system(None).await;
    let output = tools
        .execute_tool("top_suppliers", &json!({"limit": 2, "period": "2024"}))
        .await
        .unwrap();

    let suppliers = output["suppliers"].as_array().unwrap();
    assert_eq!(suppliers.len(), 2);
    assert_eq!(suppliers[0]["supplier"], "Cloudly");
    assert_eq!(suppliers[0]["total_incl_tax"], 2400.0);
    assert_eq!(suppliers[1]["supplier"], "Acme Fournitures");
}

#[tokio::test]
async fn test_cash_forecast_splits_due_and_overdue() {
    let tools = tool_system(None).await;
    let output = tools
        .execute_tool("cash_forecast", &json!({"days": 14}))
        .await
        .unwrap();

    assert_eq!(output["horizon_days"], 14);
    assert_eq!(output["total_due"], 2400.0);
    assert_eq!(output["overdue_total"], 1860.0);
}

#[tokio::test]
async fn test_search_documents_returns_passages() {
    let (rag, _) = rag_pipeline(&test_config());
    ingest_policy(&rag).await;
    let tools = tool_system(Some(rag)).await;

    let output = tools
        .execute_tool(
            "search_documents",
            &json!({"query": "combien de devis pour une commande", "top_k": 2}),
        )
        .await
        .unwrap();

    let results = output["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0]["document_title"], "Politique achats");
    assert!(results[0]["content"].as_str().unwrap().contains("devis"));
}
