//! Invoice data extraction (IDP)
//!
//! [`InvoiceExtractor`] turns the text of an invoice (OCR output, PDF text
//! layer, e-mail body) into an [`ExtractedInvoice`]. When an LLM provider is
//! configured it asks for structured JSON output matching the schema of
//! [`InvoiceFields`]; the regex heuristics in [`heuristics`] fill any field
//! the model left empty and take over completely when the call fails.
//!
//! Every extracted field carries a confidence in `[0, 1]`, and the result is
//! checked for consistency: HT + TVA must equal TTC within 0.02, the due date
//! cannot precede the issue date, and the mandatory fields must be present.

pub mod heuristics;

use crate::extract_span;
use crate::finance::round_money;
use crate::llm::provider::{
    CompletionRequest, JsonSchemaDefinition, LlmError, LlmProvider, Message, ResponseFormat,
};
use crate::observability::metrics::metrics;
use crate::tools::parameters_schema;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};

/// Allowed gap between HT + TVA and TTC
pub const AMOUNT_TOLERANCE: f64 = 0.02;

const LLM_CONFIDENCE: f32 = 0.9;
const MAX_DOCUMENT_CHARS: usize = 20_000;

const MANDATORY_FIELDS: [&str; 4] = [
    "invoice_number",
    "supplier_name",
    "issue_date",
    "amount_incl_tax",
];

const EXTRACTION_PROMPT: &str = "You extract structured data from supplier invoices, \
often French (HT = excluding tax, TVA = VAT, TTC = including tax). Return only the \
fields you can read in the document and leave the others null. Dates use YYYY-MM-DD. \
Amounts are plain numbers without currency symbols or thousands separators. Currency \
is an ISO 4217 code.";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Document is empty")]
    EmptyDocument,

    #[error("LLM extraction failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Invalid extraction output: {0}")]
    InvalidOutput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Llm,
    Heuristic,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Llm => "llm",
            ExtractionMethod::Heuristic => "heuristic",
        }
    }
}

/// Fields requested from the model
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct InvoiceFields {
    /// Invoice number as printed on the document
    #[serde(default)]
    pub invoice_number: Option<String>,
    /// Legal name of the issuing supplier
    #[serde(default)]
    pub supplier_name: Option<String>,
    #[serde(default)]
    pub issue_date: Option<NaiveDate>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// Total excluding tax (HT)
    #[serde(default)]
    pub amount_excl_tax: Option<f64>,
    /// VAT amount (TVA)
    #[serde(default)]
    pub vat_amount: Option<f64>,
    /// Total including tax (TTC)
    #[serde(default)]
    pub amount_incl_tax: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedInvoice {
    pub invoice_number: Option<String>,
    pub supplier_name: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub amount_excl_tax: Option<f64>,
    pub vat_amount: Option<f64>,
    pub amount_incl_tax: Option<f64>,
    pub currency: Option<String>,
    pub field_confidence: BTreeMap<String, f32>,
    pub warnings: Vec<String>,
    pub method: ExtractionMethod,
    pub overall_confidence: f32,
}

impl ExtractedInvoice {
    pub fn empty(method: ExtractionMethod) -> Self {
        Self {
            invoice_number: None,
            supplier_name: None,
            issue_date: None,
            due_date: None,
            amount_excl_tax: None,
            vat_amount: None,
            amount_incl_tax: None,
            currency: None,
            field_confidence: BTreeMap::new(),
            warnings: Vec::new(),
            method,
            overall_confidence: 0.0,
        }
    }

    pub fn confidence(&self, field: &str) -> Option<f32> {
        self.field_confidence.get(field).copied()
    }

    fn score(&mut self, field: &str, confidence: f32) {
        self.field_confidence
            .insert(field.to_string(), confidence.clamp(0.0, 1.0));
    }

    pub fn set_invoice_number(&mut self, value: String, confidence: f32) {
        let value = value.trim().to_string();
        if !value.is_empty() {
            self.invoice_number = Some(value);
            self.score("invoice_number", confidence);
        }
    }

    pub fn set_supplier(&mut self, value: String, confidence: f32) {
        let value = value.trim().to_string();
        if !value.is_empty() {
            self.supplier_name = Some(value);
            self.score("supplier_name", confidence);
        }
    }

    pub fn set_issue_date(&mut self, value: NaiveDate, confidence: f32) {
        self.issue_date = Some(value);
        self.score("issue_date", confidence);
    }

    pub fn set_due_date(&mut self, value: NaiveDate, confidence: f32) {
        self.due_date = Some(value);
        self.score("due_date", confidence);
    }

    pub fn set_amount_excl_tax(&mut self, value: f64, confidence: f32) {
        self.amount_excl_tax = Some(round_money(value));
        self.score("amount_excl_tax", confidence);
    }

    pub fn set_vat_amount(&mut self, value: f64, confidence: f32) {
        self.vat_amount = Some(round_money(value));
        self.score("vat_amount", confidence);
    }

    pub fn set_amount_incl_tax(&mut self, value: f64, confidence: f32) {
        self.amount_incl_tax = Some(round_money(value));
        self.score("amount_incl_tax", confidence);
    }

    pub fn set_currency(&mut self, value: String, confidence: f32) {
        let value = value.trim().to_uppercase();
        if value.len() == 3 && value.chars().all(|c| c.is_ascii_alphabetic()) {
            self.currency = Some(value);
            self.score("currency", confidence);
        }
    }

    fn from_fields(fields: InvoiceFields) -> Self {
        let mut invoice = Self::empty(ExtractionMethod::Llm);
        if let Some(value) = fields.invoice_number {
            invoice.set_invoice_number(value, LLM_CONFIDENCE);
        }
        if let Some(value) = fields.supplier_name {
            invoice.set_supplier(value, LLM_CONFIDENCE);
        }
        if let Some(value) = fields.issue_date {
            invoice.set_issue_date(value, LLM_CONFIDENCE);
        }
        if let Some(value) = fields.due_date {
            invoice.set_due_date(value, LLM_CONFIDENCE);
        }
        if let Some(value) = fields.amount_excl_tax {
            invoice.set_amount_excl_tax(value, LLM_CONFIDENCE);
        }
        if let Some(value) = fields.vat_amount {
            invoice.set_vat_amount(value, LLM_CONFIDENCE);
        }
        if let Some(value) = fields.amount_incl_tax {
            invoice.set_amount_incl_tax(value, LLM_CONFIDENCE);
        }
        if let Some(value) = fields.currency {
            invoice.set_currency(value, LLM_CONFIDENCE);
        }
        invoice
    }

    /// Fill fields missing here from `other`, keeping its confidences
    fn fill_from(&mut self, mut other: ExtractedInvoice) {
        macro_rules! fill {
            ($field:ident) => {
                if self.$field.is_none() && other.$field.is_some() {
                    let confidence = other.confidence(stringify!($field));
                    self.$field = other.$field.take();
                    if let Some(confidence) = confidence {
                        self.score(stringify!($field), confidence);
                    }
                }
            };
        }
        fill!(invoice_number);
        fill!(supplier_name);
        fill!(issue_date);
        fill!(due_date);
        fill!(amount_excl_tax);
        fill!(vat_amount);
        fill!(amount_incl_tax);
        fill!(currency);
    }

    /// Derive the missing amount, run the consistency checks and compute
    /// the overall confidence
    fn finalize(&mut self) {
        self.derive_missing_amount();

        if let (Some(excl), Some(vat), Some(incl)) =
            (self.amount_excl_tax, self.vat_amount, self.amount_incl_tax)
        {
            let gap = (excl + vat - incl).abs();
            if gap > AMOUNT_TOLERANCE {
                self.warnings.push(format!(
                    "amounts are inconsistent: {excl:.2} HT + {vat:.2} TVA != {incl:.2} TTC (gap {gap:.2})"
                ));
            }
        }

        if let (Some(issue), Some(due)) = (self.issue_date, self.due_date) {
            if due < issue {
                self.warnings
                    .push(format!("due date {due} is before issue date {issue}"));
            }
        }

        for field in MANDATORY_FIELDS {
            if !self.field_confidence.contains_key(field) {
                self.warnings.push(format!("missing mandatory field: {field}"));
            }
        }

        let total: f32 = self.field_confidence.values().sum();
        let average = total / 8.0;
        let penalty = 0.1 * self.warnings.len() as f32;
        self.overall_confidence = (average - penalty).clamp(0.0, 1.0);
    }

    fn derive_missing_amount(&mut self) {
        let derived = |a: &str, b: &str, this: &Self| {
            let ca = this.confidence(a).unwrap_or_default();
            let cb = this.confidence(b).unwrap_or_default();
            ca.min(cb) * 0.9
        };
        match (self.amount_excl_tax, self.vat_amount, self.amount_incl_tax) {
            (Some(excl), Some(vat), None) => {
                let confidence = derived("amount_excl_tax", "vat_amount", &*self);
                self.set_amount_incl_tax(excl + vat, confidence);
            }
            (Some(excl), None, Some(incl)) => {
                let confidence = derived("amount_excl_tax", "amount_incl_tax", &*self);
                self.set_vat_amount(incl - excl, confidence);
            }
            (None, Some(vat), Some(incl)) => {
                let confidence = derived("vat_amount", "amount_incl_tax", &*self);
                self.set_amount_excl_tax(incl - vat, confidence);
            }
            _ => {}
        }
    }
}

/// Strip a Markdown code fence around a JSON payload
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

pub struct InvoiceExtractor {
    llm: Option<Arc<dyn LlmProvider>>,
    model: String,
    fallback: bool,
}

impl InvoiceExtractor {
    pub fn new(llm: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            llm: Some(llm),
            model: model.into(),
            fallback: true,
        }
    }

    /// Extractor using the regex heuristics only
    pub fn heuristic_only() -> Self {
        Self {
            llm: None,
            model: String::new(),
            fallback: true,
        }
    }

    /// Whether a failed LLM call falls back to the heuristics (default) or
    /// is returned as an error
    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    pub async fn extract(&self, text: &str) -> Result<ExtractedInvoice, ExtractionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ExtractionError::EmptyDocument);
        }

        let span = extract_span!(chars = text.chars().count(), llm = self.llm.is_some());
        async move {
            let heuristic = heuristics::extract(text);

            let mut invoice = match &self.llm {
                Some(llm) => match self.extract_with_llm(llm.as_ref(), text).await {
                    Ok(mut invoice) => {
                        invoice.fill_from(heuristic);
                        invoice
                    }
                    Err(e) if self.fallback => {
                        warn!(error = %e, "LLM extraction failed, using heuristics");
                        let mut invoice = heuristic;
                        invoice
                            .warnings
                            .push("LLM extraction unavailable, heuristic values only".to_string());
                        invoice
                    }
                    Err(e) => return Err(e),
                },
                None => heuristic,
            };

            invoice.finalize();
            metrics().invoice_extracted(invoice.method.as_str(), invoice.warnings.len());
            info!(
                method = invoice.method.as_str(),
                confidence = invoice.overall_confidence,
                warnings = invoice.warnings.len(),
                "Invoice extracted"
            );
            Ok(invoice)
        }
        .instrument(span)
        .await
    }

    async fn extract_with_llm(
        &self,
        llm: &dyn LlmProvider,
        text: &str,
    ) -> Result<ExtractedInvoice, ExtractionError> {
        let document = crate::text::truncate_chars(text, MAX_DOCUMENT_CHARS);
        let mut request = CompletionRequest::new(
            self.model.clone(),
            vec![
                Message::system(EXTRACTION_PROMPT),
                Message::user(format!("Invoice document:\n\n{document}")),
            ],
        );
        request.temperature = Some(0.0);
        request.response_format = Some(ResponseFormat::JsonSchema {
            json_schema: JsonSchemaDefinition {
                name: "invoice_fields".to_string(),
                strict: None,
                schema: parameters_schema::<InvoiceFields>(),
            },
        });

        let response = llm.complete(request).await?;
        let content = response
            .content
            .ok_or_else(|| ExtractionError::InvalidOutput("empty model response".to_string()))?;
        debug!(chars = content.len(), "Extraction response received");

        let fields: InvoiceFields = serde_json::from_str(strip_code_fence(&content))
            .map_err(|e| ExtractionError::InvalidOutput(e.to_string()))?;
        Ok(ExtractedInvoice::from_fields(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{MockLlmProvider, MockTurn};
    use serde_json::json;

    const INVOICE_TEXT: &str = "Énergie Plus\nFacture n° FA-2024-0107\nDate de facture : 01/02/2024\nÉchéance : 02/03/2024\nTotal HT : 500,00 €\nTVA 20 % : 100,00 €\nTotal TTC : 600,00 €";

    #[tokio::test]
    async fn test_empty_document_rejected() {
        let extractor = InvoiceExtractor::heuristic_only();
        let result = extractor.extract("  \n ").await;
        assert!(matches!(result, Err(ExtractionError::EmptyDocument)));
    }

    #[tokio::test]
    async fn test_heuristic_extraction_is_consistent() {
        let invoice = InvoiceExtractor::heuristic_only()
            .extract(INVOICE_TEXT)
            .await
            .unwrap();

        assert_eq!(invoice.method, ExtractionMethod::Heuristic);
        assert_eq!(invoice.invoice_number.as_deref(), Some("FA-2024-0107"));
        assert_eq!(invoice.amount_incl_tax, Some(600.0));
        assert!(invoice.warnings.is_empty(), "{:?}", invoice.warnings);
        assert!(invoice.overall_confidence > 0.4);
    }

    #[tokio::test]
    async fn test_llm_extraction_with_code_fence() {
        let payload = json!({
            "invoice_number": "FA-2024-0107",
            "supplier_name": "Énergie Plus SAS",
            "issue_date": "2024-02-01",
            "due_date": "2024-03-02",
            "amount_excl_tax": 500.0,
            "vat_amount": 100.0,
            "amount_incl_tax": 600.0,
            "currency": "eur"
        });
        let provider = Arc::new(MockLlmProvider::single_response(format!(
            "```json\n{payload}\n```"
        )));
        let extractor = InvoiceExtractor::new(provider.clone(), "mock-model");

        let invoice = extractor.extract(INVOICE_TEXT).await.unwrap();
        assert_eq!(invoice.method, ExtractionMethod::Llm);
        assert_eq!(invoice.supplier_name.as_deref(), Some("Énergie Plus SAS"));
        assert_eq!(invoice.currency.as_deref(), Some("EUR"));
        assert_eq!(invoice.confidence("amount_incl_tax"), Some(LLM_CONFIDENCE));
        assert!(invoice.warnings.is_empty());

        let requests = provider.requests().await;
        assert!(matches!(
            requests[0].response_format,
            Some(ResponseFormat::JsonSchema { .. })
        ));
    }

    #[tokio::test]
    async fn test_llm_gaps_filled_by_heuristics() {
        let provider = Arc::new(MockLlmProvider::single_response(
            r#"{"supplier_name": "Énergie Plus", "amount_incl_tax": 600}"#,
        ));
        let invoice = InvoiceExtractor::new(provider, "mock-model")
            .extract(INVOICE_TEXT)
            .await
            .unwrap();

        assert_eq!(invoice.method, ExtractionMethod::Llm);
        assert_eq!(invoice.invoice_number.as_deref(), Some("FA-2024-0107"));
        assert_eq!(invoice.confidence("invoice_number"), Some(0.7));
        assert_eq!(invoice.amount_excl_tax, Some(500.0));
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back() {
        let provider = Arc::new(MockLlmProvider::with_failure());
        let invoice = InvoiceExtractor::new(provider, "mock-model")
            .extract(INVOICE_TEXT)
            .await
            .unwrap();

        assert_eq!(invoice.method, ExtractionMethod::Heuristic);
        assert_eq!(invoice.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_llm_failure_without_fallback() {
        let provider = Arc::new(MockLlmProvider::new(vec![MockTurn::text("not json")]));
        let result = InvoiceExtractor::new(provider, "mock-model")
            .with_fallback(false)
            .extract(INVOICE_TEXT)
            .await;
        assert!(matches!(result, Err(ExtractionError::InvalidOutput(_))));
    }

    #[tokio::test]
    async fn test_consistency_warnings() {
        let text = "Fournisseur : Cloudly\nFacture n° CL-889\nDate de facture : 10/03/2024\nÉchéance : 01/03/2024\nTotal HT : 1 000,00 €\nTVA : 150,00 €\nTotal TTC : 1 200,00 €";
        let invoice = InvoiceExtractor::heuristic_only().extract(text).await.unwrap();

        assert!(invoice.warnings.iter().any(|w| w.contains("inconsistent")));
        assert!(invoice.warnings.iter().any(|w| w.contains("before issue date")));
    }

    #[test]
    fn test_missing_amount_is_derived() {
        let mut invoice = ExtractedInvoice::empty(ExtractionMethod::Heuristic);
        invoice.set_amount_excl_tax(1250.0, 0.7);
        invoice.set_amount_incl_tax(1500.0, 0.7);
        invoice.finalize();

        assert_eq!(invoice.vat_amount, Some(250.0));
        let confidence = invoice.confidence("vat_amount").unwrap();
        assert!((confidence - 0.63).abs() < 1e-6);
        assert!(invoice
            .warnings
            .contains(&"missing mandatory field: invoice_number".to_string()));
    }

    #[test]
    fn test_fill_from_keeps_existing_and_copies_confidence() {
        let mut primary = ExtractedInvoice::empty(ExtractionMethod::Llm);
        primary.set_supplier("Cloudly".to_string(), 0.9);

        let mut fallback = ExtractedInvoice::empty(ExtractionMethod::Heuristic);
        fallback.set_supplier("Cloudly SAS".to_string(), 0.6);
        fallback.set_invoice_number("CL-889".to_string(), 0.7);
        fallback.set_currency("eur".to_string(), 0.5);

        primary.fill_from(fallback);

        assert_eq!(primary.supplier_name.as_deref(), Some("Cloudly"));
        assert_eq!(primary.confidence("supplier_name"), Some(0.9));
        assert_eq!(primary.invoice_number.as_deref(), Some("CL-889"));
        assert_eq!(primary.confidence("invoice_number"), Some(0.7));
        assert_eq!(primary.currency.as_deref(), Some("EUR"));
        assert_eq!(primary.confidence("currency"), Some(0.5));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence(" {} "), "{}");
    }
}
