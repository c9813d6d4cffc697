//! Heuristic hallucination checks on assistant answers
//!
//! An answer is compared with the evidence gathered while producing it:
//! tool results, retrieved sources and the question itself. Each problem
//! found becomes an [`Issue`]; any `High` issue makes the answer invalid.

pub mod numbers;
pub mod policy;

pub use policy::ValidationPolicy;

use crate::finance::invoice::normalize_reference;
use crate::intent::entities::extract_invoice_numbers;
use crate::intent::Intent;
use crate::observability::metrics::metrics;
use crate::rag::citations::{extract_citations, Source};
use crate::text::fold_accents;
use numbers::{collect_evidence_numbers, extract_figures, is_supported};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    UnsupportedNumber,
    UnknownCitation,
    UngroundedClaim,
    UnknownInvoiceReference,
    EmptyAnswer,
    Refusal,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::UnsupportedNumber => "unsupported_number",
            IssueKind::UnknownCitation => "unknown_citation",
            IssueKind::UngroundedClaim => "ungrounded_claim",
            IssueKind::UnknownInvoiceReference => "unknown_invoice_reference",
            IssueKind::EmptyAnswer => "empty_answer",
            IssueKind::Refusal => "refusal",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            IssueKind::UnsupportedNumber
            | IssueKind::UngroundedClaim
            | IssueKind::UnknownInvoiceReference
            | IssueKind::EmptyAnswer => Severity::High,
            IssueKind::UnknownCitation => Severity::Medium,
            IssueKind::Refusal => Severity::Low,
        }
    }

    /// Confidence lost when this issue is present
    pub fn penalty(&self) -> f32 {
        match self {
            IssueKind::UnsupportedNumber => 0.3,
            IssueKind::UnknownCitation => 0.2,
            IssueKind::UngroundedClaim => 0.4,
            IssueKind::UnknownInvoiceReference => 0.3,
            IssueKind::EmptyAnswer => 0.5,
            IssueKind::Refusal => 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub detail: String,
}

impl Issue {
    fn new(kind: IssueKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub confidence: f32,
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    fn from_issues(issues: Vec<Issue>) -> Self {
        let penalty: f32 = issues.iter().map(|issue| issue.kind.penalty()).sum();
        Self {
            is_valid: issues.iter().all(|issue| issue.severity != Severity::High),
            confidence: (1.0 - penalty).max(0.0),
            issues,
        }
    }

    pub fn has(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|issue| issue.kind == kind)
    }
}

/// What the answer may rely on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub question: String,
    pub intent: Intent,
    pub tool_results: Vec<Value>,
    pub sources: Vec<Source>,
    pub tools_called: usize,
}

impl Evidence {
    pub fn new(question: impl Into<String>, intent: Intent) -> Self {
        Self {
            question: question.into(),
            intent,
            tool_results: Vec::new(),
            sources: Vec::new(),
            tools_called: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.tools_called == 0 && self.sources.is_empty()
    }
}

const REFUSAL_PHRASES: &[&str] = &[
    "je ne peux pas",
    "je ne suis pas en mesure",
    "en tant qu'ia",
    "en tant qu'assistant ia",
    "i cannot",
    "i can't",
    "i am unable",
    "i'm unable",
    "as an ai",
];

#[derive(Debug, Clone, Default)]
pub struct ResponseValidator;

impl ResponseValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, answer: &str, evidence: &Evidence) -> ValidationReport {
        let mut issues = Vec::new();

        if answer.trim().is_empty() {
            issues.push(Issue::new(IssueKind::EmptyAnswer, "The answer is empty"));
            return self.finish(issues);
        }

        let folded = fold_accents(answer);
        if let Some(phrase) = REFUSAL_PHRASES.iter().find(|p| folded.contains(*p)) {
            issues.push(Issue::new(
                IssueKind::Refusal,
                format!("The answer declines to help (\"{phrase}\")"),
            ));
        }

        let claimed: Vec<_> = extract_figures(answer)
            .into_iter()
            .filter(|figure| figure.needs_support())
            .collect();

        if evidence.intent.is_data_intent() && evidence.is_empty() && !claimed.is_empty() {
            issues.push(Issue::new(
                IssueKind::UngroundedClaim,
                "Figures were given for a data question without calling a tool or retrieving a source",
            ));
        }

        let source_texts: Vec<&str> = evidence
            .sources
            .iter()
            .map(|source| source.content.as_str())
            .chain(std::iter::once(evidence.question.as_str()))
            .collect();
        let backing = collect_evidence_numbers(&evidence.tool_results, &source_texts);
        let unsupported: Vec<&str> = claimed
            .iter()
            .filter(|figure| !is_supported(figure, &backing))
            .map(|figure| figure.raw.as_str())
            .collect();
        if !unsupported.is_empty() {
            issues.push(Issue::new(
                IssueKind::UnsupportedNumber,
                format!("Figures not found in the evidence: {}", unsupported.join(", ")),
            ));
        }

        let citations = extract_citations(answer, &evidence.sources);
        if !citations.unknown_markers.is_empty() {
            let markers: Vec<String> = citations
                .unknown_markers
                .iter()
                .map(|n| format!("[{n}]"))
                .collect();
            issues.push(Issue::new(
                IssueKind::UnknownCitation,
                format!("Citations without a matching source: {}", markers.join(", ")),
            ));
        }

        let unknown_refs = self.unknown_invoice_references(answer, evidence);
        if !unknown_refs.is_empty() {
            issues.push(Issue::new(
                IssueKind::UnknownInvoiceReference,
                format!("Invoice numbers not present in the evidence: {}", unknown_refs.join(", ")),
            ));
        }

        self.finish(issues)
    }

    fn unknown_invoice_references(&self, answer: &str, evidence: &Evidence) -> Vec<String> {
        let referenced = extract_invoice_numbers(answer);
        if referenced.is_empty() {
            return Vec::new();
        }

        let mut haystack = normalize_reference(&evidence.question);
        for result in &evidence.tool_results {
            haystack.push_str(&normalize_reference(&result.to_string()));
        }
        for source in &evidence.sources {
            haystack.push_str(&normalize_reference(&source.content));
        }

        referenced
            .into_iter()
            .filter(|number| !haystack.contains(&normalize_reference(number)))
            .collect()
    }

    fn finish(&self, issues: Vec<Issue>) -> ValidationReport {
        for issue in &issues {
            metrics().validation_issue(issue.kind.as_str());
        }
        let report = ValidationReport::from_issues(issues);
        debug!(
            valid = report.is_valid,
            confidence = report.confidence,
            issues = report.issues.len(),
            "Validated answer"
        );
        report
    }
}
