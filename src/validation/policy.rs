//! What the assistant does with an invalid answer

use crate::validation::{IssueKind, ValidationReport};
use serde::{Deserialize, Serialize};

/// Retry once with a corrective message, then fall back to a disclaimer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    pub retry_on_invalid: bool,
    pub max_retries: u32,
    pub language: String,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            retry_on_invalid: true,
            max_retries: 1,
            language: "fr".to_string(),
        }
    }
}

impl ValidationPolicy {
    pub fn for_language(language: &str) -> Self {
        Self {
            language: language.to_string(),
            ..Self::default()
        }
    }

    pub fn should_retry(&self, report: &ValidationReport, retries_done: u32) -> bool {
        !report.is_valid && self.retry_on_invalid && retries_done < self.max_retries
    }

    /// Message sent back to the model to correct an invalid answer
    pub fn corrective_message(&self, report: &ValidationReport) -> String {
        let mut lines = vec![
            "Your previous answer failed verification against the data you were given:".to_string(),
        ];
        for issue in &report.issues {
            lines.push(format!("- {}: {}", issue.kind.as_str(), issue.detail));
        }

        if report.has(IssueKind::UngroundedClaim) {
            lines.push(
                "Call the appropriate tool before giving any figure; never estimate amounts."
                    .to_string(),
            );
        }
        lines.push(
            "Rewrite the answer using only figures and invoice numbers that appear in the tool \
             results or sources, and cite sources only with numbers that exist."
                .to_string(),
        );
        lines.push(format!("Answer in the user's language ({}).", self.language));
        lines.join("\n")
    }

    /// Warning appended to an answer that is still invalid after retrying
    pub fn disclaimer(&self) -> &'static str {
        if self.language.starts_with("en") {
            "⚠️ Some figures in this answer could not be verified against your data. Please check them before relying on them."
        } else {
            "⚠️ Certains éléments de cette réponse n'ont pas pu être vérifiés dans vos données. Merci de les contrôler avant de vous y fier."
        }
    }

    pub fn with_disclaimer(&self, answer: &str) -> String {
        format!("{}\n\n{}", answer.trim_end(), self.disclaimer())
    }
}
