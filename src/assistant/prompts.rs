//! System prompt assembly and canned answers

use crate::intent::{Intent, IntentClassification};
use crate::rag::RagAnswerContext;
use chrono::NaiveDate;

const DEFAULT_PERSONA: &str = "You are Ask DAF, the finance assistant of the finance department \
(DAF). You answer questions about supplier invoices, spending, payments, cash and the \
organisation's internal documents.";

const DATA_RULES: &str = "Rules:
- Every amount, count, percentage and invoice number in your answer must come from a tool \
result or a numbered source. Never estimate or invent figures.
- Call a tool whenever the question needs invoice data; do not answer from memory.
- If the tools return nothing relevant, say so plainly.
- Amounts are in the organisation currency unless a tool says otherwise; format them with \
two decimals.";

const CITATION_RULES: &str = "When you use information from a numbered source, cite it with \
its number in square brackets, for example [1] or [1, 3]. Only cite numbers listed below.";

/// Everything the system prompt is built from
pub struct PromptContext<'a> {
    pub persona: Option<&'a str>,
    pub organization: Option<&'a str>,
    pub language: &'a str,
    pub currency: &'a str,
    pub today: NaiveDate,
    pub classification: &'a IntentClassification,
    pub rag: Option<&'a RagAnswerContext>,
}

fn language_name(language: &str) -> &'static str {
    if language.starts_with("en") {
        "English"
    } else {
        "French"
    }
}

pub fn build_system_prompt(context: &PromptContext<'_>) -> String {
    let mut sections = vec![context.persona.unwrap_or(DEFAULT_PERSONA).to_string()];

    if let Some(organization) = context.organization {
        sections.push(format!("Organisation: {organization}."));
    }
    sections.push(format!(
        "Today is {} ({}). Resolve relative periods such as \"this month\" against this date.",
        context.today.format("%Y-%m-%d"),
        context.today.format("%A")
    ));
    sections.push(format!(
        "Answer in {} unless the user writes in another language. Organisation currency: {}.",
        language_name(context.language),
        context.currency
    ));
    sections.push(DATA_RULES.to_string());

    let classification = context.classification;
    if classification.intent != Intent::Unknown {
        let mut hint = format!(
            "The question looks like: {} (confidence {:.2}).",
            classification.intent, classification.confidence
        );
        if !classification.suggested_tools.is_empty() {
            hint.push_str(&format!(
                " Suggested tools: {}.",
                classification.suggested_tools.join(", ")
            ));
        }
        sections.push(hint);
    }

    if !classification.entities.is_empty() {
        if let Ok(entities) = serde_json::to_string(&classification.entities) {
            sections.push(format!("Entities detected in the question: {entities}"));
        }
    }

    match context.rag {
        Some(rag) if !rag.is_empty() => {
            sections.push(CITATION_RULES.to_string());
            sections.push(format!("Sources:\n{}", rag.context));
        }
        _ => sections.push(
            "Passages returned by search_documents are numbered in the order they are \
             returned; cite them as [n] the same way."
                .to_string(),
        ),
    }

    sections.join("\n\n")
}

/// Answer for intents handled without the model
pub fn canned_answer(intent: Intent, language: &str) -> Option<&'static str> {
    let english = language.starts_with("en");
    let answer = match (intent, english) {
        (Intent::Greeting, false) => {
            "Bonjour ! Je suis Ask DAF, votre assistant finance. Posez-moi une question sur vos \
             factures, vos dépenses, vos fournisseurs, vos échéances de paiement ou vos documents."
        }
        (Intent::Greeting, true) => {
            "Hello! I'm Ask DAF, your finance assistant. Ask me about your invoices, spending, \
             suppliers, upcoming payments or documents."
        }
        (Intent::Help, false) => {
            "Je peux vous aider à :\n\
             - retrouver une facture (« où en est la facture FA-2024-012 ? »)\n\
             - analyser vos dépenses (« dépenses du trimestre par catégorie »)\n\
             - classer vos fournisseurs (« top 5 fournisseurs cette année »)\n\
             - suivre les retards de paiement (« factures en retard »)\n\
             - prévoir vos décaissements (« que devons-nous payer dans les 30 prochains jours ? »)\n\
             - interroger vos documents (« que dit la politique achats sur les devis ? »)"
        }
        (Intent::Help, true) => {
            "I can help you:\n\
             - find an invoice (\"what is the status of invoice INV-2024-012?\")\n\
             - analyse spending (\"spending this quarter by category\")\n\
             - rank suppliers (\"top 5 suppliers this year\")\n\
             - track late payments (\"overdue invoices\")\n\
             - forecast outgoing payments (\"what do we need to pay in the next 30 days?\")\n\
             - search your documents (\"what does the purchasing policy say about quotes?\")"
        }
        (Intent::OutOfScope, false) => {
            "Je suis spécialisé dans la finance de votre organisation (factures, dépenses, \
             fournisseurs, trésorerie et documents internes) et ne peux pas répondre à cette \
             question. Tapez « aide » pour voir ce que je sais faire."
        }
        (Intent::OutOfScope, true) => {
            "I focus on your organisation's finance (invoices, spending, suppliers, cash and \
             internal documents) and can't help with that question. Type \"help\" to see what I \
             can do."
        }
        _ => return None,
    };
    Some(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentClassifier;
    use crate::rag::Source;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 20).unwrap()
    }

    #[test]
    fn test_prompt_contains_date_hint_and_entities() {
        let classification = IntentClassifier::new().classify("Dépenses du mois dernier chez Acme ?");
        let prompt = build_system_prompt(&PromptContext {
            persona: None,
            organization: Some("Ville de Lyon"),
            language: "fr",
            currency: "EUR",
            today: today(),
            classification: &classification,
            rag: None,
        });

        assert!(prompt.starts_with("You are Ask DAF"));
        assert!(prompt.contains("Organisation: Ville de Lyon."));
        assert!(prompt.contains("Today is 2024-03-20 (Wednesday)"));
        assert!(prompt.contains("Answer in French"));
        assert!(prompt.contains("spending_analysis"));
        assert!(prompt.contains("Entities detected"));
    }

    #[test]
    fn test_prompt_lists_sources() {
        let classification = IntentClassifier::new().classify("Que dit le contrat de maintenance ?");
        let rag = RagAnswerContext {
            context: "[1] Contrat maintenance (chunk 0)\nPréavis de trois mois.".to_string(),
            sources: vec![Source {
                number: 1,
                document_id: "contract".to_string(),
                document_title: "Contrat maintenance".to_string(),
                chunk_index: 0,
                content: "Préavis de trois mois.".to_string(),
                score: 0.8,
            }],
            token_count: 14,
        };
        let prompt = build_system_prompt(&PromptContext {
            persona: Some("Custom persona."),
            organization: None,
            language: "en",
            currency: "EUR",
            today: today(),
            classification: &classification,
            rag: Some(&rag),
        });

        assert!(prompt.starts_with("Custom persona."));
        assert!(prompt.contains("Answer in English"));
        assert!(prompt.contains("Sources:\n[1] Contrat maintenance (chunk 0)"));
        assert!(prompt.contains("square brackets"));
    }

    #[test]
    fn test_canned_answers() {
        assert!(canned_answer(Intent::Greeting, "fr").unwrap().starts_with("Bonjour"));
        assert!(canned_answer(Intent::Help, "en").unwrap().starts_with("I can help"));
        assert!(canned_answer(Intent::OutOfScope, "fr").is_some());
        assert!(canned_answer(Intent::SpendingAnalysis, "fr").is_none());
    }
}
