//! Rule-based intent classification
//!
//! Questions are matched against weighted French and English vocabularies
//! after accent folding. The best-scoring intent wins; ties follow
//! [`Intent::PRIORITY`]. Extracted entities add small boosts (an invoice
//! number points at a lookup, a day window ahead at a cash forecast).

pub mod entities;

pub use entities::{extract_entities, AmountMention, ExtractedEntities, PeriodMention};

use crate::text::word_haystack;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the user is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    Help,
    InvoiceLookup,
    SpendingAnalysis,
    SupplierAnalysis,
    PaymentStatus,
    CashForecast,
    DocumentQuestion,
    OutOfScope,
    Unknown,
}

impl Intent {
    /// Tie-break order, strongest first
    pub const PRIORITY: [Intent; 8] = [
        Intent::InvoiceLookup,
        Intent::PaymentStatus,
        Intent::CashForecast,
        Intent::SupplierAnalysis,
        Intent::SpendingAnalysis,
        Intent::DocumentQuestion,
        Intent::Help,
        Intent::OutOfScope,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::Help => "help",
            Intent::InvoiceLookup => "invoice_lookup",
            Intent::SpendingAnalysis => "spending_analysis",
            Intent::SupplierAnalysis => "supplier_analysis",
            Intent::PaymentStatus => "payment_status",
            Intent::CashForecast => "cash_forecast",
            Intent::DocumentQuestion => "document_question",
            Intent::OutOfScope => "out_of_scope",
            Intent::Unknown => "unknown",
        }
    }

    /// Intents whose answers are built from invoice data
    pub fn is_data_intent(&self) -> bool {
        matches!(
            self,
            Intent::InvoiceLookup
                | Intent::SpendingAnalysis
                | Intent::SupplierAnalysis
                | Intent::PaymentStatus
                | Intent::CashForecast
        )
    }

    /// Intents answered without calling the LLM
    pub fn is_canned(&self) -> bool {
        matches!(self, Intent::Greeting | Intent::Help | Intent::OutOfScope)
    }

    pub fn suggested_tools(&self) -> &'static [&'static str] {
        match self {
            Intent::InvoiceLookup => &["search_invoices"],
            Intent::SpendingAnalysis => &["spending_summary"],
            Intent::SupplierAnalysis => &["top_suppliers", "spending_summary"],
            Intent::PaymentStatus => &["overdue_invoices", "search_invoices"],
            Intent::CashForecast => &["cash_forecast", "overdue_invoices"],
            Intent::DocumentQuestion => &["search_documents"],
            Intent::Greeting | Intent::Help | Intent::OutOfScope | Intent::Unknown => &[],
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentClassification {
    pub intent: Intent,
    pub confidence: f32,
    pub matched_keywords: Vec<String>,
    pub entities: ExtractedEntities,
    pub suggested_tools: Vec<String>,
}

/// A vocabulary entry; a trailing `*` matches any word starting with the stem
struct Keyword {
    pattern: &'static str,
    weight: f32,
}

const fn kw(pattern: &'static str, weight: f32) -> Keyword {
    Keyword { pattern, weight }
}

const GREETING: &[Keyword] = &[
    kw("bonjour", 1.0),
    kw("bonsoir", 1.0),
    kw("salut", 1.0),
    kw("coucou", 1.0),
    kw("hello", 1.0),
    kw("hi", 1.0),
    kw("hey", 1.0),
    kw("good morning", 1.0),
    kw("good afternoon", 1.0),
    kw("merci", 1.0),
    kw("thanks", 1.0),
    kw("thank you", 1.0),
];

const HELP: &[Keyword] = &[
    kw("aide", 1.5),
    kw("help", 1.5),
    kw("que peux tu faire", 3.0),
    kw("que sais tu faire", 3.0),
    kw("what can you do", 3.0),
    kw("how does it work", 2.0),
    kw("comment ca marche", 2.0),
    kw("comment fonctionne*", 1.5),
    kw("fonctionnalit*", 1.5),
    kw("capabilit*", 1.5),
    kw("exemples de questions", 2.0),
    kw("example questions", 2.0),
];

const INVOICE_LOOKUP: &[Keyword] = &[
    kw("factur*", 1.0),
    kw("invoice*", 1.0),
    kw("numero de facture", 2.0),
    kw("invoice number", 2.0),
    kw("montant de la facture", 1.5),
    kw("detail de la facture", 1.5),
    kw("details of invoice", 1.5),
];

const SPENDING: &[Keyword] = &[
    kw("depense*", 2.0),
    kw("spend*", 2.0),
    kw("spent", 2.0),
    kw("expense*", 2.0),
    kw("charges", 1.5),
    kw("cout*", 1.5),
    kw("cost*", 1.5),
    kw("budget*", 1.5),
    kw("combien", 1.0),
    kw("how much", 1.0),
    kw("total", 1.0),
    kw("par categorie", 1.5),
    kw("by category", 1.5),
    kw("par mois", 1.0),
    kw("per month", 1.0),
    kw("evolution", 1.0),
    kw("trend*", 1.0),
    kw("achat*", 1.0),
    kw("purchas*", 1.0),
];

const SUPPLIER: &[Keyword] = &[
    kw("fournisseur*", 2.0),
    kw("supplier*", 2.0),
    kw("vendor*", 2.0),
    kw("prestataire*", 1.5),
    kw("top", 1.0),
    kw("principaux", 1.0),
    kw("plus gros", 1.0),
    kw("biggest", 1.0),
    kw("largest", 1.0),
    kw("classement", 1.0),
    kw("ranking", 1.0),
    kw("concentration", 1.0),
];

const PAYMENT: &[Keyword] = &[
    kw("paye", 1.5),
    kw("payee*", 1.5),
    kw("paid", 1.5),
    kw("impaye*", 2.5),
    kw("unpaid", 2.5),
    kw("en retard", 2.0),
    kw("retard*", 1.0),
    kw("overdue", 2.5),
    kw("late", 1.5),
    kw("echeance*", 1.5),
    kw("echu*", 2.0),
    kw("due", 1.0),
    kw("statut", 1.5),
    kw("status", 1.5),
    kw("relance*", 1.5),
    kw("reglement*", 1.5),
    kw("paiement*", 1.5),
    kw("payment*", 1.5),
    kw("outstanding", 2.0),
    kw("en attente", 1.5),
    kw("pending", 1.5),
];

const CASH: &[Keyword] = &[
    kw("tresorerie", 2.5),
    kw("cash*", 2.0),
    kw("prevision*", 2.0),
    kw("previsionnel*", 2.0),
    kw("forecast*", 2.5),
    kw("projection*", 1.5),
    kw("a venir", 1.5),
    kw("a payer", 1.5),
    kw("to pay", 1.0),
    kw("upcoming", 1.5),
    kw("decaissement*", 2.0),
    kw("encaissement*", 2.0),
    kw("prochain*", 1.0),
    kw("next", 0.5),
    kw("liquidit*", 2.0),
    kw("runway", 2.0),
];

const DOCUMENT: &[Keyword] = &[
    kw("document*", 2.0),
    kw("contrat*", 2.0),
    kw("contract*", 2.0),
    kw("politique*", 1.5),
    kw("policy", 1.5),
    kw("policies", 1.5),
    kw("procedure*", 1.5),
    kw("selon", 1.0),
    kw("according to", 1.0),
    kw("clause*", 2.0),
    kw("conditions generales", 2.0),
    kw("conditions", 1.0),
    kw("terms", 1.0),
    kw("pdf", 1.5),
    kw("rapport*", 1.0),
    kw("report*", 1.0),
    kw("note de service", 2.0),
    kw("manuel", 1.5),
    kw("manual", 1.5),
    kw("que dit", 1.5),
    kw("what does", 1.0),
    kw("penalit*", 1.0),
    kw("penalt*", 1.0),
    kw("delai de paiement", 1.5),
    kw("payment terms", 1.5),
];

const OUT_OF_SCOPE: &[Keyword] = &[
    kw("meteo", 3.0),
    kw("weather", 3.0),
    kw("blague*", 3.0),
    kw("joke*", 3.0),
    kw("football", 3.0),
    kw("recipe*", 3.0),
    kw("film*", 3.0),
    kw("movie*", 3.0),
    kw("poeme*", 3.0),
    kw("poem*", 3.0),
    kw("horoscope", 3.0),
    kw("chanson*", 3.0),
    kw("song*", 3.0),
];

const INVOICE_NUMBER_BOOST: f32 = 2.5;
const SUPPLIER_NAME_BOOST: f32 = 1.0;
const FORWARD_WINDOW_BOOST: f32 = 1.0;
const MAX_GREETING_WORDS: usize = 6;

const MIN_CONFIDENCE: f32 = 0.3;
const MAX_CONFIDENCE: f32 = 0.95;

/// Accent- and case-insensitive keyword classifier
#[derive(Debug, Clone, Default)]
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    fn vocabulary(intent: Intent) -> &'static [Keyword] {
        match intent {
            Intent::Greeting => GREETING,
            Intent::Help => HELP,
            Intent::InvoiceLookup => INVOICE_LOOKUP,
            Intent::SpendingAnalysis => SPENDING,
            Intent::SupplierAnalysis => SUPPLIER,
            Intent::PaymentStatus => PAYMENT,
            Intent::CashForecast => CASH,
            Intent::DocumentQuestion => DOCUMENT,
            Intent::OutOfScope => OUT_OF_SCOPE,
            Intent::Unknown => &[],
        }
    }

    pub fn classify(&self, question: &str) -> IntentClassification {
        let haystack = word_haystack(question);
        let entities = extract_entities(question);

        let mut scores: Vec<(Intent, f32, Vec<String>)> = Intent::PRIORITY
            .iter()
            .map(|intent| {
                let (score, matched) = score_keywords(&haystack, Self::vocabulary(*intent));
                (*intent, score, matched)
            })
            .collect();

        for (intent, score, _) in scores.iter_mut() {
            *score += match intent {
                Intent::InvoiceLookup if !entities.invoice_numbers.is_empty() => {
                    INVOICE_NUMBER_BOOST
                }
                Intent::SupplierAnalysis if !entities.suppliers.is_empty() => SUPPLIER_NAME_BOOST,
                Intent::CashForecast
                    if entities
                        .periods
                        .iter()
                        .any(|p| matches!(p, PeriodMention::NextDays { .. })) =>
                {
                    FORWARD_WINDOW_BOOST
                }
                _ => 0.0,
            };
        }

        let (greeting_score, greeting_matches) = score_keywords(&haystack, GREETING);
        let other_total: f32 = scores.iter().map(|(_, score, _)| score).sum();
        let word_count = haystack.split_whitespace().count();

        if greeting_score > 0.0 && other_total == 0.0 && word_count <= MAX_GREETING_WORDS {
            return IntentClassification {
                intent: Intent::Greeting,
                confidence: scaled_confidence(greeting_score, 0.0),
                matched_keywords: greeting_matches,
                entities,
                suggested_tools: Vec::new(),
            };
        }

        // Stable sort keeps PRIORITY order among equal scores
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (best_intent, best_score, matched) = scores[0].clone();
        if best_score <= 0.0 {
            return IntentClassification {
                intent: Intent::Unknown,
                confidence: 0.0,
                matched_keywords: Vec::new(),
                entities,
                suggested_tools: Vec::new(),
            };
        }
        let second_score = scores[1].1;

        IntentClassification {
            intent: best_intent,
            confidence: scaled_confidence(best_score, second_score),
            matched_keywords: matched,
            entities,
            suggested_tools: best_intent
                .suggested_tools()
                .iter()
                .map(|tool| tool.to_string())
                .collect(),
        }
    }
}

/// best / (best + second + 1), mapped onto [0.3, 0.95]
fn scaled_confidence(best: f32, second: f32) -> f32 {
    let raw = best / (best + second + 1.0);
    (MIN_CONFIDENCE + raw * (MAX_CONFIDENCE - MIN_CONFIDENCE)).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

fn score_keywords(haystack: &str, vocabulary: &[Keyword]) -> (f32, Vec<String>) {
    let mut score = 0.0;
    let mut matched = Vec::new();
    for keyword in vocabulary {
        if keyword_matches(haystack, keyword.pattern) {
            score += keyword.weight;
            matched.push(keyword.pattern.trim_end_matches('*').to_string());
        }
    }
    (score, matched)
}

fn keyword_matches(haystack: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(stem) => haystack.contains(&format!(" {stem}")),
        None => haystack.contains(&format!(" {pattern} ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(question: &str) -> IntentClassification {
        IntentClassifier::new().classify(question)
    }

    #[test]
    fn test_greetings() {
        assert_eq!(classify("Bonjour !").intent, Intent::Greeting);
        assert_eq!(classify("hi there").intent, Intent::Greeting);
        assert_eq!(classify("Merci beaucoup").intent, Intent::Greeting);
    }

    #[test]
    fn test_greeting_with_question_is_not_greeting() {
        let result = classify("Bonjour, quelles factures sont en retard ?");
        assert_eq!(result.intent, Intent::PaymentStatus);
    }

    #[test]
    fn test_help() {
        assert_eq!(classify("Que peux-tu faire ?").intent, Intent::Help);
        assert_eq!(classify("What can you do?").intent, Intent::Help);
    }

    #[test]
    fn test_invoice_lookup_with_number() {
        let result = classify("Montre-moi la facture INV-2024-001");
        assert_eq!(result.intent, Intent::InvoiceLookup);
        assert_eq!(result.entities.invoice_numbers, vec!["INV-2024-001".to_string()]);
        assert_eq!(result.suggested_tools, vec!["search_invoices".to_string()]);
    }

    #[test]
    fn test_spending_analysis() {
        let result = classify("Combien avons-nous dépensé le mois dernier ?");
        assert_eq!(result.intent, Intent::SpendingAnalysis);
        assert_eq!(result.entities.periods, vec![PeriodMention::LastMonth]);
    }

    #[test]
    fn test_supplier_analysis() {
        assert_eq!(classify("Quels sont nos 5 principaux fournisseurs ?").intent, Intent::SupplierAnalysis);
        assert_eq!(classify("Who are our top suppliers this year?").intent, Intent::SupplierAnalysis);
    }

    #[test]
    fn test_payment_status() {
        assert_eq!(classify("Which invoices are overdue?").intent, Intent::PaymentStatus);
        assert_eq!(classify("Factures impayées").intent, Intent::PaymentStatus);
    }

    #[test]
    fn test_cash_forecast() {
        assert_eq!(classify("Prévision de trésorerie sur 30 jours").intent, Intent::CashForecast);
        assert_eq!(classify("What is our cash forecast for the next 60 days?").intent, Intent::CashForecast);
    }

    #[test]
    fn test_document_question() {
        let result = classify("Que dit le contrat cadre sur les pénalités ?");
        assert_eq!(result.intent, Intent::DocumentQuestion);
        assert_eq!(result.suggested_tools, vec!["search_documents".to_string()]);
    }

    #[test]
    fn test_out_of_scope() {
        assert_eq!(classify("Quelle météo demain à Paris ?").intent, Intent::OutOfScope);
        assert_eq!(classify("Tell me a joke").intent, Intent::OutOfScope);
    }

    #[test]
    fn test_unknown() {
        let result = classify("Xyzzy plugh");
        assert_eq!(result.intent, Intent::Unknown);
        assert_eq!(result.confidence, 0.0);
        assert!(result.matched_keywords.is_empty());
    }

    #[test]
    fn test_accent_and_case_insensitive() {
        assert_eq!(
            classify("TRÉSORERIE PRÉVISIONNELLE").intent,
            classify("tresorerie previsionnelle").intent
        );
    }

    #[test]
    fn test_confidence_bounds_and_margin() {
        let clear = classify("Factures impayées en retard, relances et échéances dépassées");
        let ambiguous = classify("dépenses fournisseurs");

        for result in [&clear, &ambiguous] {
            assert!(result.confidence >= 0.3 && result.confidence <= 0.95);
        }
        assert!(clear.confidence > ambiguous.confidence);
    }

    #[test]
    fn test_tie_uses_priority_order() {
        // Two points each for spending and supplier analysis
        let result = classify("dépenses fournisseurs");
        assert_eq!(result.intent, Intent::SupplierAnalysis);
    }

    #[test]
    fn test_scaled_confidence() {
        assert!((scaled_confidence(3.0, 0.0) - (0.3 + 0.75 * 0.65)).abs() < 1e-6);
        assert!(scaled_confidence(1000.0, 0.0) <= 0.95);
        assert!(scaled_confidence(0.5, 10.0) >= 0.3);
    }

    #[test]
    fn test_intent_helpers() {
        assert!(Intent::SpendingAnalysis.is_data_intent());
        assert!(!Intent::DocumentQuestion.is_data_intent());
        assert!(Intent::Help.is_canned());
        assert_eq!(Intent::CashForecast.to_string(), "cash_forecast");
        assert_eq!(serde_json::to_string(&Intent::OutOfScope).unwrap(), "\"out_of_scope\"");
    }
}
