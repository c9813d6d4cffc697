//! Entity extraction for finance questions
//!
//! Periods, amounts, invoice numbers and supplier names in French or
//! English phrasing.

use crate::text::{fold_accents, parse_number};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A time period mentioned in a question, relative or absolute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeriodMention {
    ThisMonth,
    LastMonth,
    ThisQuarter,
    LastQuarter,
    ThisYear,
    LastYear,
    Quarter { quarter: u8, year: Option<i32> },
    Month { month: u32, year: Option<i32> },
    Year { year: i32 },
    LastDays { days: u32 },
    NextDays { days: u32 },
}

/// A monetary amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountMention {
    pub value: f64,
    pub currency: String,
    pub raw: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntities {
    pub periods: Vec<PeriodMention>,
    pub amounts: Vec<AmountMention>,
    pub invoice_numbers: Vec<String>,
    pub suppliers: Vec<String>,
}

impl ExtractedEntities {
    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
            && self.amounts.is_empty()
            && self.invoice_numbers.is_empty()
            && self.suppliers.is_empty()
    }
}

const RELATIVE_PERIODS: &[(&str, PeriodMention)] = &[
    ("ce mois", PeriodMention::ThisMonth),
    ("mois en cours", PeriodMention::ThisMonth),
    ("mois courant", PeriodMention::ThisMonth),
    ("this month", PeriodMention::ThisMonth),
    ("current month", PeriodMention::ThisMonth),
    ("mois dernier", PeriodMention::LastMonth),
    ("mois precedent", PeriodMention::LastMonth),
    ("last month", PeriodMention::LastMonth),
    ("previous month", PeriodMention::LastMonth),
    ("ce trimestre", PeriodMention::ThisQuarter),
    ("trimestre en cours", PeriodMention::ThisQuarter),
    ("this quarter", PeriodMention::ThisQuarter),
    ("current quarter", PeriodMention::ThisQuarter),
    ("trimestre dernier", PeriodMention::LastQuarter),
    ("trimestre precedent", PeriodMention::LastQuarter),
    ("last quarter", PeriodMention::LastQuarter),
    ("previous quarter", PeriodMention::LastQuarter),
    ("cette annee", PeriodMention::ThisYear),
    ("annee en cours", PeriodMention::ThisYear),
    ("this year", PeriodMention::ThisYear),
    ("current year", PeriodMention::ThisYear),
    ("year to date", PeriodMention::ThisYear),
    ("annee derniere", PeriodMention::LastYear),
    ("annee precedente", PeriodMention::LastYear),
    ("last year", PeriodMention::LastYear),
    ("previous year", PeriodMention::LastYear),
];

const MONTHS: &[(&str, u32)] = &[
    ("janvier", 1),
    ("january", 1),
    ("fevrier", 2),
    ("february", 2),
    ("mars", 3),
    ("march", 3),
    ("avril", 4),
    ("april", 4),
    ("mai", 5),
    ("may", 5),
    ("juin", 6),
    ("june", 6),
    ("juillet", 7),
    ("july", 7),
    ("aout", 8),
    ("august", 8),
    ("septembre", 9),
    ("september", 9),
    ("octobre", 10),
    ("october", 10),
    ("novembre", 11),
    ("november", 11),
    ("decembre", 12),
    ("december", 12),
];

static MONTH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let names: Vec<&str> = MONTHS.iter().map(|(name, _)| *name).collect();
    Regex::new(&format!(r"\b({})\b(?:\s+((?:19|20)\d{{2}}))?", names.join("|")))
        .expect("valid month pattern")
});

static QUARTER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[qt]([1-4])\b(?:\s*((?:19|20)\d{2}))?").expect("valid quarter pattern")
});

static YEAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").expect("valid year pattern"));

static LAST_DAYS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:last|past)\s+(\d{1,3})\s+days\b|\b(\d{1,3})\s+derniers\s+jours\b")
        .expect("valid last days pattern")
});

static NEXT_DAYS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:next|coming)\s+(\d{1,3})\s+days\b|\b(\d{1,3})\s+prochains\s+jours\b|\bsous\s+(\d{1,3})\s+jours\b")
        .expect("valid next days pattern")
});

const AMOUNT_NUMBER: &str = r"\d{1,3}(?:[ \u{a0}\u{202f}.,]\d{3})+(?:[.,]\d{1,2})?|\d+(?:[.,]\d{1,2})?";

static AMOUNT_PREFIX_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"([€$£])\s?({AMOUNT_NUMBER})\s?([kKmM])?\b")).expect("valid amount pattern")
});

static AMOUNT_SUFFIX_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)({AMOUNT_NUMBER})\s?(k|m|keur|meur)?\s?(€|eur\b|euros?\b|\$|usd\b|£|gbp\b)"
    ))
    .expect("valid amount pattern")
});

pub(crate) static INVOICE_NUMBER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b((?:inv|fa|fac|fact|bill|f)[-/_]?\d{2,}(?:[-/_]\d+)*)\b")
        .expect("valid invoice number pattern")
});

static QUOTED_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""([^"]{2,60})"|«\s*([^»]{2,60}?)\s*»|“([^”]{2,60})”"#).expect("valid quote pattern")
});

static SUPPLIER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:[Ff]ournisseurs?|[Ss]uppliers?|[Vv]endors?|[Pp]restataires?)\s+(?:de\s+|d'|from\s+)?(\p{Lu}[\p{L}\d&.\-]*(?:\s+\p{Lu}[\p{L}\d&.\-]*)*)",
    )
    .expect("valid supplier pattern")
});

/// Extract all entities from a question
pub fn extract_entities(text: &str) -> ExtractedEntities {
    ExtractedEntities {
        periods: extract_periods(text),
        amounts: extract_amounts(text),
        invoice_numbers: extract_invoice_numbers(text),
        suppliers: extract_suppliers(text),
    }
}

pub fn extract_periods(text: &str) -> Vec<PeriodMention> {
    let mut folded = fold_accents(text).replace('\'', " ");
    let mut periods = Vec::new();

    for (phrase, period) in RELATIVE_PERIODS {
        if contains_phrase(&folded, phrase) && !periods.contains(period) {
            periods.push(*period);
        }
    }

    for captures in LAST_DAYS_PATTERN.captures_iter(&folded) {
        if let Some(days) = captures
            .get(1)
            .or_else(|| captures.get(2))
            .and_then(|m| m.as_str().parse().ok())
        {
            periods.push(PeriodMention::LastDays { days });
        }
    }
    for captures in NEXT_DAYS_PATTERN.captures_iter(&folded) {
        if let Some(days) = captures
            .get(1)
            .or_else(|| captures.get(2))
            .or_else(|| captures.get(3))
            .and_then(|m| m.as_str().parse().ok())
        {
            periods.push(PeriodMention::NextDays { days });
        }
    }

    let mut consumed: Vec<(usize, usize)> = Vec::new();
    for captures in QUARTER_PATTERN.captures_iter(&folded) {
        let Some(whole) = captures.get(0) else { continue };
        let quarter = captures[1].parse().unwrap_or(1);
        let year = captures.get(2).and_then(|m| m.as_str().parse().ok());
        periods.push(PeriodMention::Quarter { quarter, year });
        consumed.push((whole.start(), whole.end()));
    }
    for captures in MONTH_PATTERN.captures_iter(&folded) {
        let Some(whole) = captures.get(0) else { continue };
        let name = &captures[1];
        let year = captures.get(2).and_then(|m| m.as_str().parse().ok());
        // "may" and "mars" are too ambiguous on their own
        if matches!(name, "may" | "mars") && year.is_none() {
            continue;
        }
        if let Some((_, month)) = MONTHS.iter().find(|(candidate, _)| *candidate == name) {
            periods.push(PeriodMention::Month { month: *month, year });
            consumed.push((whole.start(), whole.end()));
        }
    }

    consumed.extend(
        INVOICE_NUMBER_PATTERN
            .find_iter(&folded)
            .map(|m| (m.start(), m.end())),
    );
    for (start, end) in consumed {
        folded.replace_range(start..end, &" ".repeat(end - start));
    }
    for captures in YEAR_PATTERN.captures_iter(&folded) {
        if let Ok(year) = captures[1].parse() {
            let mention = PeriodMention::Year { year };
            if !periods.contains(&mention) {
                periods.push(mention);
            }
        }
    }

    periods
}

pub fn extract_amounts(text: &str) -> Vec<AmountMention> {
    let mut amounts: Vec<AmountMention> = Vec::new();
    let mut covered: Vec<(usize, usize)> = Vec::new();

    for captures in AMOUNT_PREFIX_PATTERN.captures_iter(text) {
        let Some(whole) = captures.get(0) else { continue };
        let Some(value) = parse_number(&captures[2]) else { continue };
        let multiplier = multiplier(captures.get(3).map(|m| m.as_str()));
        amounts.push(AmountMention {
            value: value * multiplier,
            currency: currency_code(&captures[1]),
            raw: whole.as_str().trim().to_string(),
        });
        covered.push((whole.start(), whole.end()));
    }

    for captures in AMOUNT_SUFFIX_PATTERN.captures_iter(text) {
        let Some(whole) = captures.get(0) else { continue };
        if covered
            .iter()
            .any(|&(start, end)| whole.start() < end && start < whole.end())
        {
            continue;
        }
        let Some(value) = parse_number(&captures[1]) else { continue };
        let multiplier = multiplier(captures.get(2).map(|m| m.as_str()));
        amounts.push(AmountMention {
            value: value * multiplier,
            currency: currency_code(&captures[3]),
            raw: whole.as_str().trim().to_string(),
        });
    }

    amounts
}

fn multiplier(suffix: Option<&str>) -> f64 {
    match suffix.map(|s| s.to_lowercase()) {
        Some(s) if s.starts_with('k') => 1_000.0,
        Some(s) if s.starts_with('m') => 1_000_000.0,
        _ => 1.0,
    }
}

fn currency_code(symbol: &str) -> String {
    match symbol.to_lowercase().as_str() {
        "$" | "usd" => "USD",
        "£" | "gbp" => "GBP",
        _ => "EUR",
    }
    .to_string()
}

pub fn extract_invoice_numbers(text: &str) -> Vec<String> {
    let mut numbers: Vec<String> = Vec::new();
    for captures in INVOICE_NUMBER_PATTERN.captures_iter(text) {
        let number = captures[1].to_uppercase();
        if !numbers.contains(&number) {
            numbers.push(number);
        }
    }
    numbers
}

pub fn extract_suppliers(text: &str) -> Vec<String> {
    let mut suppliers: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        let name = name.trim().trim_end_matches(['.', ',', '?', '!']).to_string();
        if name.chars().count() >= 2 && !suppliers.contains(&name) {
            suppliers.push(name);
        }
    };

    for captures in QUOTED_PATTERN.captures_iter(text) {
        if let Some(name) = captures.get(1).or_else(|| captures.get(2)).or_else(|| captures.get(3)) {
            push(name.as_str());
        }
    }
    for captures in SUPPLIER_PATTERN.captures_iter(text) {
        push(&captures[1]);
    }

    suppliers
}

/// Whole-word phrase lookup in already folded text
fn contains_phrase(folded: &str, phrase: &str) -> bool {
    folded.match_indices(phrase).any(|(start, _)| {
        let end = start + phrase.len();
        let before_ok = folded[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = folded[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}
