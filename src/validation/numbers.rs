//! Figures in answers and the numbers that can back them
//!
//! Answers are scanned for amounts, percentages and large plain numbers
//! after blanking citation markers, invoice references, dates and list
//! ordinals. Evidence numbers come from tool results (every JSON number,
//! numbers inside strings, per-field sums over arrays) and source texts.

use crate::intent::entities::INVOICE_NUMBER_PATTERN;
use crate::text::parse_number;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

/// How a figure was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FigureKind {
    Money,
    Percent,
    Plain,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Figure {
    pub value: f64,
    pub kind: FigureKind,
    pub raw: String,
}

impl Figure {
    /// Whether the figure is a factual claim that evidence must back.
    ///
    /// Integers under 10, year-like plain integers and plain integers
    /// under 1000 (counts, day windows) are not checked.
    pub fn needs_support(&self) -> bool {
        let integer = self.value.fract() == 0.0;
        if integer && self.value < 10.0 {
            return false;
        }
        match self.kind {
            FigureKind::Money | FigureKind::Percent => true,
            FigureKind::Plain => {
                if integer && (1900.0..=2100.0).contains(&self.value) {
                    return false;
                }
                !(integer && self.value < 1000.0)
            }
        }
    }
}

static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?P<pre>[€$£]\s?)?(?P<num>\d{1,3}(?:[ \x{a0}\x{202f}]\d{3})+(?:[.,]\d+)?|\d+(?:[.,]\d+)*)(?:\s?(?P<suf>k€|m€|%|€|\$|£|eur\b|euros?\b|usd\b|k\b|m\b))?",
    )
    .expect("valid number pattern")
});

static CITATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\d{1,3}(?:\s*,\s*\d{1,3})*\]").expect("valid citation pattern"));

static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{4}-\d{2}-\d{2}\b|\b\d{1,2}/\d{1,2}/\d{2,4}\b").expect("valid date pattern")
});

static ORDINAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\d{1,2}[.)]\s").expect("valid ordinal pattern"));

static QUARTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b[qt][1-4]\b").expect("valid quarter pattern"));

fn blank(text: &str, pattern: &Regex) -> String {
    pattern
        .replace_all(text, |caps: &regex::Captures| " ".repeat(caps[0].len()))
        .into_owned()
}

/// Every figure written in `text`, in order
pub fn extract_figures(text: &str) -> Vec<Figure> {
    let mut cleaned = text.to_string();
    for pattern in [&*CITATION, &*INVOICE_NUMBER_PATTERN, &*DATE, &*ORDINAL, &*QUARTER] {
        cleaned = blank(&cleaned, pattern);
    }

    NUMBER
        .captures_iter(&cleaned)
        .filter_map(|caps| {
            let raw = caps.name("num")?.as_str();
            let mut value = parse_number(raw)?;
            let prefix = caps.name("pre").is_some();
            let suffix = caps.name("suf").map(|s| s.as_str().to_lowercase());

            let kind = match suffix.as_deref() {
                Some("%") => FigureKind::Percent,
                Some(s) => {
                    if s.starts_with('k') {
                        value *= 1_000.0;
                    } else if s.starts_with('m') {
                        value *= 1_000_000.0;
                    }
                    FigureKind::Money
                }
                None if prefix => FigureKind::Money,
                None => FigureKind::Plain,
            };

            Some(Figure {
                value,
                kind,
                raw: caps[0].trim().to_string(),
            })
        })
        .collect()
}

const MAX_PAIRWISE: usize = 60;

/// Numbers that can support figures in an answer
pub fn collect_evidence_numbers(values: &[Value], texts: &[&str]) -> Vec<f64> {
    let mut numbers = Vec::new();
    for value in values {
        walk(value, &mut numbers);
    }
    for text in texts {
        numbers.extend(extract_figures(text).into_iter().map(|figure| figure.value));
    }

    if numbers.len() <= MAX_PAIRWISE {
        let mut sums = Vec::new();
        for (i, a) in numbers.iter().enumerate() {
            for b in &numbers[i + 1..] {
                sums.push(a + b);
            }
        }
        numbers.extend(sums);
    }
    numbers
}

fn walk(value: &Value, out: &mut Vec<f64>) {
    match value {
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                out.push(f);
            }
        }
        Value::String(s) => {
            out.extend(extract_figures(s).into_iter().map(|figure| figure.value));
        }
        Value::Array(items) => {
            let mut field_sums: BTreeMap<&str, f64> = BTreeMap::new();
            let mut element_sum = 0.0;
            let mut numeric_elements = 0;
            for item in items {
                walk(item, out);
                match item {
                    Value::Number(n) => {
                        element_sum += n.as_f64().unwrap_or(0.0);
                        numeric_elements += 1;
                    }
                    Value::Object(fields) => {
                        for (key, field) in fields {
                            if let Some(f) = field.as_f64() {
                                *field_sums.entry(key.as_str()).or_default() += f;
                            }
                        }
                    }
                    _ => {}
                }
            }
            if numeric_elements > 1 {
                out.push(element_sum);
            }
            out.extend(field_sums.into_values());
        }
        Value::Object(fields) => {
            for field in fields.values() {
                walk(field, out);
            }
        }
        Value::Bool(_) | Value::Null => {}
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn close(claimed: f64, evidence: f64) -> bool {
    (claimed - evidence).abs() <= 0.01 * evidence.abs()
        || (claimed - evidence.round()).abs() < 1e-9
        || (claimed - round_to(evidence, 1)).abs() < 1e-9
}

/// True when some evidence number backs `figure` (1% tolerance or rounding)
pub fn is_supported(figure: &Figure, evidence: &[f64]) -> bool {
    evidence.iter().any(|&e| {
        close(figure.value, e) || (figure.kind == FigureKind::Percent && close(figure.value, e * 100.0))
    })
}
