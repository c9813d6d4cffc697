//! In-memory invoice ledger and the analytics the tools expose

use crate::finance::invoice::{normalize_reference, round_money, Invoice, InvoiceStatus};
use crate::finance::period::Period;
use crate::finance::LedgerError;
use crate::text::fold_accents;
use chrono::{Duration, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_SEARCH_LIMIT: usize = 20;
pub const MAX_SEARCH_LIMIT: usize = 100;

/// Invoice search criteria; every field is optional and they combine with AND
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct InvoiceFilter {
    /// Invoice number or part of it, separators ignored
    #[serde(default)]
    pub number: Option<String>,
    /// Supplier name or part of it, case and accent insensitive
    #[serde(default)]
    pub supplier: Option<String>,
    /// Spending category
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub status: Option<InvoiceStatus>,
    /// Period key on the issue date: this_month, last_quarter, 2024-Q1, 2024-03, 2024, last_30_days
    #[serde(default)]
    pub period: Option<String>,
    /// Issued on or after this date (YYYY-MM-DD)
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Issued on or before this date (YYYY-MM-DD)
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Minimum amount including tax
    #[serde(default)]
    pub min_amount: Option<f64>,
    /// Maximum amount including tax
    #[serde(default)]
    pub max_amount: Option<f64>,
    /// Maximum number of invoices returned (default 20, at most 100)
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceSearchResult {
    pub total_matches: usize,
    pub total_incl_tax: f64,
    pub invoices: Vec<Invoice>,
}

/// Grouping key for spending summaries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    Supplier,
    Category,
    Month,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendingGroup {
    pub key: String,
    pub currency: String,
    pub total_excl_tax: f64,
    pub total_incl_tax: f64,
    pub invoice_count: usize,
    /// Percentage of the period total in the same currency, tax included
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendingSummary {
    pub period: Period,
    pub group_by: GroupBy,
    /// Currency of the top-level totals, the most used one in the period
    pub currency: String,
    pub total_excl_tax: f64,
    pub total_vat: f64,
    pub total_incl_tax: f64,
    pub invoice_count: usize,
    pub groups: Vec<SpendingGroup>,
    /// Totals of the remaining currencies, never converted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_currencies: Vec<CurrencyTotal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyTotal {
    pub currency: String,
    pub total_excl_tax: f64,
    pub total_vat: f64,
    pub total_incl_tax: f64,
    pub invoice_count: usize,
}

impl CurrencyTotal {
    fn of(currency: &str, invoices: &[&Invoice]) -> Self {
        Self {
            currency: currency.to_string(),
            total_excl_tax: round_money(invoices.iter().map(|i| i.amount_excl_tax).sum()),
            total_vat: round_money(invoices.iter().map(|i| i.vat_amount).sum()),
            total_incl_tax: round_money(invoices.iter().map(|i| i.amount_incl_tax).sum()),
            invoice_count: invoices.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverdueInvoice {
    pub number: String,
    pub supplier: String,
    pub amount_incl_tax: f64,
    pub due_date: Option<NaiveDate>,
    pub days_overdue: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgingBucket {
    pub label: String,
    pub invoice_count: usize,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverdueReport {
    pub as_of: NaiveDate,
    pub currency: String,
    pub invoice_count: usize,
    pub total_outstanding: f64,
    pub aging: Vec<AgingBucket>,
    pub invoices: Vec<OverdueInvoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierTotal {
    pub supplier: String,
    pub total_excl_tax: f64,
    pub total_incl_tax: f64,
    pub invoice_count: usize,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastBucket {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub invoice_count: usize,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashForecast {
    pub as_of: NaiveDate,
    pub horizon_days: u32,
    pub currency: String,
    /// Open invoices falling due within the horizon
    pub total_due: f64,
    /// Open invoices already past due, payable immediately
    pub overdue_total: f64,
    pub weeks: Vec<ForecastBucket>,
    /// Open invoices with no due date, excluded from the buckets
    pub undated_invoices: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LedgerFile {
    List(Vec<Invoice>),
    Wrapped { invoices: Vec<Invoice> },
}

const AGING_BUCKETS: [(&str, i64, i64); 4] = [
    ("1-30", 0, 30),
    ("31-60", 31, 60),
    ("61-90", 61, 90),
    ("90+", 91, i64::MAX),
];

/// Read-only collection of invoices
#[derive(Debug, Clone, Default)]
pub struct InvoiceLedger {
    invoices: Vec<Invoice>,
}

impl InvoiceLedger {
    pub fn new(invoices: Vec<Invoice>) -> Self {
        let invoices = invoices
            .into_iter()
            .map(|mut invoice| {
                invoice.normalize();
                invoice
            })
            .collect();
        Self { invoices }
    }

    /// Parse a JSON array of invoices or an object with an `invoices` array
    pub fn from_json_str(content: &str) -> Result<Self, LedgerError> {
        let invoices = match serde_json::from_str::<LedgerFile>(content)? {
            LedgerFile::List(invoices) | LedgerFile::Wrapped { invoices } => invoices,
        };
        Ok(Self::new(invoices))
    }

    pub fn load_from_file(path: &Path) -> Result<Self, LedgerError> {
        let content = std::fs::read_to_string(path)?;
        let ledger = Self::from_json_str(&content)?;
        info!(path = %path.display(), invoices = ledger.len(), "Loaded invoice ledger");
        Ok(ledger)
    }

    pub fn invoices(&self) -> &[Invoice] {
        &self.invoices
    }

    pub fn len(&self) -> usize {
        self.invoices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invoices.is_empty()
    }

    /// Most frequent currency, EUR for an empty ledger
    pub fn currency(&self) -> String {
        dominant_currency(self.invoices.iter()).unwrap_or_else(|| "EUR".to_string())
    }

    pub fn find_by_number(&self, number: &str) -> Option<&Invoice> {
        let wanted = normalize_reference(number);
        self.invoices
            .iter()
            .find(|invoice| normalize_reference(&invoice.number) == wanted)
    }

    /// Matching invoices, newest first
    pub fn search(
        &self,
        filter: &InvoiceFilter,
        as_of: NaiveDate,
    ) -> Result<InvoiceSearchResult, LedgerError> {
        let period = filter
            .period
            .as_deref()
            .map(|key| Period::parse(key, as_of))
            .transpose()?;
        if let (Some(start), Some(end)) = (filter.start_date, filter.end_date) {
            if start > end {
                return Err(LedgerError::InvalidFilter(format!(
                    "start_date {start} is after end_date {end}"
                )));
            }
        }

        let number = filter.number.as_deref().map(normalize_reference);
        let supplier = filter.supplier.as_deref().map(fold_accents);
        let category = filter.category.as_deref().map(fold_accents);

        let mut matches: Vec<&Invoice> = self
            .invoices
            .iter()
            .filter(|invoice| {
                number
                    .as_ref()
                    .map_or(true, |n| normalize_reference(&invoice.number).contains(n.as_str()))
                    && supplier
                        .as_ref()
                        .map_or(true, |s| fold_accents(&invoice.supplier).contains(s.as_str()))
                    && category.as_ref().map_or(true, |c| {
                        invoice
                            .category
                            .as_deref()
                            .is_some_and(|cat| fold_accents(cat).contains(c.as_str()))
                    })
                    && filter.status.map_or(true, |s| invoice.status == s)
                    && period.as_ref().map_or(true, |p| p.contains(invoice.issue_date))
                    && filter.start_date.map_or(true, |d| invoice.issue_date >= d)
                    && filter.end_date.map_or(true, |d| invoice.issue_date <= d)
                    && filter.min_amount.map_or(true, |m| invoice.amount_incl_tax >= m)
                    && filter.max_amount.map_or(true, |m| invoice.amount_incl_tax <= m)
            })
            .collect();

        matches.sort_by(|a, b| {
            b.issue_date
                .cmp(&a.issue_date)
                .then_with(|| a.number.cmp(&b.number))
        });

        let limit = filter
            .limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT);
        let total_incl_tax = round_money(matches.iter().map(|i| i.amount_incl_tax).sum());
        debug!(matches = matches.len(), limit, "Invoice search");

        Ok(InvoiceSearchResult {
            total_matches: matches.len(),
            total_incl_tax,
            invoices: matches.into_iter().take(limit).cloned().collect(),
        })
    }

    /// Committed spending over `period`, grouped
    pub fn spending_summary(&self, period: &Period, group_by: GroupBy) -> SpendingSummary {
        let invoices: Vec<&Invoice> = self
            .invoices
            .iter()
            .filter(|invoice| invoice.status.is_committed() && period.contains(invoice.issue_date))
            .collect();

        let mut by_currency: BTreeMap<&str, Vec<&Invoice>> = BTreeMap::new();
        for invoice in &invoices {
            by_currency.entry(invoice.currency.as_str()).or_default().push(invoice);
        }
        let currency = dominant_currency(invoices.iter().copied()).unwrap_or_else(|| self.currency());
        let main = CurrencyTotal::of(
            &currency,
            by_currency.get(currency.as_str()).map(Vec::as_slice).unwrap_or_default(),
        );
        let totals: HashMap<&str, f64> = by_currency
            .iter()
            .map(|(code, members)| (*code, CurrencyTotal::of(code, members).total_incl_tax))
            .collect();

        let mut grouped: HashMap<(String, &str), (f64, f64, usize)> = HashMap::new();
        for invoice in &invoices {
            let key = match group_by {
                GroupBy::Supplier => invoice.supplier.clone(),
                GroupBy::Category => invoice
                    .category
                    .clone()
                    .unwrap_or_else(|| "uncategorized".to_string()),
                GroupBy::Month => invoice.issue_date.format("%Y-%m").to_string(),
            };
            let entry = grouped.entry((key, invoice.currency.as_str())).or_default();
            entry.0 += invoice.amount_excl_tax;
            entry.1 += invoice.amount_incl_tax;
            entry.2 += 1;
        }

        let mut groups: Vec<SpendingGroup> = grouped
            .into_iter()
            .map(|((key, code), (excl, incl, count))| SpendingGroup {
                key,
                currency: code.to_string(),
                total_excl_tax: round_money(excl),
                total_incl_tax: round_money(incl),
                invoice_count: count,
                share: share_of(incl, totals.get(code).copied().unwrap_or_default()),
            })
            .collect();

        // Main currency groups first, amounts are only compared within a currency
        let rank = |group: &SpendingGroup| (group.currency != currency, group.currency.clone());
        match group_by {
            GroupBy::Month => groups.sort_by(|a, b| rank(a).cmp(&rank(b)).then_with(|| a.key.cmp(&b.key))),
            GroupBy::Supplier | GroupBy::Category => groups.sort_by(|a, b| {
                rank(a)
                    .cmp(&rank(b))
                    .then_with(|| b.total_incl_tax.total_cmp(&a.total_incl_tax))
                    .then_with(|| a.key.cmp(&b.key))
            }),
        }

        let other_currencies = by_currency
            .iter()
            .filter(|(code, _)| **code != currency)
            .map(|(code, members)| CurrencyTotal::of(code, members))
            .collect();

        SpendingSummary {
            period: period.clone(),
            group_by,
            currency,
            total_excl_tax: main.total_excl_tax,
            total_vat: main.total_vat,
            total_incl_tax: main.total_incl_tax,
            invoice_count: main.invoice_count,
            groups,
            other_currencies,
        }
    }

    /// Open invoices past due on `as_of`, most overdue first
    pub fn overdue(&self, as_of: NaiveDate) -> OverdueReport {
        let mut invoices: Vec<OverdueInvoice> = self
            .invoices
            .iter()
            .filter(|invoice| invoice.is_overdue(as_of))
            .map(|invoice| OverdueInvoice {
                number: invoice.number.clone(),
                supplier: invoice.supplier.clone(),
                amount_incl_tax: invoice.amount_incl_tax,
                due_date: invoice.due_date,
                days_overdue: invoice.days_overdue(as_of),
            })
            .collect();
        invoices.sort_by(|a, b| {
            b.days_overdue
                .cmp(&a.days_overdue)
                .then_with(|| a.number.cmp(&b.number))
        });

        let aging = AGING_BUCKETS
            .iter()
            .map(|(label, min, max)| {
                let in_bucket: Vec<&OverdueInvoice> = invoices
                    .iter()
                    .filter(|i| i.days_overdue >= *min && i.days_overdue <= *max)
                    .collect();
                AgingBucket {
                    label: label.to_string(),
                    invoice_count: in_bucket.len(),
                    total: round_money(in_bucket.iter().map(|i| i.amount_incl_tax).sum()),
                }
            })
            .collect();

        OverdueReport {
            as_of,
            currency: self.currency(),
            invoice_count: invoices.len(),
            total_outstanding: round_money(invoices.iter().map(|i| i.amount_incl_tax).sum()),
            aging,
            invoices,
        }
    }

    /// Suppliers ranked by committed spending, optionally within `period`
    pub fn top_suppliers(&self, limit: usize, period: Option<&Period>) -> Vec<SupplierTotal> {
        let invoices: Vec<&Invoice> = self
            .invoices
            .iter()
            .filter(|invoice| {
                invoice.status.is_committed()
                    && period.map_or(true, |p| p.contains(invoice.issue_date))
            })
            .collect();
        let grand_total: f64 = invoices.iter().map(|i| i.amount_incl_tax).sum();

        let mut by_supplier: HashMap<&str, (f64, f64, usize)> = HashMap::new();
        for invoice in &invoices {
            let entry = by_supplier.entry(invoice.supplier.as_str()).or_default();
            entry.0 += invoice.amount_excl_tax;
            entry.1 += invoice.amount_incl_tax;
            entry.2 += 1;
        }

        let mut ranked: Vec<SupplierTotal> = by_supplier
            .into_iter()
            .map(|(supplier, (excl, incl, count))| SupplierTotal {
                supplier: supplier.to_string(),
                total_excl_tax: round_money(excl),
                total_incl_tax: round_money(incl),
                invoice_count: count,
                share: share_of(incl, grand_total),
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.total_incl_tax
                .total_cmp(&a.total_incl_tax)
                .then_with(|| a.supplier.cmp(&b.supplier))
        });
        ranked.truncate(limit.max(1));
        ranked
    }

    /// Outgoing payments expected over the next `days`, in 7-day buckets
    pub fn cash_forecast(&self, days: u32, as_of: NaiveDate) -> CashForecast {
        let horizon_days = days.max(1);
        let horizon_end = as_of + Duration::days(i64::from(horizon_days));
        let open: Vec<&Invoice> = self
            .invoices
            .iter()
            .filter(|invoice| invoice.status.is_open())
            .collect();

        let mut weeks = Vec::new();
        let mut bucket_start = as_of;
        while bucket_start <= horizon_end {
            let bucket_end = (bucket_start + Duration::days(6)).min(horizon_end);
            let due: Vec<&&Invoice> = open
                .iter()
                .filter(|i| {
                    i.due_date
                        .is_some_and(|d| d >= bucket_start && d <= bucket_end)
                })
                .collect();
            weeks.push(ForecastBucket {
                start: bucket_start,
                end: bucket_end,
                invoice_count: due.len(),
                total: round_money(due.iter().map(|i| i.amount_incl_tax).sum()),
            });
            bucket_start = bucket_end + Duration::days(1);
        }

        let overdue_total = round_money(
            open.iter()
                .filter(|i| i.due_date.is_some_and(|d| d < as_of))
                .map(|i| i.amount_incl_tax)
                .sum(),
        );

        CashForecast {
            as_of,
            horizon_days,
            currency: self.currency(),
            total_due: round_money(weeks.iter().map(|w| w.total).sum()),
            overdue_total,
            weeks,
            undated_invoices: open.iter().filter(|i| i.due_date.is_none()).count(),
        }
    }
}

/// Most used currency code; ties go to the alphabetically first code
fn dominant_currency<'a>(invoices: impl Iterator<Item = &'a Invoice>) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for invoice in invoices {
        *counts.entry(invoice.currency.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(currency, _)| currency.to_string())
}

fn share_of(part: f64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        (part / total * 1000.0).round() / 10.0
    }
}
