//! Date ranges for finance queries
//!
//! A [`Period`] is an inclusive date range resolved against an `as_of`
//! date. Months and quarters named without a year resolve to their most
//! recent occurrence that has already started.

use crate::finance::LedgerError;
use crate::intent::entities::{extract_periods, PeriodMention};
use crate::text::fold_accents;
use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive date range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub label: String,
}

static QUARTER_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})[-_ ]?q([1-4])$").expect("valid quarter key"));
static QUARTER_FIRST_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^q([1-4])[-_ ]?(\d{4})$").expect("valid quarter key"));
static MONTH_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{1,2})$").expect("valid month key"));
static YEAR_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})$").expect("valid year key"));
static DAYS_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(last|next)[-_ ](\d{1,4})[-_ ]days$").expect("valid days key"));

impl Period {
    /// Explicit range; `start` must not be after `end`
    pub fn between(start: NaiveDate, end: NaiveDate) -> Result<Self, LedgerError> {
        if start > end {
            return Err(LedgerError::InvalidPeriod(format!(
                "start date {start} is after end date {end}"
            )));
        }
        Ok(Self {
            start,
            end,
            label: format!("{start} to {end}"),
        })
    }

    pub fn month(year: i32, month: u32) -> Result<Self, LedgerError> {
        let (start, end) = month_bounds(year, month)?;
        Ok(Self {
            start,
            end,
            label: format!("{year}-{month:02}"),
        })
    }

    pub fn quarter(year: i32, quarter: u8) -> Result<Self, LedgerError> {
        if !(1..=4).contains(&quarter) {
            return Err(LedgerError::InvalidPeriod(format!("quarter {quarter} does not exist")));
        }
        let first_month = u32::from(quarter - 1) * 3 + 1;
        let (start, _) = month_bounds(year, first_month)?;
        let (_, end) = month_bounds(year, first_month + 2)?;
        Ok(Self {
            start,
            end,
            label: format!("{year}-Q{quarter}"),
        })
    }

    pub fn year(year: i32) -> Result<Self, LedgerError> {
        let start = ymd(year, 1, 1)?;
        let end = ymd(year, 12, 31)?;
        Ok(Self {
            start,
            end,
            label: year.to_string(),
        })
    }

    /// Resolve a mention extracted from a question
    pub fn resolve(mention: &PeriodMention, as_of: NaiveDate) -> Result<Self, LedgerError> {
        let current_quarter = quarter_of(as_of);
        match *mention {
            PeriodMention::ThisMonth => Self::month(as_of.year(), as_of.month()),
            PeriodMention::LastMonth => {
                if as_of.month() == 1 {
                    Self::month(as_of.year() - 1, 12)
                } else {
                    Self::month(as_of.year(), as_of.month() - 1)
                }
            }
            PeriodMention::ThisQuarter => Self::quarter(as_of.year(), current_quarter),
            PeriodMention::LastQuarter => {
                if current_quarter == 1 {
                    Self::quarter(as_of.year() - 1, 4)
                } else {
                    Self::quarter(as_of.year(), current_quarter - 1)
                }
            }
            PeriodMention::ThisYear => Self::year(as_of.year()),
            PeriodMention::LastYear => Self::year(as_of.year() - 1),
            PeriodMention::Quarter { quarter, year } => {
                let year = year.unwrap_or(if quarter > current_quarter {
                    as_of.year() - 1
                } else {
                    as_of.year()
                });
                Self::quarter(year, quarter)
            }
            PeriodMention::Month { month, year } => {
                let year = year.unwrap_or(if month > as_of.month() {
                    as_of.year() - 1
                } else {
                    as_of.year()
                });
                Self::month(year, month)
            }
            PeriodMention::Year { year } => Self::year(year),
            PeriodMention::LastDays { days } => {
                let days = i64::from(days.max(1));
                Ok(Self {
                    start: as_of - Duration::days(days - 1),
                    end: as_of,
                    label: format!("last {days} days"),
                })
            }
            PeriodMention::NextDays { days } => Ok(Self {
                start: as_of,
                end: as_of + Duration::days(i64::from(days)),
                label: format!("next {days} days"),
            }),
        }
    }

    /// Parse a period key such as `last_month`, `2024-Q1`, `2024-03`,
    /// `2024`, `last_30_days`, or a natural-language phrase
    pub fn parse(text: &str, as_of: NaiveDate) -> Result<Self, LedgerError> {
        let key = fold_accents(text.trim()).replace(' ', "_");

        let keyword = match key.as_str() {
            "this_month" | "current_month" => Some(PeriodMention::ThisMonth),
            "last_month" | "previous_month" => Some(PeriodMention::LastMonth),
            "this_quarter" | "current_quarter" => Some(PeriodMention::ThisQuarter),
            "last_quarter" | "previous_quarter" => Some(PeriodMention::LastQuarter),
            "this_year" | "current_year" | "ytd" => Some(PeriodMention::ThisYear),
            "last_year" | "previous_year" => Some(PeriodMention::LastYear),
            _ => None,
        };
        if let Some(mention) = keyword {
            return Self::resolve(&mention, as_of);
        }

        if let Some(caps) = QUARTER_KEY.captures(&key) {
            return Self::quarter(parse_year(&caps[1])?, caps[2].parse().unwrap_or(0));
        }
        if let Some(caps) = QUARTER_FIRST_KEY.captures(&key) {
            return Self::quarter(parse_year(&caps[2])?, caps[1].parse().unwrap_or(0));
        }
        if let Some(caps) = MONTH_KEY.captures(&key) {
            return Self::month(parse_year(&caps[1])?, caps[2].parse().unwrap_or(0));
        }
        if let Some(caps) = YEAR_KEY.captures(&key) {
            return Self::year(parse_year(&caps[1])?);
        }
        if let Some(caps) = DAYS_KEY.captures(&key) {
            let days: u32 = caps[2].parse().unwrap_or(0);
            let mention = if &caps[1] == "last" {
                PeriodMention::LastDays { days }
            } else {
                PeriodMention::NextDays { days }
            };
            return Self::resolve(&mention, as_of);
        }

        match extract_periods(text).first() {
            Some(mention) => Self::resolve(mention, as_of),
            None => Err(LedgerError::InvalidPeriod(format!(
                "unrecognised period '{text}'"
            ))),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} to {})", self.label, self.start, self.end)
    }
}

fn quarter_of(date: NaiveDate) -> u8 {
    // month is 1..=12
    ((date.month() - 1) / 3 + 1) as u8
}

fn parse_year(raw: &str) -> Result<i32, LedgerError> {
    raw.parse()
        .map_err(|_| LedgerError::InvalidPeriod(format!("invalid year '{raw}'")))
}

fn ymd(year: i32, month: u32, day: u32) -> Result<NaiveDate, LedgerError> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| LedgerError::InvalidPeriod(format!("invalid date {year}-{month}-{day}")))
}

fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate), LedgerError> {
    let start = ymd(year, month, 1)?;
    let next = if month == 12 {
        ymd(year + 1, 1, 1)?
    } else {
        ymd(year, month + 1, 1)?
    };
    Ok((start, next - Duration::days(1)))
}
