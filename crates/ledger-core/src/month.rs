//! YearMonth: a calendar month used as the period key for recurring records.
//!
//! Displays and parses as `YYYY-MM`, which is also the on-disk form of the
//! `generatedForMonth` linkage on generated instances.

use chrono::{Datelike, NaiveDate};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MonthError {
    #[error("Invalid month key format: expected YYYY-MM, got {0:?}")]
    InvalidFormat(String),
    #[error("Month out of range: {0}")]
    OutOfRange(u32),
}

/// A calendar month (year + month number, 1-based).
///
/// Ordering is chronological, so `min`/`max` and comparisons against an
/// anchor month behave as expected across year boundaries.
///
/// # Examples
/// ```
/// use ledger_core::YearMonth;
///
/// let jan = YearMonth::new(2026, 1).unwrap();
/// assert_eq!(jan.to_string(), "2026-01");
/// assert_eq!(jan.add_months(-1).to_string(), "2025-12");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// Create a month key. Returns `None` if `month` is not in `1..=12`.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// The month a date falls in.
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Shift by a signed number of months.
    pub fn add_months(&self, months: i32) -> Self {
        let index = self.index() + months;
        Self {
            year: index.div_euclid(12),
            month: index.rem_euclid(12) as u32 + 1,
        }
    }

    /// Signed number of months from `earlier` to `self`.
    pub fn months_since(&self, earlier: YearMonth) -> i32 {
        self.index() - earlier.index()
    }

    /// Number of days in this month (leap years included).
    pub fn days_in_month(&self) -> u32 {
        let next = self.add_months(1);
        NaiveDate::from_ymd_opt(next.year, next.month, 1)
            .and_then(|first| first.pred_opt())
            .map(|last| last.day())
            .unwrap_or(28)
    }

    /// The date for `day` in this month, clamped to the last day of the month.
    ///
    /// A day of 0 is treated as the 1st.
    pub fn clamped_day(&self, day: u32) -> NaiveDate {
        let day = day.clamp(1, self.days_in_month());
        NaiveDate::from_ymd_opt(self.year, self.month, day)
            .unwrap_or(NaiveDate::MIN)
    }

    fn index(&self) -> i32 {
        self.year * 12 + self.month as i32 - 1
    }
}

impl Display for YearMonth {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = MonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| MonthError::InvalidFormat(s.to_string()))?;
        if year.len() != 4 || month.len() != 2 {
            return Err(MonthError::InvalidFormat(s.to_string()));
        }
        let year: i32 = year
            .parse()
            .map_err(|_| MonthError::InvalidFormat(s.to_string()))?;
        let month: u32 = month
            .parse()
            .map_err(|_| MonthError::InvalidFormat(s.to_string()))?;
        Self::new(year, month).ok_or(MonthError::OutOfRange(month))
    }
}

// Serialize as the `YYYY-MM` key so stored documents stay human-readable
impl serde::Serialize for YearMonth {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for YearMonth {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
