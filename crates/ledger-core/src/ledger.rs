//! Read-only views over a record collection: totals, filtering and sorting.
//!
//! Only instances are transactions. Templates are listed separately and
//! never counted in totals.

use crate::month::YearMonth;
use crate::record::{Category, Instance, Record, Template};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::cmp::Ordering;
use std::str::FromStr;
use thiserror::Error;

/// Totals over the instances of a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub total: f64,
    pub year_to_date: f64,
    pub month_to_date: f64,
    pub instance_count: usize,
    pub template_count: usize,
}

/// Sum instance amounts: all time, in `today`'s year, and in `today`'s month.
pub fn summarize(records: &[Record], today: NaiveDate) -> LedgerSummary {
    let month = YearMonth::of(today);
    let mut summary = LedgerSummary::default();

    for record in records {
        match record {
            Record::Template(_) => summary.template_count += 1,
            Record::Instance(instance) => {
                summary.instance_count += 1;
                summary.total += instance.amount;
                if instance.date.year() == today.year() {
                    summary.year_to_date += instance.amount;
                }
                if YearMonth::of(instance.date) == month {
                    summary.month_to_date += instance.amount;
                }
            }
        }
    }

    summary.total = round_cents(summary.total);
    summary.year_to_date = round_cents(summary.year_to_date);
    summary.month_to_date = round_cents(summary.month_to_date);
    summary
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// All templates in collection order.
pub fn templates(records: &[Record]) -> Vec<&Template> {
    records.iter().filter_map(Record::as_template).collect()
}

/// Instance filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub category: Option<Category>,
    pub property_ref: Option<String>,
    /// Case-insensitive substring over description, property name, vendor
    /// and notes.
    pub query: Option<String>,
}

impl RecordFilter {
    pub fn matches(&self, instance: &Instance) -> bool {
        if self.category.is_some_and(|c| c != instance.category) {
            return false;
        }
        if self
            .property_ref
            .as_deref()
            .is_some_and(|p| p != instance.property_ref)
        {
            return false;
        }
        match self.query.as_deref().filter(|q| !q.is_empty()) {
            Some(query) => {
                let query = query.to_lowercase();
                [
                    &instance.description,
                    &instance.property_name,
                    &instance.vendor,
                    &instance.notes,
                ]
                .iter()
                .any(|field| field.to_lowercase().contains(&query))
            }
            None => true,
        }
    }

    /// Matching instances in collection order.
    pub fn apply<'a>(&self, records: &'a [Record]) -> Vec<&'a Instance> {
        records
            .iter()
            .filter_map(Record::as_instance)
            .filter(|i| self.matches(i))
            .collect()
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("Unknown sort key: {0}")]
pub struct UnknownSortKey(String);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Date,
    Amount,
    Category,
    Description,
    Property,
}

impl SortKey {
    /// Newest and largest first; text keys ascending.
    pub fn default_direction(self) -> SortDirection {
        match self {
            SortKey::Date | SortKey::Amount => SortDirection::Descending,
            _ => SortDirection::Ascending,
        }
    }
}

impl FromStr for SortKey {
    type Err = UnknownSortKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "date" => Ok(SortKey::Date),
            "amount" => Ok(SortKey::Amount),
            "category" => Ok(SortKey::Category),
            "description" => Ok(SortKey::Description),
            "property" => Ok(SortKey::Property),
            other => Err(UnknownSortKey(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Stable sort of `instances` by `key`.
pub fn sort_instances(instances: &mut [&Instance], key: SortKey, direction: SortDirection) {
    instances.sort_by(|a, b| {
        let ordering = compare(a, b, key);
        match direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });
}

fn compare(a: &Instance, b: &Instance, key: SortKey) -> Ordering {
    match key {
        SortKey::Date => a.date.cmp(&b.date),
        SortKey::Amount => a.amount.total_cmp(&b.amount),
        SortKey::Category => a.category.as_str().cmp(b.category.as_str()),
        SortKey::Description => caseless(&a.description, &b.description),
        SortKey::Property => caseless(&a.property_name, &b.property_name),
    }
}

fn caseless(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Frequency, RecordId};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn expense(id: &str, on: NaiveDate, amount: f64, description: &str) -> Instance {
        let mut instance = Instance::new(on, amount);
        instance.id = RecordId::from(id);
        instance.description = description.to_string();
        instance
    }

    fn sample() -> Vec<Record> {
        let mut plumber = expense("e1", date(2026, 3, 2), 180.0, "Fix leaking sink");
        plumber.category = Category::Repair;
        plumber.vendor = "Ace Plumbing".into();
        plumber.property_ref = "p1".into();
        plumber.property_name = "Maple Duplex".into();

        let mut tax = expense("e2", date(2026, 1, 10), 950.55, "Property tax Q1");
        tax.category = Category::Taxes;
        tax.property_ref = "p2".into();
        tax.property_name = "Oak Street".into();

        let old = expense("e3", date(2025, 12, 28), 40.25, "snow removal");

        vec![
            Record::from(plumber),
            Record::from(Template::new(Frequency::Monthly, 1, 1200.0, date(2025, 6, 1))),
            Record::from(tax),
            Record::from(old),
        ]
    }

    #[test]
    fn test_summary_skips_templates() {
        let summary = summarize(&sample(), date(2026, 3, 20));

        assert_eq!(summary.total, 1170.8);
        assert_eq!(summary.year_to_date, 1130.55);
        assert_eq!(summary.month_to_date, 180.0);
        assert_eq!(summary.instance_count, 3);
        assert_eq!(summary.template_count, 1);
    }

    #[test]
    fn test_summary_of_empty_collection() {
        assert_eq!(summarize(&[], date(2026, 3, 20)), LedgerSummary::default());
    }

    #[test]
    fn test_filter_by_category_and_property() {
        let records = sample();

        let repairs = RecordFilter {
            category: Some(Category::Repair),
            ..Default::default()
        };
        assert_eq!(repairs.apply(&records).len(), 1);

        let oak = RecordFilter {
            property_ref: Some("p2".into()),
            ..Default::default()
        };
        let matched = oak.apply(&records);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id.as_str(), "e2");
    }

    #[test]
    fn test_query_is_case_insensitive_across_fields() {
        let records = sample();
        let ids = |query: &str| -> Vec<String> {
            RecordFilter {
                query: Some(query.into()),
                ..Default::default()
            }
            .apply(&records)
            .iter()
            .map(|i| i.id.to_string())
            .collect()
        };

        assert_eq!(ids("ACE"), vec!["e1"]);
        assert_eq!(ids("oak"), vec!["e2"]);
        assert_eq!(ids("SNOW"), vec!["e3"]);
        assert_eq!(ids("").len(), 3);
        assert!(ids("roof").is_empty());
    }

    #[test]
    fn test_sort_by_amount_descending() {
        let records = sample();
        let mut instances = RecordFilter::default().apply(&records);

        sort_instances(&mut instances, SortKey::Amount, SortKey::Amount.default_direction());

        let ids: Vec<_> = instances.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["e2", "e1", "e3"]);
    }

    #[test]
    fn test_sort_by_date_and_description() {
        let records = sample();
        let mut instances = RecordFilter::default().apply(&records);

        sort_instances(&mut instances, SortKey::Date, SortDirection::Ascending);
        let ids: Vec<_> = instances.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["e3", "e2", "e1"]);

        sort_instances(&mut instances, SortKey::Description, SortDirection::Ascending);
        let ids: Vec<_> = instances.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2", "e3"]);
    }

    #[test]
    fn test_default_listing_is_newest_first() {
        let records = sample();
        let mut instances = RecordFilter::default().apply(&records);

        sort_instances(&mut instances, SortKey::default(), SortKey::default().default_direction());

        let ids: Vec<_> = instances.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2", "e3"]);
        assert_eq!(SortKey::Category.default_direction(), SortDirection::Ascending);
    }

    #[test]
    fn test_parse_sort_key() {
        assert_eq!("property".parse::<SortKey>(), Ok(SortKey::Property));
        assert!("size".parse::<SortKey>().is_err());
    }

    #[test]
    fn test_templates_listing() {
        let records = sample();
        let listed = templates(&records);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].amount, 1200.0);
    }
}
