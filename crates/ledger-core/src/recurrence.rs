//! Recurrence expansion: computes which dated instances are missing for the
//! recurring templates in a collection.
//!
//! For each template the expander looks at the current month and the two
//! before it (the backfill window). A month is due when it is not before the
//! template's anchor month and matches the template's frequency. A due month
//! gets an instance unless one already links back to (template, month).
//!
//! `expand` is pure: the same records and date always yield the same
//! instances, ids included, and feeding its output back in yields nothing.

use crate::month::YearMonth;
use crate::record::{Frequency, Instance, Record, RecordId, Template};
use chrono::NaiveDate;
use std::collections::HashSet;
use thiserror::Error;

/// Number of trailing months (current month included) checked on each run.
pub const BACKFILL_MONTHS: u32 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecurrenceError {
    #[error("Template not found: {0}")]
    TemplateNotFound(RecordId),

    #[error("Template {template} already has an instance for {month}")]
    AlreadyGenerated { template: RecordId, month: YearMonth },
}

pub type Result<T> = std::result::Result<T, RecurrenceError>;

/// The month a template's schedule is counted from: the earlier of its
/// creation month and its stated start.
pub fn anchor_month(template: &Template) -> YearMonth {
    let created = YearMonth::of(template.created_on);
    match template.effective_start {
        Some(start) => created.min(start),
        None => created,
    }
}

/// Whether a template with `frequency` anchored at `anchor` falls due in
/// `target`. Months before the anchor are never due.
pub fn is_due(frequency: Frequency, anchor: YearMonth, target: YearMonth) -> bool {
    let elapsed = target.months_since(anchor);
    if elapsed < 0 {
        return false;
    }
    match frequency {
        Frequency::Monthly => true,
        Frequency::Quarterly => elapsed % 3 == 0,
        Frequency::Annually => target.month() == anchor.month(),
    }
}

/// Index of (template, month) pairs that already have an instance.
#[derive(Debug, Default)]
pub struct GeneratedIndex {
    pairs: HashSet<(RecordId, YearMonth)>,
}

impl GeneratedIndex {
    pub fn build(records: &[Record]) -> Self {
        let pairs = records
            .iter()
            .filter_map(Record::as_instance)
            .filter_map(|i| {
                Some((i.generated_from_template.clone()?, i.generated_for_month?))
            })
            .collect();
        Self { pairs }
    }

    pub fn contains(&self, template: &RecordId, month: YearMonth) -> bool {
        self.pairs.contains(&(template.clone(), month))
    }

    fn insert(&mut self, template: RecordId, month: YearMonth) {
        self.pairs.insert((template, month));
    }
}

/// Whether `records` already hold an instance of `template` for `month`.
pub fn has_generated(records: &[Record], template: &RecordId, month: YearMonth) -> bool {
    records
        .iter()
        .filter_map(Record::as_instance)
        .any(|i| i.is_generated_for(template, month))
}

/// Materialize the instance of `template` for `month`.
///
/// The due day is clamped to the month's length, and the id is derived from
/// the (template, month) pair so repeated runs agree on it.
pub fn instance_for(template: &Template, month: YearMonth) -> Instance {
    Instance {
        id: RecordId::new(format!("{}-{}", template.id, month)),
        date: month.clamped_day(template.due_day),
        amount: template.amount,
        category: template.category,
        property_ref: template.property_ref.clone(),
        property_name: template.property_name.clone(),
        description: template.description.clone(),
        vendor: template.vendor.clone(),
        notes: template.notes.clone(),
        receipt_url: String::new(),
        miles: None,
        created_by: template.created_by.clone(),
        generated_from_template: Some(template.id.clone()),
        generated_for_month: Some(month),
    }
}

/// Compute the instances missing from `records` as of `as_of`.
///
/// Output order: templates in collection order, months oldest first.
pub fn expand(records: &[Record], as_of: NaiveDate) -> Vec<Instance> {
    let mut index = GeneratedIndex::build(records);
    let current = YearMonth::of(as_of);
    let mut created = Vec::new();

    for template in records.iter().filter_map(Record::as_template) {
        let anchor = anchor_month(template);
        for offset in (0..BACKFILL_MONTHS as i32).rev() {
            let target = current.add_months(-offset);
            if !is_due(template.frequency, anchor, target) {
                continue;
            }
            if index.contains(&template.id, target) {
                continue;
            }
            index.insert(template.id.clone(), target);
            created.push(instance_for(template, target));
        }
    }

    created
}

/// Manual "generate this period" for one template.
///
/// Shares the uniqueness rule with `expand` but not the frequency or
/// backfill checks: the user picked the month explicitly.
pub fn generate_for_month(
    records: &[Record],
    template_id: &RecordId,
    month: YearMonth,
) -> Result<Instance> {
    let template = records
        .iter()
        .filter_map(Record::as_template)
        .find(|t| &t.id == template_id)
        .ok_or_else(|| RecurrenceError::TemplateNotFound(template_id.clone()))?;

    if has_generated(records, template_id, month) {
        return Err(RecurrenceError::AlreadyGenerated {
            template: template_id.clone(),
            month,
        });
    }

    Ok(instance_for(template, month))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Category;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ym(y: i32, m: u32) -> YearMonth {
        YearMonth::new(y, m).unwrap()
    }

    fn template(id: &str, frequency: Frequency, due_day: u32, created_on: NaiveDate) -> Template {
        let mut t = Template::new(frequency, due_day, 120.0, created_on);
        t.id = RecordId::from(id);
        t
    }

    fn with(records: &[Record], instances: Vec<Instance>) -> Vec<Record> {
        let mut all = records.to_vec();
        all.extend(instances.into_iter().map(Record::from));
        all
    }

    #[test]
    fn test_monthly_end_to_end() {
        let mut t = template("rent-insurance", Frequency::Monthly, 15, date(2026, 1, 5));
        t.category = Category::Insurance;
        t.vendor = "Acme Mutual".into();
        let records = vec![Record::from(t)];

        let created = expand(&records, date(2026, 3, 20));

        let dates: Vec<_> = created.iter().map(|i| i.date).collect();
        assert_eq!(dates, vec![date(2026, 1, 15), date(2026, 2, 15), date(2026, 3, 15)]);
        let months: Vec<_> = created
            .iter()
            .map(|i| i.generated_for_month.unwrap().to_string())
            .collect();
        assert_eq!(months, vec!["2026-01", "2026-02", "2026-03"]);
        for instance in &created {
            assert_eq!(instance.generated_from_template, Some(RecordId::from("rent-insurance")));
            assert_eq!(instance.amount, 120.0);
            assert_eq!(instance.category, Category::Insurance);
            assert_eq!(instance.vendor, "Acme Mutual");
        }
    }

    #[test]
    fn test_expand_is_idempotent() {
        let records = vec![
            Record::from(template("t1", Frequency::Monthly, 31, date(2025, 6, 1))),
            Record::from(template("t2", Frequency::Quarterly, 10, date(2025, 12, 3))),
            Record::from(template("t3", Frequency::Annually, 1, date(2025, 2, 14))),
        ];
        let as_of = date(2026, 2, 27);

        let first = expand(&records, as_of);
        assert!(!first.is_empty());

        let second = expand(&with(&records, first), as_of);
        assert!(second.is_empty());
    }

    #[test]
    fn test_expand_is_deterministic() {
        let records = vec![Record::from(template("t1", Frequency::Monthly, 5, date(2025, 1, 1)))];
        let as_of = date(2026, 7, 4);
        assert_eq!(expand(&records, as_of), expand(&records, as_of));
    }

    #[test]
    fn test_due_day_clamps_to_month_length() {
        let records = vec![Record::from(template("t1", Frequency::Monthly, 31, date(2026, 1, 1)))];

        let created = expand(&records, date(2026, 4, 2));

        let dates: Vec<_> = created.iter().map(|i| i.date).collect();
        assert_eq!(dates, vec![date(2026, 2, 28), date(2026, 3, 31), date(2026, 4, 30)]);
    }

    #[test]
    fn test_due_day_clamps_in_leap_february() {
        let records = vec![Record::from(template("t1", Frequency::Monthly, 31, date(2028, 2, 1)))];
        let created = expand(&records, date(2028, 2, 10));
        assert_eq!(created[0].date, date(2028, 2, 29));
    }

    #[test]
    fn test_backfill_window_is_three_months() {
        // Created three months before as_of: only the window is filled.
        let records = vec![Record::from(template("t1", Frequency::Monthly, 1, date(2025, 12, 1)))];

        let created = expand(&records, date(2026, 3, 15));

        assert_eq!(created.len(), 3);
        let months: Vec<_> = created.iter().map(|i| i.generated_for_month.unwrap()).collect();
        assert_eq!(months, vec![ym(2026, 1), ym(2026, 2), ym(2026, 3)]);
    }

    #[test]
    fn test_nothing_before_anchor() {
        let records = vec![Record::from(template("t1", Frequency::Monthly, 1, date(2026, 3, 1)))];
        let created = expand(&records, date(2026, 3, 15));
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].generated_for_month, Some(ym(2026, 3)));
    }

    #[test]
    fn test_effective_start_moves_anchor_earlier() {
        let mut t = template("t1", Frequency::Quarterly, 1, date(2026, 3, 1));
        t.effective_start = Some(ym(2026, 1));

        assert_eq!(anchor_month(&t), ym(2026, 1));
        let created = expand(&[Record::from(t)], date(2026, 3, 15));
        let months: Vec<_> = created.iter().map(|i| i.generated_for_month.unwrap()).collect();
        assert_eq!(months, vec![ym(2026, 1)]);
    }

    #[test]
    fn test_later_effective_start_does_not_move_anchor() {
        let mut t = template("t1", Frequency::Monthly, 1, date(2026, 1, 10));
        t.effective_start = Some(ym(2026, 6));
        assert_eq!(anchor_month(&t), ym(2026, 1));
    }

    #[test]
    fn test_quarterly_matches_every_third_month() {
        let anchor = ym(2026, 1);
        assert!(is_due(Frequency::Quarterly, anchor, ym(2026, 1)));
        assert!(!is_due(Frequency::Quarterly, anchor, ym(2026, 2)));
        assert!(!is_due(Frequency::Quarterly, anchor, ym(2026, 3)));
        assert!(is_due(Frequency::Quarterly, anchor, ym(2026, 4)));
        assert!(is_due(Frequency::Quarterly, anchor, ym(2026, 7)));
        assert!(is_due(Frequency::Quarterly, anchor, ym(2027, 1)));
        assert!(!is_due(Frequency::Quarterly, anchor, ym(2025, 10)));
    }

    #[test]
    fn test_quarterly_expansion() {
        let records = vec![Record::from(template("t1", Frequency::Quarterly, 1, date(2025, 11, 20)))];

        let created = expand(&records, date(2026, 2, 1));

        let months: Vec<_> = created.iter().map(|i| i.generated_for_month.unwrap()).collect();
        assert_eq!(months, vec![ym(2026, 2)]);
    }

    #[test]
    fn test_annually_matches_anchor_calendar_month() {
        let anchor = ym(2025, 3);
        assert!(is_due(Frequency::Annually, anchor, ym(2025, 3)));
        assert!(is_due(Frequency::Annually, anchor, ym(2026, 3)));
        assert!(!is_due(Frequency::Annually, anchor, ym(2026, 4)));
        assert!(!is_due(Frequency::Annually, anchor, ym(2024, 3)));
    }

    #[test]
    fn test_existing_instance_is_not_duplicated() {
        let t = template("t1", Frequency::Monthly, 1, date(2026, 1, 1));
        let mut manual = Instance::new(date(2026, 2, 3), 99.0);
        manual.generated_from_template = Some(RecordId::from("t1"));
        manual.generated_for_month = Some(ym(2026, 2));
        let records = vec![Record::from(t), Record::from(manual)];

        let created = expand(&records, date(2026, 3, 1));

        let months: Vec<_> = created.iter().map(|i| i.generated_for_month.unwrap()).collect();
        assert_eq!(months, vec![ym(2026, 1), ym(2026, 3)]);
    }

    #[test]
    fn test_unlinked_instances_do_not_count() {
        let t = template("t1", Frequency::Monthly, 1, date(2026, 3, 1));
        let plain = Instance::new(date(2026, 3, 1), 120.0);
        let records = vec![Record::from(t), Record::from(plain)];
        assert_eq!(expand(&records, date(2026, 3, 2)).len(), 1);
    }

    #[test]
    fn test_instance_ids_are_stable() {
        let records = vec![Record::from(template("t1", Frequency::Monthly, 1, date(2026, 3, 1)))];
        let created = expand(&records, date(2026, 3, 2));
        assert_eq!(created[0].id.as_str(), "t1-2026-03");
    }

    #[test]
    fn test_generate_for_month() {
        let records = vec![Record::from(template("t1", Frequency::Quarterly, 31, date(2026, 1, 1)))];

        // Manual generation ignores frequency.
        let instance = generate_for_month(&records, &RecordId::from("t1"), ym(2026, 6)).unwrap();
        assert_eq!(instance.date, date(2026, 6, 30));
        assert!(instance.is_generated_for(&RecordId::from("t1"), ym(2026, 6)));

        let records = with(&records, vec![instance]);
        assert_eq!(
            generate_for_month(&records, &RecordId::from("t1"), ym(2026, 6)),
            Err(RecurrenceError::AlreadyGenerated {
                template: RecordId::from("t1"),
                month: ym(2026, 6),
            })
        );
    }

    #[test]
    fn test_generate_for_unknown_template() {
        let result = generate_for_month(&[], &RecordId::from("missing"), ym(2026, 6));
        assert_eq!(result, Err(RecurrenceError::TemplateNotFound(RecordId::from("missing"))));
    }
}
