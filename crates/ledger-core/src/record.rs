//! Ledger record model.
//!
//! A `Record` is either a recurring `Template` or a dated `Instance`. The
//! two are kept as distinct variants so that expansion and persistence code
//! can never treat a template as a transaction.
//!
//! Every field except the `kind` tag decodes with a default, and unknown
//! category or frequency keys fall back to `Other` and `Monthly`, so a
//! document written by an older client loads with neutral values. `Record::normalize` finishes the job for values serde
//! cannot express (non-finite amounts, out-of-range due days, empty ids).

use crate::month::YearMonth;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// IRS standard mileage rate, per mile.
pub const MILEAGE_RATE: f64 = 0.70;

/// Opaque record identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Expense category. Closed set; unknown values decode as `Other`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Repair,
    Insurance,
    Maintenance,
    Mortgage,
    Utilities,
    Internet,
    Software,
    Taxes,
    Landscaping,
    Hoa,
    Legal,
    Mileage,
    #[default]
    Other,
}

impl Category {
    pub const ALL: [Category; 13] = [
        Category::Repair,
        Category::Insurance,
        Category::Maintenance,
        Category::Mortgage,
        Category::Utilities,
        Category::Internet,
        Category::Software,
        Category::Taxes,
        Category::Landscaping,
        Category::Hoa,
        Category::Legal,
        Category::Mileage,
        Category::Other,
    ];

    /// Stored key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Repair => "repair",
            Category::Insurance => "insurance",
            Category::Maintenance => "maintenance",
            Category::Mortgage => "mortgage",
            Category::Utilities => "utilities",
            Category::Internet => "internet",
            Category::Software => "software",
            Category::Taxes => "taxes",
            Category::Landscaping => "landscaping",
            Category::Hoa => "hoa",
            Category::Legal => "legal",
            Category::Mileage => "mileage",
            Category::Other => "other",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Repair => "Repair",
            Category::Insurance => "Insurance",
            Category::Maintenance => "Maintenance",
            Category::Mortgage => "Mortgage",
            Category::Utilities => "Utilities",
            Category::Internet => "Internet",
            Category::Software => "Software",
            Category::Taxes => "Property Taxes",
            Category::Landscaping => "Landscaping",
            Category::Hoa => "HOA",
            Category::Legal => "Legal Fees",
            Category::Mileage => "Mileage",
            Category::Other => "Other",
        }
    }

    /// Parse a stored key, falling back to `Other` for anything unknown.
    pub fn from_key(key: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == key)
            .unwrap_or(Category::Other)
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Category {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let key = String::deserialize(d)?;
        Ok(Self::from_key(&key))
    }
}

/// How often a template recurs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Monthly,
    Quarterly,
    Annually,
}

impl Frequency {
    pub const ALL: [Frequency; 3] = [Frequency::Monthly, Frequency::Quarterly, Frequency::Annually];

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Annually => "annually",
        }
    }

    /// Parse a stored key. Anything unknown recurs monthly.
    pub fn from_key(key: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == key)
            .unwrap_or_default()
    }
}

impl<'de> Deserialize<'de> for Frequency {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let key = String::deserialize(d)?;
        Ok(Self::from_key(&key))
    }
}

/// A recurring expense definition. Never itself a dated transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(default)]
    pub id: RecordId,
    #[serde(default)]
    pub frequency: Frequency,
    /// Requested day of month, 1..=31. Clamped per month at expansion time.
    #[serde(default = "default_due_day")]
    pub due_day: u32,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub category: Category,
    /// Opaque property reference.
    #[serde(default)]
    pub property_ref: String,
    #[serde(default)]
    pub property_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub notes: String,
    /// Stated start month. Expansion anchors on the earlier of this and
    /// the creation month.
    #[serde(default)]
    pub effective_start: Option<YearMonth>,
    /// Missing creation dates decode as 1970-01-01.
    #[serde(default)]
    pub created_on: NaiveDate,
    #[serde(default)]
    pub created_by: String,
}

fn default_due_day() -> u32 {
    1
}

impl Template {
    pub fn new(frequency: Frequency, due_day: u32, amount: f64, created_on: NaiveDate) -> Self {
        Self {
            id: RecordId::generate(),
            frequency,
            due_day,
            amount,
            category: Category::Other,
            property_ref: String::new(),
            property_name: String::new(),
            description: String::new(),
            vendor: String::new(),
            notes: String::new(),
            effective_start: None,
            created_on,
            created_by: String::new(),
        }
    }
}

/// A concrete dated expense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(default)]
    pub id: RecordId,
    /// Missing dates decode as 1970-01-01.
    #[serde(default)]
    pub date: NaiveDate,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub property_ref: String,
    #[serde(default)]
    pub property_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub notes: String,
    /// Opaque URL produced by the upload collaborator.
    #[serde(default)]
    pub receipt_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miles: Option<f64>,
    #[serde(default)]
    pub created_by: String,
    /// Template this instance was materialized from. Set once, never edited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_from_template: Option<RecordId>,
    /// Period this instance was materialized for. Set once, never edited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_for_month: Option<YearMonth>,
}

impl Instance {
    pub fn new(date: NaiveDate, amount: f64) -> Self {
        Self {
            id: RecordId::generate(),
            date,
            amount,
            category: Category::Other,
            property_ref: String::new(),
            property_name: String::new(),
            description: String::new(),
            vendor: String::new(),
            notes: String::new(),
            receipt_url: String::new(),
            miles: None,
            created_by: String::new(),
            generated_from_template: None,
            generated_for_month: None,
        }
    }

    /// A mileage entry; the amount is derived from [`MILEAGE_RATE`].
    pub fn mileage(date: NaiveDate, miles: f64) -> Self {
        let mut instance = Self::new(date, mileage_amount(miles));
        instance.category = Category::Mileage;
        instance.miles = Some(miles);
        instance
    }

    /// Whether this instance was materialized from `template` for `month`.
    pub fn is_generated_for(&self, template: &RecordId, month: YearMonth) -> bool {
        self.generated_from_template.as_ref() == Some(template)
            && self.generated_for_month == Some(month)
    }
}

/// Dollar amount for a mileage entry, rounded to cents.
pub fn mileage_amount(miles: f64) -> f64 {
    (miles * MILEAGE_RATE * 100.0).round() / 100.0
}

/// A ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Record {
    Template(Template),
    Instance(Instance),
}

impl Record {
    pub fn id(&self) -> &RecordId {
        match self {
            Record::Template(t) => &t.id,
            Record::Instance(i) => &i.id,
        }
    }

    pub fn as_template(&self) -> Option<&Template> {
        match self {
            Record::Template(t) => Some(t),
            Record::Instance(_) => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Record::Instance(i) => Some(i),
            Record::Template(_) => None,
        }
    }

    /// Replace values the store cannot persist with neutral ones.
    pub fn normalize(&mut self) {
        match self {
            Record::Template(t) => {
                if t.id.is_empty() {
                    t.id = RecordId::generate();
                }
                t.amount = finite_or_zero(t.amount);
                t.due_day = t.due_day.clamp(1, 31);
            }
            Record::Instance(i) => {
                if i.id.is_empty() {
                    i.id = RecordId::generate();
                }
                i.amount = finite_or_zero(i.amount);
                i.miles = i.miles.filter(|m| m.is_finite());
            }
        }
    }

    /// Whether `normalize` would leave this record unchanged.
    pub fn is_normalized(&self) -> bool {
        match self {
            Record::Template(t) => {
                !t.id.is_empty() && t.amount.is_finite() && (1..=31).contains(&t.due_day)
            }
            Record::Instance(i) => {
                !i.id.is_empty()
                    && i.amount.is_finite()
                    && i.miles.is_none_or(|m| m.is_finite())
            }
        }
    }

    /// Apply an edit. Fields that do not exist on this variant are ignored.
    ///
    /// The generation linkage of an instance is not reachable through a
    /// patch, so edits never detach an instance from its template.
    pub fn apply(&mut self, patch: &RecordPatch) {
        match self {
            Record::Template(t) => {
                set(&mut t.amount, patch.amount);
                set(&mut t.category, patch.category);
                set_cloned(&mut t.description, &patch.description);
                set_cloned(&mut t.vendor, &patch.vendor);
                set_cloned(&mut t.notes, &patch.notes);
                set_cloned(&mut t.property_ref, &patch.property_ref);
                set_cloned(&mut t.property_name, &patch.property_name);
                set(&mut t.frequency, patch.frequency);
                set(&mut t.due_day, patch.due_day);
                if patch.effective_start.is_some() {
                    t.effective_start = patch.effective_start;
                }
            }
            Record::Instance(i) => {
                set(&mut i.amount, patch.amount);
                set(&mut i.category, patch.category);
                set_cloned(&mut i.description, &patch.description);
                set_cloned(&mut i.vendor, &patch.vendor);
                set_cloned(&mut i.notes, &patch.notes);
                set_cloned(&mut i.property_ref, &patch.property_ref);
                set_cloned(&mut i.property_name, &patch.property_name);
                set(&mut i.date, patch.date);
                set_cloned(&mut i.receipt_url, &patch.receipt_url);
            }
        }
    }
}

impl From<Template> for Record {
    fn from(t: Template) -> Self {
        Record::Template(t)
    }
}

impl From<Instance> for Record {
    fn from(i: Instance) -> Self {
        Record::Instance(i)
    }
}

/// Normalize every record in a collection.
pub fn normalize_all(records: &mut [Record]) {
    for record in records {
        record.normalize();
    }
}

/// Partial edit of a record. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub amount: Option<f64>,
    pub category: Option<Category>,
    pub description: Option<String>,
    pub vendor: Option<String>,
    pub notes: Option<String>,
    pub property_ref: Option<String>,
    pub property_name: Option<String>,
    // Instance-only
    pub date: Option<NaiveDate>,
    pub receipt_url: Option<String>,
    // Template-only
    pub frequency: Option<Frequency>,
    pub due_day: Option<u32>,
    pub effective_start: Option<YearMonth>,
}

fn set<T>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}

fn set_cloned(field: &mut String, value: &Option<String>) {
    if let Some(value) = value {
        field.clone_from(value);
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}
