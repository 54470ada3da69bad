use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::{checked_sum, validate_amount, AmountError};

const MAX_SCOPE_LEN: usize = 128;

/// Opaque account boundary. Every employee, payroll record and invoice belongs to exactly one scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OwnerScope(String);

impl OwnerScope {
    /// Validates and wraps a raw scope identifier.
    pub fn parse(value: &str) -> Result<Self, ScopeError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ScopeError::Empty);
        }
        if trimmed.len() > MAX_SCOPE_LEN {
            return Err(ScopeError::TooLong(trimmed.len()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("owner scope must not be empty")]
    Empty,
    #[error("owner scope is too long ({0} bytes)")]
    TooLong(usize),
}

/// Closed set of employment statuses accepted by the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmploymentStatus {
    FullTime,
    Probation,
    Contract,
}

impl EmploymentStatus {
    /// Returns the canonical database and export representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullTime => "FULL_TIME",
            Self::Probation => "PROBATION",
            Self::Contract => "CONTRACT",
        }
    }

    /// Human readable label used on rendered documents.
    pub fn label(self) -> &'static str {
        match self {
            Self::FullTime => "Full time",
            Self::Probation => "Probation",
            Self::Contract => "Contract",
        }
    }

    /// Lenient parse: case-insensitive, `-` and spaces count as `_`.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .trim()
            .chars()
            .map(|ch| match ch {
                '-' | ' ' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();
        match normalized.as_str() {
            "FULL_TIME" | "FULLTIME" => Some(Self::FullTime),
            "PROBATION" => Some(Self::Probation),
            "CONTRACT" => Some(Self::Contract),
            _ => None,
        }
    }
}

/// The imported/editable part of an employee. Two profiles are equal iff an import would not change anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeProfile {
    pub name: String,
    pub government_id: String,
    pub position: String,
    pub status: EmploymentStatus,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub birth_place: Option<String>,
    #[serde(default)]
    pub joined_date: Option<NaiveDate>,
    #[serde(default)]
    pub last_education: Option<String>,
    #[serde(default)]
    pub religion: Option<String>,
    #[serde(default)]
    pub bank: Option<String>,
    #[serde(default)]
    pub bank_account_number: Option<i64>,
}

impl EmployeeProfile {
    /// Trims every text field and collapses blank optional fields to `None`.
    pub fn normalized(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            government_id: self.government_id.trim().to_string(),
            position: self.position.trim().to_string(),
            status: self.status,
            address: normalize_optional(self.address),
            phone: normalize_optional(self.phone),
            email: normalize_optional(self.email),
            gender: normalize_optional(self.gender),
            date_of_birth: self.date_of_birth,
            birth_place: normalize_optional(self.birth_place),
            joined_date: self.joined_date,
            last_education: normalize_optional(self.last_education),
            religion: normalize_optional(self.religion),
            bank: normalize_optional(self.bank),
            bank_account_number: self.bank_account_number,
        }
    }

    /// Checks the required identity fields of an already normalized profile.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.name.is_empty() {
            return Err(ProfileError::MissingField("name"));
        }
        if self.government_id.is_empty() {
            return Err(ProfileError::MissingField("government_id"));
        }
        if self.position.is_empty() {
            return Err(ProfileError::MissingField("position"));
        }
        Ok(())
    }
}

pub(crate) fn normalize_optional(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Persisted employee row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmployeeRecord {
    pub id: String,
    pub owner: OwnerScope,
    #[serde(flatten)]
    pub profile: EmployeeProfile,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Calendar month of a payroll period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "MonthRepr")]
pub enum Month {
    January,
    February,
    March,
    April,
    May,
    June,
    July,
    August,
    September,
    October,
    November,
    December,
}

const MONTHS: [Month; 12] = [
    Month::January,
    Month::February,
    Month::March,
    Month::April,
    Month::May,
    Month::June,
    Month::July,
    Month::August,
    Month::September,
    Month::October,
    Month::November,
    Month::December,
];

impl Month {
    pub fn from_number(number: u32) -> Option<Self> {
        number
            .checked_sub(1)
            .and_then(|index| MONTHS.get(index as usize).copied())
    }

    pub fn number(self) -> u32 {
        self as u32 + 1
    }

    /// Canonical storage representation, e.g. `JANUARY`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::January => "JANUARY",
            Self::February => "FEBRUARY",
            Self::March => "MARCH",
            Self::April => "APRIL",
            Self::May => "MAY",
            Self::June => "JUNE",
            Self::July => "JULY",
            Self::August => "AUGUST",
            Self::September => "SEPTEMBER",
            Self::October => "OCTOBER",
            Self::November => "NOVEMBER",
            Self::December => "DECEMBER",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::January => "January",
            Self::February => "February",
            Self::March => "March",
            Self::April => "April",
            Self::May => "May",
            Self::June => "June",
            Self::July => "July",
            Self::August => "August",
            Self::September => "September",
            Self::October => "October",
            Self::November => "November",
            Self::December => "December",
        }
    }
}

impl FromStr for Month {
    type Err = PeriodError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if let Ok(number) = trimmed.parse::<u32>() {
            return Self::from_number(number).ok_or_else(|| PeriodError::InvalidMonth(value.into()));
        }
        let upper = trimmed.to_ascii_uppercase();
        MONTHS
            .iter()
            .copied()
            .find(|month| month.as_str() == upper || (upper.len() == 3 && month.as_str().starts_with(&upper)))
            .ok_or_else(|| PeriodError::InvalidMonth(value.into()))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MonthRepr {
    Number(u32),
    Name(String),
}

impl TryFrom<MonthRepr> for Month {
    type Error = PeriodError;

    fn try_from(value: MonthRepr) -> Result<Self, Self::Error> {
        match value {
            MonthRepr::Number(number) => {
                Self::from_number(number).ok_or_else(|| PeriodError::InvalidMonth(number.to_string()))
            }
            MonthRepr::Name(name) => name.parse(),
        }
    }
}

pub const MIN_YEAR: i32 = 1900;
pub const MAX_YEAR: i32 = 9999;

/// A (month, year) pair scoping payroll records and invoices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub month: Month,
    pub year: i32,
}

impl Period {
    pub fn new(month: Month, year: i32) -> Result<Self, PeriodError> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(PeriodError::InvalidYear(year));
        }
        Ok(Self { month, year })
    }

    /// Re-checks the year bound on a deserialized period.
    pub fn validated(self) -> Result<Self, PeriodError> {
        Self::new(self.month, self.year)
    }

    /// Lowercase filename fragment, e.g. `january-2025`.
    pub fn slug(self) -> String {
        format!("{}-{}", self.month.as_str().to_ascii_lowercase(), self.year)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.month.label(), self.year)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("unrecognized month: {0}")]
    InvalidMonth(String),
    #[error("year {0} is outside the supported range")]
    InvalidYear(i32),
}

/// The eight salary components of a payroll record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SalaryComponents {
    #[serde(default)]
    pub basic: Decimal,
    #[serde(default)]
    pub position_allowance: Decimal,
    #[serde(default)]
    pub family_allowance: Decimal,
    #[serde(default)]
    pub child_allowance: Decimal,
    #[serde(default)]
    pub food_allowance: Decimal,
    #[serde(default)]
    pub bonus: Decimal,
    #[serde(default)]
    pub thr: Decimal,
    #[serde(default)]
    pub others: Decimal,
}

impl SalaryComponents {
    /// Sum of all eight components. This is the only source of a record's `total`.
    pub fn total(&self) -> Result<Decimal, AmountError> {
        checked_sum(self.items().iter().map(|(_, _, amount)| *amount))
    }

    /// `(field, label, amount)` in display order.
    pub fn items(&self) -> [(&'static str, &'static str, Decimal); 8] {
        [
            ("basic", "Basic salary", self.basic),
            ("position_allowance", "Position allowance", self.position_allowance),
            ("family_allowance", "Family allowance", self.family_allowance),
            ("child_allowance", "Child allowance", self.child_allowance),
            ("food_allowance", "Food allowance", self.food_allowance),
            ("bonus", "Bonus", self.bonus),
            ("thr", "Holiday allowance (THR)", self.thr),
            ("others", "Other", self.others),
        ]
    }

    pub fn validate(&self) -> Result<(), AmountError> {
        for (field, _, amount) in self.items() {
            validate_amount(field, amount)?;
        }
        self.total().map(|_| ())
    }
}

/// Persisted salary slip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayrollRecord {
    pub id: String,
    pub owner: OwnerScope,
    pub employee_id: String,
    #[serde(flatten)]
    pub period: Period,
    #[serde(flatten)]
    pub components: SalaryComponents,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayrollRecord {
    pub fn total_is_consistent(&self) -> bool {
        self.components.total().is_ok_and(|total| total == self.total)
    }
}

/// One invoice line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub description: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl InvoiceItem {
    pub fn amount(&self) -> Result<Decimal, AmountError> {
        self.unit_price
            .checked_mul(Decimal::from(self.quantity))
            .ok_or(AmountError::Overflow)
    }
}

/// Sum of line amounts; never taken from input.
pub fn invoice_total(items: &[InvoiceItem]) -> Result<Decimal, AmountError> {
    items.iter().try_fold(Decimal::ZERO, |sum, item| {
        sum.checked_add(item.amount()?).ok_or(AmountError::Overflow)
    })
}

/// Persisted invoice, the sibling document kind of the salary slip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invoice {
    pub id: String,
    pub owner: OwnerScope,
    pub number: String,
    pub customer_name: String,
    pub customer_address: Option<String>,
    #[serde(flatten)]
    pub period: Period,
    pub items: Vec<InvoiceItem>,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn owner_scope_trims_and_rejects_blank() {
        assert_eq!(OwnerScope::parse("  acme ").unwrap().as_str(), "acme");
        assert_eq!(OwnerScope::parse("   ").unwrap_err(), ScopeError::Empty);
        let long = "x".repeat(MAX_SCOPE_LEN + 1);
        assert!(matches!(OwnerScope::parse(&long), Err(ScopeError::TooLong(_))));
    }

    #[test]
    fn status_parse_is_lenient_about_case_and_separators() {
        assert_eq!(EmploymentStatus::parse("full time"), Some(EmploymentStatus::FullTime));
        assert_eq!(EmploymentStatus::parse("Full-Time"), Some(EmploymentStatus::FullTime));
        assert_eq!(EmploymentStatus::parse("CONTRACT"), Some(EmploymentStatus::Contract));
        assert_eq!(EmploymentStatus::parse(" probation "), Some(EmploymentStatus::Probation));
        assert_eq!(EmploymentStatus::parse("intern"), None);
    }

    #[test]
    fn month_accepts_names_abbreviations_and_numbers() {
        assert_eq!("january".parse::<Month>().unwrap(), Month::January);
        assert_eq!("Feb".parse::<Month>().unwrap(), Month::February);
        assert_eq!("12".parse::<Month>().unwrap(), Month::December);
        assert!("13".parse::<Month>().is_err());
        assert!("Ja".parse::<Month>().is_err());
        assert_eq!(Month::March.number(), 3);
    }

    #[test]
    fn month_deserializes_from_name_or_number() {
        let named: Month = serde_json::from_str("\"april\"").unwrap();
        assert_eq!(named, Month::April);
        let numbered: Month = serde_json::from_str("5").unwrap();
        assert_eq!(numbered, Month::May);
        assert!(serde_json::from_str::<Month>("0").is_err());
    }

    #[test]
    fn period_rejects_out_of_range_year_and_builds_slug() {
        assert!(Period::new(Month::January, 1800).is_err());
        let period = Period::new(Month::January, 2025).unwrap();
        assert_eq!(period.slug(), "january-2025");
        assert_eq!(period.to_string(), "January 2025");
    }

    #[test]
    fn total_is_the_sum_of_all_components() {
        let components = SalaryComponents {
            basic: Decimal::new(500_000_000, 2),
            position_allowance: Decimal::new(75_000_000, 2),
            family_allowance: Decimal::new(25_000_050, 2),
            child_allowance: Decimal::new(10_000_000, 2),
            food_allowance: Decimal::new(30_000_000, 2),
            bonus: Decimal::new(1, 2),
            thr: Decimal::ZERO,
            others: Decimal::new(12_345, 2),
        };
        assert_eq!(components.total(), Ok(Decimal::new(640_012_396, 2)));
    }

    #[test]
    fn profile_normalization_trims_and_drops_blanks() {
        let profile = EmployeeProfile {
            name: "  Ana ".into(),
            government_id: " 001 ".into(),
            position: "Clerk".into(),
            status: EmploymentStatus::Contract,
            address: Some("   ".into()),
            phone: Some(" 0812 ".into()),
            email: None,
            gender: None,
            date_of_birth: None,
            birth_place: None,
            joined_date: None,
            last_education: None,
            religion: None,
            bank: None,
            bank_account_number: None,
        }
        .normalized();
        assert_eq!(profile.name, "Ana");
        assert_eq!(profile.government_id, "001");
        assert_eq!(profile.address, None);
        assert_eq!(profile.phone.as_deref(), Some("0812"));
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn invoice_total_multiplies_quantity() {
        let items = vec![
            InvoiceItem {
                description: "Consulting".into(),
                quantity: 3,
                unit_price: Decimal::new(150_000, 2),
            },
            InvoiceItem {
                description: "Travel".into(),
                quantity: 1,
                unit_price: Decimal::new(4_999, 2),
            },
        ];
        assert_eq!(invoice_total(&items), Ok(Decimal::new(454_999, 2)));
    }

    #[test]
    fn oversized_components_fail_validation_instead_of_panicking() {
        let components: SalaryComponents = serde_json::from_str(
            r#"{"basic":"79228162514264337593543950335","bonus":"1"}"#,
        )
        .unwrap();
        assert_eq!(components.total(), Err(AmountError::Overflow));
        assert_eq!(
            components.validate(),
            Err(AmountError::TooLarge { field: "basic" })
        );
    }

    #[test]
    fn invoice_total_reports_overflow() {
        let items = vec![InvoiceItem {
            description: "Everything".into(),
            quantity: 2,
            unit_price: Decimal::MAX,
        }];
        assert_eq!(items[0].amount(), Err(AmountError::Overflow));
        assert_eq!(invoice_total(&items), Err(AmountError::Overflow));
    }

    #[test]
    fn inconsistent_total_is_detected_even_when_components_overflow() {
        let at = Utc::now();
        let record = PayrollRecord {
            id: "r1".into(),
            owner: OwnerScope::parse("acme").unwrap(),
            employee_id: "e1".into(),
            period: Period::new(Month::March, 2025).unwrap(),
            components: SalaryComponents {
                basic: Decimal::MAX,
                bonus: Decimal::MAX,
                ..SalaryComponents::default()
            },
            total: Decimal::MAX,
            created_at: at,
            updated_at: at,
        };
        assert!(!record.total_is_consistent());
    }
}
