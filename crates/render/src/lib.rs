//! PDF rendering of salary slips and invoices, plus ZIP archive assembly.
//!
//! Rendering is pure and synchronous: the same inputs always produce the same
//! bytes. Callers running inside an async runtime should move it onto a
//! blocking thread.

use chrono::NaiveDate;
use thiserror::Error;

use payroll_core::money::Currency;
use payroll_core::types::Period;

pub mod archive;
mod invoice;
mod layout;
mod slip;

pub use archive::{assemble, archive_filename, Archive, ArchiveError};
pub use invoice::render_invoice;
pub use layout::{MARGIN, PAGE_HEIGHT, PAGE_WIDTH};
pub use slip::render_salary_slip;

/// The two document families the renderer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    SalarySlip,
    Invoice,
}

impl DocumentKind {
    pub fn slug(self) -> &'static str {
        match self {
            Self::SalarySlip => "salary-slip",
            Self::Invoice => "invoice",
        }
    }

    /// Title printed in the document header.
    pub fn title(self) -> &'static str {
        match self {
            Self::SalarySlip => "SALARY SLIP",
            Self::Invoice => "INVOICE",
        }
    }
}

/// Issuer-level settings shared by every document of one export.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub issuer_name: String,
    pub currency: Currency,
    pub issued_on: NaiveDate,
}

/// A finished PDF together with its canonical file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    kind: DocumentKind,
    filename: String,
    bytes: Vec<u8>,
}

impl RenderedDocument {
    pub(crate) fn new(kind: DocumentKind, filename: String, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            filename,
            bytes,
        }
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Errors raised while producing a document.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("payroll record {record_id} belongs to employee {expected}, not {actual}")]
    EmployeeMismatch {
        record_id: String,
        expected: String,
        actual: String,
    },
    #[error("stored total of {kind} {id} does not match its line items")]
    InconsistentTotal { kind: &'static str, id: String },
    #[error("pdf encoding failed: {0}")]
    Pdf(String),
}

/// Lowercases `value` and collapses every run of non-alphanumeric characters into one `-`.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("document");
    }
    slug
}

/// `<kind>-<subject>-<month>-<year>.pdf`, for example `salary-slip-budi-santoso-january-2025.pdf`.
pub fn canonical_filename(kind: DocumentKind, subject: &str, period: Period) -> String {
    format!("{}-{}-{}.pdf", kind.slug(), slugify(subject), period.slug())
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use payroll_core::money::Currency;
    use payroll_core::types::{
        EmployeeProfile, EmployeeRecord, EmploymentStatus, Month, OwnerScope, PayrollRecord,
        Period, SalaryComponents,
    };

    use crate::RenderContext;

    pub fn context() -> RenderContext {
        RenderContext {
            issuer_name: "PT Sejahtera".into(),
            currency: Currency::Idr,
            issued_on: NaiveDate::from_ymd_opt(2025, 2, 1).expect("date"),
        }
    }

    pub fn period() -> Period {
        Period::new(Month::January, 2025).expect("period")
    }

    pub fn employee(id: &str, name: &str) -> EmployeeRecord {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        EmployeeRecord {
            id: id.into(),
            owner: OwnerScope::parse("acme").expect("owner"),
            profile: EmployeeProfile {
                name: name.into(),
                government_id: format!("gov-{id}"),
                position: "Engineer".into(),
                status: EmploymentStatus::FullTime,
                address: None,
                phone: None,
                email: None,
                gender: None,
                date_of_birth: None,
                birth_place: None,
                joined_date: None,
                last_education: None,
                religion: None,
                bank: Some("BCA".into()),
                bank_account_number: Some(1_234_567_890),
            },
            active: true,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn record(id: &str, employee_id: &str) -> PayrollRecord {
        let at = Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap();
        let components = SalaryComponents {
            basic: Decimal::new(500_000_000, 2),
            position_allowance: Decimal::new(100_000_000, 2),
            food_allowance: Decimal::new(40_012_396, 2),
            ..SalaryComponents::default()
        };
        PayrollRecord {
            id: id.into(),
            owner: OwnerScope::parse("acme").expect("owner"),
            employee_id: employee_id.into(),
            period: period(),
            total: components.total().expect("total"),
            components,
            created_at: at,
            updated_at: at,
        }
    }
}
