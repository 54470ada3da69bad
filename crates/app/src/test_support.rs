//! Shared fixtures for service and router tests.

use std::{sync::Arc, time::Duration};

use chrono::Utc;

use payroll_core::roster_csv::RosterCsv;
use payroll_core::types::{EmployeeProfile, EmploymentStatus, OwnerScope};
use payroll_storage::Database;
use payroll_util::PayrollSettings;

use crate::export::{DocumentExporter, DocumentSettings};
use crate::invoice::InvoiceService;
use crate::payroll::PayrollService;
use crate::retry::RetryPolicy;
use crate::roster::{EmployeeInput, RosterService};
use crate::router::Clock;
use crate::scope_lock::ScopeLocks;

pub const ROSTER_HEADER: &str = "name,government_id,position,status,address,phone,email,gender,date_of_birth,birth_place,joined_date,last_education,religion,bank,bank_account_number";

pub struct ServiceContext {
    pub database: Database,
    pub roster: RosterService,
    pub payroll: PayrollService,
    pub invoices: InvoiceService,
    pub exporter: DocumentExporter,
}

/// Default settings with a short retry backoff.
pub fn test_settings() -> PayrollSettings {
    PayrollSettings {
        retry_backoff: Duration::from_millis(1),
        ..PayrollSettings::default()
    }
}

pub async fn service_context() -> ServiceContext {
    let database = Database::connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    database.run_migrations().await.expect("migrations");

    let settings = test_settings();
    let documents = DocumentSettings::from_settings(&settings).expect("document settings");
    let clock: Clock = Arc::new(Utc::now);
    let locks = ScopeLocks::new();
    let retry = RetryPolicy::from_settings(&settings);

    ServiceContext {
        roster: RosterService::new(
            database.clone(),
            locks.clone(),
            retry,
            clock.clone(),
            RosterCsv::new(settings.csv_delimiter),
        ),
        payroll: PayrollService::new(database.clone(), locks, retry, clock.clone()),
        invoices: InvoiceService::new(database.clone(), retry, clock.clone()),
        exporter: DocumentExporter::new(database.clone(), retry, clock, documents),
        database,
    }
}

pub fn owner(raw: &str) -> OwnerScope {
    OwnerScope::parse(raw).expect("valid owner scope")
}

pub fn profile(government_id: &str, name: &str) -> EmployeeProfile {
    EmployeeProfile {
        name: name.into(),
        government_id: government_id.into(),
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
        bank: None,
        bank_account_number: None,
    }
}

/// Roster document with the canonical header followed by `rows`.
pub fn roster_csv(rows: &[&str]) -> String {
    let mut text = String::from(ROSTER_HEADER);
    text.push('\n');
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    text
}

/// Creates an active employee and returns its id.
pub async fn seed_employee(
    ctx: &ServiceContext,
    owner: &OwnerScope,
    government_id: &str,
    name: &str,
) -> String {
    ctx.roster
        .create(
            owner,
            EmployeeInput {
                profile: profile(government_id, name),
                active: None,
            },
        )
        .await
        .expect("seed employee")
        .id
}
