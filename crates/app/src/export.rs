use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use payroll_core::money::Currency;
use payroll_core::types::{EmployeeRecord, Invoice, OwnerScope, PayrollRecord, Period};
use payroll_render::{
    assemble, render_invoice, render_salary_slip, Archive, ArchiveError, DocumentKind,
    RenderContext, RenderError, RenderedDocument,
};
use payroll_storage::{Database, EmployeeError, InvoiceError, PayrollError};
use payroll_util::PayrollSettings;

use crate::retry::{RetryPolicy, Transient};
use crate::roster::rollback;
use crate::router::Clock;

/// Issuer-wide document settings resolved once at startup.
#[derive(Debug, Clone)]
pub struct DocumentSettings {
    issuer_name: String,
    currency: Currency,
    timezone: Tz,
}

impl DocumentSettings {
    pub fn from_settings(settings: &PayrollSettings) -> Result<Self, DocumentSettingsError> {
        let currency = Currency::from_code(&settings.currency)
            .ok_or_else(|| DocumentSettingsError::UnknownCurrency(settings.currency.clone()))?;
        let timezone: Tz = settings
            .timezone
            .parse()
            .map_err(|_| DocumentSettingsError::InvalidTimezone(settings.timezone.clone()))?;
        Ok(Self {
            issuer_name: settings.issuer_name.clone(),
            currency,
            timezone,
        })
    }

    /// Calendar date of `now` in the issuer's timezone.
    fn issue_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentSettingsError {
    #[error("unsupported currency: {0}")]
    UnknownCurrency(String),
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// Renders single documents and period archives from a consistent read of storage.
#[derive(Clone)]
pub struct DocumentExporter {
    database: Database,
    retry: RetryPolicy,
    clock: Clock,
    settings: DocumentSettings,
}

impl DocumentExporter {
    pub fn new(
        database: Database,
        retry: RetryPolicy,
        clock: Clock,
        settings: DocumentSettings,
    ) -> Self {
        Self {
            database,
            retry,
            clock,
            settings,
        }
    }

    fn render_context(&self) -> RenderContext {
        RenderContext {
            issuer_name: self.settings.issuer_name.clone(),
            currency: self.settings.currency,
            issued_on: self.settings.issue_date((self.clock)()),
        }
    }

    pub async fn salary_slip(
        &self,
        owner: &OwnerScope,
        record_id: &str,
    ) -> Result<RenderedDocument, ExportError> {
        let (employee, record) = self
            .retry
            .run("slip_load", move || async move {
                let record = self
                    .database
                    .payroll()
                    .fetch(owner, record_id)
                    .await?
                    .ok_or_else(|| ExportError::PayrollNotFound(record_id.to_string()))?;
                let employee = self
                    .database
                    .employees()
                    .fetch(owner, &record.employee_id)
                    .await?
                    .ok_or_else(|| ExportError::MissingEmployee {
                        record_id: record.id.clone(),
                        employee_id: record.employee_id.clone(),
                    })?;
                Ok::<_, ExportError>((employee, record))
            })
            .await?;

        let ctx = self.render_context();
        let document =
            tokio::task::spawn_blocking(move || render_salary_slip(&ctx, &employee, &record))
                .await??;
        counter!("documents_rendered_total", "kind" => DocumentKind::SalarySlip.slug()).increment(1);
        Ok(document)
    }

    pub async fn invoice(
        &self,
        owner: &OwnerScope,
        invoice_id: &str,
    ) -> Result<RenderedDocument, ExportError> {
        let invoice = self
            .retry
            .run("invoice_load", move || async move {
                Ok::<_, ExportError>(self.database.invoices().fetch(owner, invoice_id).await?)
            })
            .await?
            .ok_or_else(|| ExportError::InvoiceNotFound(invoice_id.to_string()))?;

        let ctx = self.render_context();
        let document = tokio::task::spawn_blocking(move || render_invoice(&ctx, &invoice)).await??;
        counter!("documents_rendered_total", "kind" => DocumentKind::Invoice.slug()).increment(1);
        Ok(document)
    }

    /// Renders every salary slip of a period into one archive.
    ///
    /// Records and employees are read inside one transaction; entries follow
    /// employee name, then government id, then record id. A single rendering
    /// failure fails the whole archive.
    pub async fn payroll_archive(
        &self,
        owner: &OwnerScope,
        period: Period,
    ) -> Result<Archive, ExportError> {
        let started = Instant::now();
        let pairs = self
            .retry
            .run("payroll_archive_load", move || self.load_period_slips(owner, period))
            .await?;

        let ctx = Arc::new(self.render_context());
        let handles: Vec<_> = pairs
            .into_iter()
            .map(|(employee, record)| {
                let ctx = Arc::clone(&ctx);
                tokio::task::spawn_blocking(move || render_salary_slip(&ctx, &employee, &record))
            })
            .collect();

        let archive = self
            .finish_archive(DocumentKind::SalarySlip, owner, period, handles)
            .await?;
        histogram!("archive_build_seconds", "kind" => DocumentKind::SalarySlip.slug())
            .record(started.elapsed().as_secs_f64());
        Ok(archive)
    }

    pub async fn invoice_archive(
        &self,
        owner: &OwnerScope,
        period: Period,
    ) -> Result<Archive, ExportError> {
        let started = Instant::now();
        let mut invoices: Vec<Invoice> = self
            .retry
            .run("invoice_archive_load", move || async move {
                Ok::<_, ExportError>(
                    self.database.invoices().list_for_period(owner, period).await?,
                )
            })
            .await?;
        invoices.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.id.cmp(&b.id)));

        let ctx = Arc::new(self.render_context());
        let handles: Vec<_> = invoices
            .into_iter()
            .map(|invoice| {
                let ctx = Arc::clone(&ctx);
                tokio::task::spawn_blocking(move || render_invoice(&ctx, &invoice))
            })
            .collect();

        let archive = self
            .finish_archive(DocumentKind::Invoice, owner, period, handles)
            .await?;
        histogram!("archive_build_seconds", "kind" => DocumentKind::Invoice.slug())
            .record(started.elapsed().as_secs_f64());
        Ok(archive)
    }

    async fn load_period_slips(
        &self,
        owner: &OwnerScope,
        period: Period,
    ) -> Result<Vec<(EmployeeRecord, PayrollRecord)>, ExportError> {
        let mut tx = self.database.begin().await?;
        let snapshot = async {
            let employees = self.database.employees().list_in(&mut tx, owner).await?;
            let records = self
                .database
                .payroll()
                .list_for_period_in(&mut tx, owner, period)
                .await?;
            Ok::<_, ExportError>((employees, records))
        }
        .await;
        rollback(tx).await;
        let (employees, records) = snapshot?;

        let by_id: HashMap<&str, &EmployeeRecord> = employees
            .iter()
            .map(|employee| (employee.id.as_str(), employee))
            .collect();

        let mut pairs = Vec::with_capacity(records.len());
        for record in records {
            let employee = by_id.get(record.employee_id.as_str()).ok_or_else(|| {
                ExportError::MissingEmployee {
                    record_id: record.id.clone(),
                    employee_id: record.employee_id.clone(),
                }
            })?;
            pairs.push(((*employee).clone(), record));
        }
        pairs.sort_by(|(a, ra), (b, rb)| {
            a.profile
                .name
                .cmp(&b.profile.name)
                .then_with(|| a.profile.government_id.cmp(&b.profile.government_id))
                .then_with(|| ra.id.cmp(&rb.id))
        });
        Ok(pairs)
    }

    async fn finish_archive(
        &self,
        kind: DocumentKind,
        owner: &OwnerScope,
        period: Period,
        handles: Vec<JoinHandle<Result<RenderedDocument, RenderError>>>,
    ) -> Result<Archive, ExportError> {
        let documents = match collect_rendered(handles).await {
            Ok(documents) => documents,
            Err(err) => {
                warn!(stage = "export", owner = %owner, period = %period, kind = kind.slug(), error = %err, "document rendering failed, archive aborted");
                return Err(err);
            }
        };
        let count = documents.len();

        let archive = tokio::task::spawn_blocking(move || assemble(kind, period, &documents)).await??;
        counter!("documents_rendered_total", "kind" => kind.slug()).increment(count as u64);
        info!(
            stage = "export",
            owner = %owner,
            period = %period,
            kind = kind.slug(),
            entries = count,
            bytes = archive.bytes().len(),
            "archive built"
        );
        Ok(archive)
    }
}

/// Awaits every render task, even after one has failed, and reports the first failure.
async fn collect_rendered(
    handles: Vec<JoinHandle<Result<RenderedDocument, RenderError>>>,
) -> Result<Vec<RenderedDocument>, ExportError> {
    let mut documents = Vec::with_capacity(handles.len());
    let mut failure = None;
    for handle in handles {
        let joined = handle.await;
        if failure.is_some() {
            continue;
        }
        match joined {
            Ok(Ok(document)) => documents.push(document),
            Ok(Err(err)) => failure = Some(ExportError::Render(err)),
            Err(err) => failure = Some(ExportError::from(err)),
        }
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(documents),
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("payroll record {0} not found")]
    PayrollNotFound(String),
    #[error("invoice {0} not found")]
    InvoiceNotFound(String),
    #[error("payroll record {record_id} points at missing employee {employee_id}")]
    MissingEmployee {
        record_id: String,
        employee_id: String,
    },
    #[error("employee storage error: {0}")]
    Employee(#[from] EmployeeError),
    #[error("payroll storage error: {0}")]
    Payroll(#[from] PayrollError),
    #[error("invoice storage error: {0}")]
    Invoice(#[from] InvoiceError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("rendering failed: {0}")]
    Render(#[from] RenderError),
    #[error("archive assembly failed: {0}")]
    Archive(#[from] ArchiveError),
    #[error("render worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl Transient for ExportError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Employee(err) => err.is_transient(),
            Self::Payroll(err) => err.is_transient(),
            Self::Invoice(err) => err.is_transient(),
            Self::Database(err) => payroll_storage::is_transient(err),
            _ => false,
        }
    }
}
