use std::collections::HashSet;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;
use sqlx::{Sqlite, Transaction};
use thiserror::Error;
use tracing::{info, warn};

use payroll_core::money::AmountError;
use payroll_core::replicate::{self, ReplicationError, ReplicationItem, ReplicationOutcome};
use payroll_core::types::{OwnerScope, PayrollRecord, Period, PeriodError, SalaryComponents};
use payroll_storage::{Database, NewPayrollRecord, PayrollError};

use crate::retry::{RetryPolicy, Transient};
use crate::roster::rollback;
use crate::router::Clock;
use crate::scope_lock::ScopeLocks;

/// Manual payroll edits and period replication.
#[derive(Clone)]
pub struct PayrollService {
    database: Database,
    locks: ScopeLocks,
    retry: RetryPolicy,
    clock: Clock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayrollInput {
    pub employee_id: String,
    #[serde(flatten)]
    pub period: Period,
    #[serde(flatten)]
    pub components: SalaryComponents,
}

/// Copy request; without `items` the whole source period is carried over.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicationRequest {
    pub source: Period,
    pub target: Period,
    #[serde(default)]
    pub items: Option<Vec<ReplicationItem>>,
}

impl PayrollService {
    pub fn new(database: Database, locks: ScopeLocks, retry: RetryPolicy, clock: Clock) -> Self {
        Self {
            database,
            locks,
            retry,
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub async fn list(
        &self,
        owner: &OwnerScope,
        period: Period,
    ) -> Result<Vec<PayrollRecord>, PayrollServiceError> {
        self.retry
            .run("payroll_list", move || async move {
                Ok::<_, PayrollServiceError>(
                    self.database.payroll().list_for_period(owner, period).await?,
                )
            })
            .await
    }

    pub async fn fetch(
        &self,
        owner: &OwnerScope,
        id: &str,
    ) -> Result<PayrollRecord, PayrollServiceError> {
        let found = self
            .retry
            .run("payroll_fetch", move || async move {
                Ok::<_, PayrollServiceError>(self.database.payroll().fetch(owner, id).await?)
            })
            .await?;
        found.ok_or_else(|| PayrollServiceError::NotFound(id.to_string()))
    }

    /// Creates one record; the employee must exist in the scope and have no
    /// record for the period yet.
    pub async fn create(
        &self,
        owner: &OwnerScope,
        input: PayrollInput,
    ) -> Result<PayrollRecord, PayrollServiceError> {
        let period = input.period.validated()?;
        input.components.validate()?;
        let new_record = NewPayrollRecord {
            employee_id: &input.employee_id,
            period,
            components: &input.components,
        };
        let new_record = &new_record;

        let _guard = self.locks.acquire(owner).await;
        let record = self
            .retry
            .run("payroll_create", move || async move {
                let mut tx = self.database.begin().await?;
                let inserted = self
                    .database
                    .payroll()
                    .insert(&mut tx, owner, new_record.clone(), self.now())
                    .await;
                match inserted {
                    Ok(record) => {
                        tx.commit().await?;
                        Ok(record)
                    }
                    Err(err) => {
                        rollback(tx).await;
                        Err(PayrollServiceError::from(err))
                    }
                }
            })
            .await?;

        info!(stage = "payroll", owner = %owner, record_id = %record.id, period = %period, "payroll record created");
        Ok(record)
    }

    /// Replaces the components of a record; the total is recomputed.
    pub async fn update(
        &self,
        owner: &OwnerScope,
        id: &str,
        components: SalaryComponents,
    ) -> Result<PayrollRecord, PayrollServiceError> {
        components.validate()?;
        let components = &components;

        let _guard = self.locks.acquire(owner).await;
        let updated = self
            .retry
            .run("payroll_update", move || async move {
                let mut tx = self.database.begin().await?;
                let updated = self
                    .database
                    .payroll()
                    .update_components(&mut tx, owner, id, components, self.now())
                    .await;
                match updated {
                    Ok(Some(record)) => {
                        tx.commit().await?;
                        Ok(Some(record))
                    }
                    Ok(None) => {
                        rollback(tx).await;
                        Ok(None)
                    }
                    Err(err) => {
                        rollback(tx).await;
                        Err(PayrollServiceError::from(err))
                    }
                }
            })
            .await?;

        updated.ok_or_else(|| PayrollServiceError::NotFound(id.to_string()))
    }

    pub async fn delete(&self, owner: &OwnerScope, id: &str) -> Result<(), PayrollServiceError> {
        let _guard = self.locks.acquire(owner).await;
        let deleted = self
            .retry
            .run("payroll_delete", move || async move {
                let mut tx = self.database.begin().await?;
                let deleted = self.database.payroll().delete(&mut tx, owner, id).await;
                match deleted {
                    Ok(deleted) => {
                        tx.commit().await?;
                        Ok(deleted)
                    }
                    Err(err) => {
                        rollback(tx).await;
                        Err(PayrollServiceError::from(err))
                    }
                }
            })
            .await?;

        if !deleted {
            return Err(PayrollServiceError::NotFound(id.to_string()));
        }
        info!(stage = "payroll", owner = %owner, record_id = %id, "payroll record deleted");
        Ok(())
    }

    /// Copies records from one period into another as a single all-or-nothing batch.
    ///
    /// Employees that already have a record in the target period, or appear
    /// twice in the batch, are skipped and reported. Any failure while writing
    /// rolls the entire batch back.
    pub async fn replicate(
        &self,
        owner: &OwnerScope,
        request: ReplicationRequest,
    ) -> Result<ReplicationOutcome, PayrollServiceError> {
        let source = request.source.validated()?;
        let target = request.target.validated()?;
        if source == target {
            counter!("payroll_replication_total", "result" => "rejected").increment(1);
            return Err(ReplicationError::SamePeriod(source).into());
        }
        let items = request.items.as_deref();

        let _guard = self.locks.acquire(owner).await;
        let result = self
            .retry
            .run("payroll_replicate", move || {
                self.replicate_once(owner, source, target, items)
            })
            .await;

        match result {
            Ok(outcome) => {
                counter!("payroll_replication_total", "result" => "ok").increment(1);
                counter!("payroll_records_replicated_total").increment(outcome.created as u64);
                info!(
                    stage = "payroll",
                    owner = %owner,
                    source = %source,
                    target = %target,
                    created = outcome.created,
                    skipped = outcome.skipped_count(),
                    "payroll period replicated"
                );
                Ok(outcome)
            }
            Err(err) => {
                counter!("payroll_replication_total", "result" => "failed").increment(1);
                warn!(
                    stage = "payroll",
                    owner = %owner,
                    source = %source,
                    target = %target,
                    error = %err,
                    "payroll replication rolled back"
                );
                Err(err)
            }
        }
    }

    async fn replicate_once(
        &self,
        owner: &OwnerScope,
        source: Period,
        target: Period,
        items: Option<&[ReplicationItem]>,
    ) -> Result<ReplicationOutcome, PayrollServiceError> {
        let mut tx = self.database.begin().await?;
        let result = self.replicate_in(&mut tx, owner, source, target, items).await;
        match result {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                rollback(tx).await;
                Err(err)
            }
        }
    }

    async fn replicate_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        owner: &OwnerScope,
        source: Period,
        target: Period,
        items: Option<&[ReplicationItem]>,
    ) -> Result<ReplicationOutcome, PayrollServiceError> {
        let payroll = self.database.payroll();
        let loaded;
        let items = match items {
            Some(items) => items,
            None => {
                loaded = payroll
                    .list_for_period_in(tx, owner, source)
                    .await?
                    .iter()
                    .map(ReplicationItem::from)
                    .collect::<Vec<_>>();
                &loaded
            }
        };

        let existing: HashSet<String> = payroll.employee_ids_in_period_in(tx, owner, target).await?;
        let stage = replicate::stage(source, target, items, &existing)?;
        let created = payroll
            .insert_batch(tx, owner, &stage.pending, self.now())
            .await?;

        Ok(ReplicationOutcome {
            created: created.len(),
            skipped: stage.skipped,
            created_ids: created.into_iter().map(|record| record.id).collect(),
        })
    }
}

#[derive(Debug, Error)]
pub enum PayrollServiceError {
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),
    #[error("invalid period: {0}")]
    InvalidPeriod(#[from] PeriodError),
    #[error("{0}")]
    Replication(#[from] ReplicationError),
    #[error("employee {0} does not exist in this scope")]
    MissingEmployee(String),
    #[error("employee {employee_id} already has a record for {period}")]
    DuplicatePeriod { employee_id: String, period: Period },
    #[error("payroll record {0} not found")]
    NotFound(String),
    #[error("payroll storage error: {0}")]
    Storage(PayrollError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<PayrollError> for PayrollServiceError {
    fn from(err: PayrollError) -> Self {
        match err {
            PayrollError::MissingEmployee(employee_id) => Self::MissingEmployee(employee_id),
            PayrollError::InvalidAmount(err) => Self::InvalidAmount(err),
            PayrollError::DuplicatePeriod {
                employee_id,
                period,
            } => Self::DuplicatePeriod {
                employee_id,
                period,
            },
            other => Self::Storage(other),
        }
    }
}

impl Transient for PayrollServiceError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_transient(),
            Self::Database(err) => payroll_storage::is_transient(err),
            _ => false,
        }
    }
}
