use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, Transaction};
use thiserror::Error;
use tracing::{info, warn};

use payroll_core::reconcile::{self, PlanSummary, ReconciliationOutcome};
use payroll_core::roster_csv::{ExportError, ParseError, RosterCsv, RowError};
use payroll_core::types::{EmployeeProfile, EmployeeRecord, OwnerScope, ProfileError};
use payroll_storage::{AppliedPlan, Database, EmployeeError};

use crate::retry::{RetryPolicy, Transient};
use crate::router::Clock;
use crate::scope_lock::ScopeLocks;

/// Roster import/export plus the manual employee edit path.
#[derive(Clone)]
pub struct RosterService {
    database: Database,
    locks: ScopeLocks,
    retry: RetryPolicy,
    clock: Clock,
    csv: RosterCsv,
}

/// Body of a manual create or edit.
#[derive(Debug, Clone, Deserialize)]
pub struct EmployeeInput {
    #[serde(flatten)]
    pub profile: EmployeeProfile,
    #[serde(default)]
    pub active: Option<bool>,
}

/// Dry-run answer for `roster/plan`.
#[derive(Debug, Clone, Serialize)]
pub struct PlanPreview {
    #[serde(flatten)]
    pub plan: PlanSummary,
    pub row_errors: Vec<RowError>,
}

impl RosterService {
    pub fn new(
        database: Database,
        locks: ScopeLocks,
        retry: RetryPolicy,
        clock: Clock,
        csv: RosterCsv,
    ) -> Self {
        Self {
            database,
            locks,
            retry,
            clock,
            csv,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Parses `input`, reconciles it against the persisted roster and commits
    /// the result as one transaction.
    ///
    /// Structural problems abort before anything is read; bad rows are left
    /// out and reported in the outcome.
    pub async fn import(
        &self,
        owner: &OwnerScope,
        input: &[u8],
    ) -> Result<ReconciliationOutcome, RosterError> {
        let parsed = match self.csv.parse(input) {
            Ok(parsed) => parsed,
            Err(err) => {
                counter!("roster_import_total", "result" => "rejected").increment(1);
                warn!(stage = "roster", owner = %owner, error = %err, "roster import rejected");
                return Err(RosterError::Parse(err));
            }
        };
        let candidates = &parsed.profiles();

        let _guard = self.locks.acquire(owner).await;
        let result = self
            .retry
            .run("roster_import", move || self.reconcile_once(owner, candidates))
            .await;

        let (unchanged, applied) = match result {
            Ok(done) => done,
            Err(err) => {
                counter!("roster_import_total", "result" => "failed").increment(1);
                warn!(stage = "roster", owner = %owner, error = %err, "roster import rolled back");
                return Err(err);
            }
        };

        let outcome = ReconciliationOutcome {
            inserted: applied.inserted,
            updated: applied.updated,
            deleted: applied.deleted,
            unchanged,
            skipped_deletions: applied
                .skipped_deletions
                .into_iter()
                .map(|delete| delete.government_id)
                .collect(),
            row_errors: parsed.errors,
        };

        counter!("roster_import_total", "result" => "ok").increment(1);
        record_row_metrics(&outcome);
        info!(
            stage = "roster",
            owner = %owner,
            inserted = outcome.inserted,
            updated = outcome.updated,
            deleted = outcome.deleted,
            unchanged = outcome.unchanged,
            skipped_deletions = outcome.skipped_deletions.len(),
            row_errors = outcome.row_errors.len(),
            "roster import committed"
        );
        Ok(outcome)
    }

    async fn reconcile_once(
        &self,
        owner: &OwnerScope,
        candidates: &[EmployeeProfile],
    ) -> Result<(usize, AppliedPlan), RosterError> {
        let mut tx = self.database.begin().await?;
        match self.reconcile_in(&mut tx, owner, candidates).await {
            Ok(done) => {
                tx.commit().await?;
                Ok(done)
            }
            Err(err) => {
                rollback(tx).await;
                Err(err)
            }
        }
    }

    async fn reconcile_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        owner: &OwnerScope,
        candidates: &[EmployeeProfile],
    ) -> Result<(usize, AppliedPlan), RosterError> {
        let employees = self.database.employees();
        let persisted = employees.list_in(tx, owner).await?;
        let referenced = employees.referenced_ids_in(tx, owner).await?;
        let plan = reconcile::plan(owner, &persisted, &referenced, candidates);
        let applied = employees.apply_plan(tx, owner, &plan, self.now()).await?;
        Ok((plan.unchanged, applied))
    }

    /// Computes what an import would do without writing anything.
    pub async fn plan(&self, owner: &OwnerScope, input: &[u8]) -> Result<PlanPreview, RosterError> {
        let parsed = self.csv.parse(input)?;
        let candidates = &parsed.profiles();

        let summary = self
            .retry
            .run("roster_plan", move || async move {
                let mut tx = self.database.begin().await?;
                let employees = self.database.employees();
                let snapshot = async {
                    let persisted = employees.list_in(&mut tx, owner).await?;
                    let referenced = employees.referenced_ids_in(&mut tx, owner).await?;
                    Ok::<_, RosterError>((persisted, referenced))
                }
                .await;
                rollback(tx).await;
                let (persisted, referenced) = snapshot?;
                Ok::<_, RosterError>(reconcile::plan(owner, &persisted, &referenced, candidates).summary())
            })
            .await?;

        Ok(PlanPreview {
            plan: summary,
            row_errors: parsed.errors,
        })
    }

    /// Serializes the roster with every column, ordered by name then government id.
    pub async fn export(&self, owner: &OwnerScope) -> Result<String, RosterError> {
        let employees = self
            .retry
            .run("roster_export", move || async move {
                Ok::<_, RosterError>(self.database.employees().list(owner).await?)
            })
            .await?;
        let text = self.csv.export(&employees)?;
        info!(stage = "roster", owner = %owner, rows = employees.len(), "roster exported");
        Ok(text)
    }

    pub async fn list(&self, owner: &OwnerScope) -> Result<Vec<EmployeeRecord>, RosterError> {
        self.retry
            .run("employee_list", move || async move {
                Ok::<_, RosterError>(self.database.employees().list(owner).await?)
            })
            .await
    }

    pub async fn fetch(&self, owner: &OwnerScope, id: &str) -> Result<EmployeeRecord, RosterError> {
        let found = self
            .retry
            .run("employee_fetch", move || async move {
                Ok::<_, RosterError>(self.database.employees().fetch(owner, id).await?)
            })
            .await?;
        found.ok_or_else(|| RosterError::NotFound(id.to_string()))
    }

    pub async fn create(
        &self,
        owner: &OwnerScope,
        input: EmployeeInput,
    ) -> Result<EmployeeRecord, RosterError> {
        let profile = &normalize(input.profile)?;
        let active = input.active.unwrap_or(true);

        let _guard = self.locks.acquire(owner).await;
        let record = self
            .retry
            .run("employee_create", move || async move {
                let mut tx = self.database.begin().await?;
                let inserted = self
                    .database
                    .employees()
                    .insert(&mut tx, owner, profile, active, self.now())
                    .await;
                match inserted {
                    Ok(record) => {
                        tx.commit().await?;
                        Ok(record)
                    }
                    Err(err) => {
                        rollback(tx).await;
                        Err(RosterError::from(err))
                    }
                }
            })
            .await?;

        info!(stage = "roster", owner = %owner, employee_id = %record.id, "employee created");
        Ok(record)
    }

    pub async fn update(
        &self,
        owner: &OwnerScope,
        id: &str,
        input: EmployeeInput,
    ) -> Result<EmployeeRecord, RosterError> {
        let profile = normalize(input.profile)?;
        let _guard = self.locks.acquire(owner).await;
        let record = self.update_locked(owner, id, &profile, input.active).await?;
        info!(stage = "roster", owner = %owner, employee_id = %id, "employee updated");
        Ok(record)
    }

    async fn update_locked(
        &self,
        owner: &OwnerScope,
        id: &str,
        profile: &EmployeeProfile,
        active: Option<bool>,
    ) -> Result<EmployeeRecord, RosterError> {
        let replaced = self
            .retry
            .run("employee_update", move || async move {
                let mut tx = self.database.begin().await?;
                let replaced = self
                    .database
                    .employees()
                    .replace(&mut tx, owner, id, profile, active, self.now())
                    .await;
                match replaced {
                    Ok(true) => {
                        tx.commit().await?;
                        Ok(true)
                    }
                    Ok(false) => {
                        rollback(tx).await;
                        Ok(false)
                    }
                    Err(err) => {
                        rollback(tx).await;
                        Err(RosterError::from(err))
                    }
                }
            })
            .await?;

        if !replaced {
            return Err(RosterError::NotFound(id.to_string()));
        }
        self.fetch(owner, id).await
    }

    /// Deletes an employee that no payroll record points at.
    pub async fn delete(&self, owner: &OwnerScope, id: &str) -> Result<(), RosterError> {
        let _guard = self.locks.acquire(owner).await;
        self.retry
            .run("employee_delete", move || async move {
                let mut tx = self.database.begin().await?;
                let result = self.delete_in(&mut tx, owner, id).await;
                match result {
                    Ok(()) => {
                        tx.commit().await?;
                        Ok(())
                    }
                    Err(err) => {
                        rollback(tx).await;
                        Err(err)
                    }
                }
            })
            .await?;
        info!(stage = "roster", owner = %owner, employee_id = %id, "employee deleted");
        Ok(())
    }

    async fn delete_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        owner: &OwnerScope,
        id: &str,
    ) -> Result<(), RosterError> {
        let employees = self.database.employees();
        let references = employees.reference_count_in(tx, owner, id).await?;
        if references > 0 {
            return Err(RosterError::Referenced {
                id: id.to_string(),
                references,
            });
        }
        if employees.delete_unreferenced(tx, owner, id).await? {
            Ok(())
        } else {
            Err(RosterError::NotFound(id.to_string()))
        }
    }
}

fn normalize(profile: EmployeeProfile) -> Result<EmployeeProfile, RosterError> {
    let profile = profile.normalized();
    profile.validate()?;
    Ok(profile)
}

fn record_row_metrics(outcome: &ReconciliationOutcome) {
    let rows = [
        ("insert", outcome.inserted),
        ("update", outcome.updated),
        ("delete", outcome.deleted),
        ("unchanged", outcome.unchanged),
        ("skipped_delete", outcome.skipped_deletions.len()),
        ("error", outcome.row_errors.len()),
    ];
    for (action, count) in rows {
        if count > 0 {
            counter!("roster_rows_total", "action" => action).increment(count as u64);
        }
    }
}

pub(crate) async fn rollback(tx: Transaction<'static, Sqlite>) {
    if let Err(err) = tx.rollback().await {
        warn!(stage = "storage", error = %err, "transaction rollback failed");
    }
}

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("roster file rejected: {0}")]
    Parse(#[from] ParseError),
    #[error("invalid employee: {0}")]
    Invalid(#[from] ProfileError),
    #[error("employee {0} not found")]
    NotFound(String),
    #[error("government id {0} already exists in this scope")]
    DuplicateGovernmentId(String),
    #[error("employee {id} is referenced by {references} payroll record(s)")]
    Referenced { id: String, references: u64 },
    #[error("failed to write roster export: {0}")]
    Export(#[from] ExportError),
    #[error("employee storage error: {0}")]
    Storage(EmployeeError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<EmployeeError> for RosterError {
    fn from(err: EmployeeError) -> Self {
        match err {
            EmployeeError::DuplicateGovernmentId(government_id) => {
                Self::DuplicateGovernmentId(government_id)
            }
            other => Self::Storage(other),
        }
    }
}

impl Transient for RosterError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_transient(),
            Self::Database(err) => payroll_storage::is_transient(err),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{owner, roster_csv, service_context};

    #[tokio::test]
    async fn import_then_export_round_trips_without_changes() {
        let ctx = service_context().await;
        let acme = owner("acme");
        let input = roster_csv(&[
            "Budi Santoso,3201,Engineer,FULL_TIME,\"Jl. Merdeka 1, Bandung\",0812,budi@example.com,M,1990-04-12,Bandung,2020-01-06,S1,Islam,BCA,1234567890",
            "Sari Dewi,3202,Analyst,Contract,,,,,,,,,,,",
        ]);

        let first = ctx.roster.import(&acme, input.as_bytes()).await.expect("import");
        assert_eq!(first.inserted, 2);
        assert!(first.row_errors.is_empty());

        let exported = ctx.roster.export(&acme).await.expect("export");
        let second = ctx.roster.import(&acme, exported.as_bytes()).await.expect("re-import");
        assert_eq!(
            (second.inserted, second.updated, second.deleted, second.unchanged),
            (0, 0, 0, 2)
        );
    }

    #[tokio::test]
    async fn bad_rows_are_reported_and_good_rows_applied() {
        let ctx = service_context().await;
        let acme = owner("acme");
        let input = roster_csv(&[
            "Budi,3201,Engineer,FULL_TIME,,,,,,,,,,,",
            "Nobody,,Engineer,FULL_TIME,,,,,,,,,,,",
            "Sari,3202,Analyst,PROBATION,,,,,not-a-date,,,,,,",
        ]);

        let outcome = ctx.roster.import(&acme, input.as_bytes()).await.expect("import");
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.row_errors.len(), 2);
        assert_eq!(outcome.row_errors[0].row, 2);
        assert_eq!(outcome.row_errors[1].row, 3);
    }

    #[tokio::test]
    async fn structural_failure_leaves_roster_untouched() {
        let ctx = service_context().await;
        let acme = owner("acme");
        ctx.roster
            .import(&acme, roster_csv(&["Budi,3201,Engineer,FULL_TIME,,,,,,,,,,,"]).as_bytes())
            .await
            .expect("seed");

        let err = ctx
            .roster
            .import(&acme, b"name,position\nBudi,Engineer\n")
            .await
            .unwrap_err();
        assert!(matches!(err, RosterError::Parse(ParseError::MissingColumns(_))));
        assert_eq!(ctx.roster.list(&acme).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn plan_does_not_write() {
        let ctx = service_context().await;
        let acme = owner("acme");
        let preview = ctx
            .roster
            .plan(&acme, roster_csv(&["Budi,3201,Engineer,FULL_TIME,,,,,,,,,,,"]).as_bytes())
            .await
            .expect("plan");

        assert_eq!(preview.plan.insert, vec!["3201".to_string()]);
        assert!(ctx.roster.list(&acme).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn manual_edit_preserves_active_flag_and_normalizes() {
        let ctx = service_context().await;
        let acme = owner("acme");
        let created = ctx
            .roster
            .create(
                &acme,
                serde_json::from_value(serde_json::json!({
                    "name": "  Budi ",
                    "government_id": "3201",
                    "position": "Engineer",
                    "status": "FULL_TIME",
                    "email": "   ",
                    "active": false
                }))
                .expect("input"),
            )
            .await
            .expect("create");
        assert_eq!(created.profile.name, "Budi");
        assert_eq!(created.profile.email, None);
        assert!(!created.active);
        let stored = ctx.roster.fetch(&acme, &created.id).await.expect("fetch");
        assert!(!stored.active);
        assert_eq!(stored.created_at, stored.updated_at);

        let mut profile = created.profile.clone();
        profile.position = "Lead".into();
        let updated = ctx
            .roster
            .update(&acme, &created.id, EmployeeInput { profile, active: None })
            .await
            .expect("update");
        assert_eq!(updated.profile.position, "Lead");
        assert!(!updated.active);
    }

    #[tokio::test]
    async fn duplicate_government_id_is_a_conflict() {
        let ctx = service_context().await;
        let acme = owner("acme");
        let input = || EmployeeInput {
            profile: crate::test_support::profile("3201", "Budi"),
            active: None,
        };
        ctx.roster.create(&acme, input()).await.expect("first");
        let err = ctx.roster.create(&acme, input()).await.unwrap_err();
        assert!(matches!(err, RosterError::DuplicateGovernmentId(id) if id == "3201"));
    }

    #[tokio::test]
    async fn unknown_employee_delete_is_not_found() {
        let ctx = service_context().await;
        let err = ctx.roster.delete(&owner("acme"), "missing").await.unwrap_err();
        assert!(matches!(err, RosterError::NotFound(_)));
    }
}
