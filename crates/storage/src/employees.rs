use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use uuid::Uuid;

use payroll_core::reconcile::{PlannedDelete, ReconciliationPlan};
use payroll_core::types::{EmployeeProfile, EmployeeRecord, EmploymentStatus, OwnerScope};

use crate::{is_transient, is_unique_violation, to_rfc3339};

const SELECT_EMPLOYEE: &str = "SELECT id, owner_id, name, government_id, position, status, address, phone, email, gender, \
     date_of_birth, birth_place, joined_date, last_education, religion, bank, bank_account_number, \
     active, created_at, updated_at FROM employees";

/// Repository for the employee roster.
#[derive(Clone)]
pub struct EmployeeRepository {
    pool: SqlitePool,
}

impl EmployeeRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Lists the roster of one scope ordered by name, then government id.
    pub async fn list(&self, owner: &OwnerScope) -> Result<Vec<EmployeeRecord>, EmployeeError> {
        select_roster(&self.pool, owner).await
    }

    /// Same as [`EmployeeRepository::list`] but reads through an open transaction.
    pub async fn list_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        owner: &OwnerScope,
    ) -> Result<Vec<EmployeeRecord>, EmployeeError> {
        select_roster(&mut **tx, owner).await
    }

    pub async fn fetch(
        &self,
        owner: &OwnerScope,
        id: &str,
    ) -> Result<Option<EmployeeRecord>, EmployeeError> {
        let sql = format!("{SELECT_EMPLOYEE} WHERE owner_id = ? AND id = ?");
        let row = sqlx::query_as::<_, EmployeeRow>(&sql)
            .bind(owner.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(EmployeeRow::into_domain).transpose()
    }

    /// Ids of employees in the scope that at least one payroll record points at.
    pub async fn referenced_ids_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        owner: &OwnerScope,
    ) -> Result<HashSet<String>, EmployeeError> {
        let rows = sqlx::query("SELECT DISTINCT employee_id FROM payroll_records WHERE owner_id = ?")
            .bind(owner.as_str())
            .fetch_all(&mut **tx)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("employee_id"))
            .collect())
    }

    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        owner: &OwnerScope,
        profile: &EmployeeProfile,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<EmployeeRecord, EmployeeError> {
        let id = Uuid::new_v4().to_string();
        let timestamp = to_rfc3339(now);
        sqlx::query(
            "INSERT INTO employees \
             (id, owner_id, name, government_id, position, status, address, phone, email, gender, \
              date_of_birth, birth_place, joined_date, last_education, religion, bank, bank_account_number, \
              active, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(owner.as_str())
        .bind(&profile.name)
        .bind(&profile.government_id)
        .bind(&profile.position)
        .bind(profile.status.as_str())
        .bind(&profile.address)
        .bind(&profile.phone)
        .bind(&profile.email)
        .bind(&profile.gender)
        .bind(profile.date_of_birth)
        .bind(&profile.birth_place)
        .bind(profile.joined_date)
        .bind(&profile.last_education)
        .bind(&profile.religion)
        .bind(&profile.bank)
        .bind(profile.bank_account_number)
        .bind(i64::from(active))
        .bind(&timestamp)
        .bind(&timestamp)
        .execute(&mut **tx)
        .await
        .map_err(|err| map_write_error(err, &profile.government_id))?;

        Ok(EmployeeRecord {
            id,
            owner: owner.clone(),
            profile: profile.clone(),
            active,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replaces every profile field of an employee; `active` is left as is when `None`.
    ///
    /// Returns `false` when no employee with that id exists in the scope.
    pub async fn replace(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        owner: &OwnerScope,
        id: &str,
        profile: &EmployeeProfile,
        active: Option<bool>,
        now: DateTime<Utc>,
    ) -> Result<bool, EmployeeError> {
        let result = sqlx::query(
            "UPDATE employees SET \
             name = ?, government_id = ?, position = ?, status = ?, address = ?, phone = ?, email = ?, \
             gender = ?, date_of_birth = ?, birth_place = ?, joined_date = ?, last_education = ?, \
             religion = ?, bank = ?, bank_account_number = ?, active = COALESCE(?, active), updated_at = ? \
             WHERE owner_id = ? AND id = ?",
        )
        .bind(&profile.name)
        .bind(&profile.government_id)
        .bind(&profile.position)
        .bind(profile.status.as_str())
        .bind(&profile.address)
        .bind(&profile.phone)
        .bind(&profile.email)
        .bind(&profile.gender)
        .bind(profile.date_of_birth)
        .bind(&profile.birth_place)
        .bind(profile.joined_date)
        .bind(&profile.last_education)
        .bind(&profile.religion)
        .bind(&profile.bank)
        .bind(profile.bank_account_number)
        .bind(active.map(i64::from))
        .bind(to_rfc3339(now))
        .bind(owner.as_str())
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(|err| map_write_error(err, &profile.government_id))?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes the employee only if no payroll record references it.
    ///
    /// Returns `false` when the employee is referenced or does not exist.
    pub async fn delete_unreferenced(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        owner: &OwnerScope,
        id: &str,
    ) -> Result<bool, EmployeeError> {
        let result = sqlx::query(
            "DELETE FROM employees \
             WHERE owner_id = ? AND id = ? \
               AND NOT EXISTS (SELECT 1 FROM payroll_records WHERE payroll_records.employee_id = employees.id)",
        )
        .bind(owner.as_str())
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Counts payroll records pointing at an employee.
    pub async fn reference_count_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        owner: &OwnerScope,
        id: &str,
    ) -> Result<u64, EmployeeError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS references_count FROM payroll_records WHERE owner_id = ? AND employee_id = ?",
        )
        .bind(owner.as_str())
        .bind(id)
        .fetch_one(&mut **tx)
        .await?;
        let count: i64 = row.get("references_count");
        Ok(count as u64)
    }

    /// Applies a reconciliation plan inside the caller's transaction.
    ///
    /// Deletes re-check references, so an employee that gained a payroll
    /// record after planning is reported as skipped instead of removed. The
    /// caller commits or drops the transaction; nothing here is visible before that.
    pub async fn apply_plan(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        owner: &OwnerScope,
        plan: &ReconciliationPlan,
        now: DateTime<Utc>,
    ) -> Result<AppliedPlan, EmployeeError> {
        let mut applied = AppliedPlan {
            skipped_deletions: plan.skipped_deletions.clone(),
            ..AppliedPlan::default()
        };

        for delete in &plan.to_delete {
            if self.delete_unreferenced(tx, owner, &delete.employee_id).await? {
                applied.deleted += 1;
            } else {
                applied.skipped_deletions.push(delete.clone());
            }
        }

        for update in &plan.to_update {
            if self
                .replace(tx, owner, &update.employee_id, &update.profile, None, now)
                .await?
            {
                applied.updated += 1;
            } else {
                return Err(EmployeeError::Vanished(update.employee_id.clone()));
            }
        }

        for profile in &plan.to_insert {
            self.insert(tx, owner, profile, true, now).await?;
            applied.inserted += 1;
        }

        Ok(applied)
    }
}

/// Counts of what [`EmployeeRepository::apply_plan`] actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedPlan {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped_deletions: Vec<PlannedDelete>,
}

async fn select_roster<'e, E>(
    executor: E,
    owner: &OwnerScope,
) -> Result<Vec<EmployeeRecord>, EmployeeError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!("{SELECT_EMPLOYEE} WHERE owner_id = ? ORDER BY name, government_id");
    let rows = sqlx::query_as::<_, EmployeeRow>(&sql)
        .bind(owner.as_str())
        .fetch_all(executor)
        .await?;
    rows.into_iter().map(EmployeeRow::into_domain).collect()
}

fn map_write_error(err: sqlx::Error, government_id: &str) -> EmployeeError {
    if is_unique_violation(&err) {
        EmployeeError::DuplicateGovernmentId(government_id.to_string())
    } else {
        EmployeeError::Database(err)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EmployeeRow {
    id: String,
    owner_id: String,
    name: String,
    government_id: String,
    position: String,
    status: String,
    address: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    gender: Option<String>,
    date_of_birth: Option<NaiveDate>,
    birth_place: Option<String>,
    joined_date: Option<NaiveDate>,
    last_education: Option<String>,
    religion: Option<String>,
    bank: Option<String>,
    bank_account_number: Option<i64>,
    active: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EmployeeRow {
    fn into_domain(self) -> Result<EmployeeRecord, EmployeeError> {
        let status = EmploymentStatus::parse(&self.status)
            .ok_or_else(|| EmployeeError::Corrupt(format!("unknown status '{}'", self.status)))?;
        let owner = OwnerScope::parse(&self.owner_id)
            .map_err(|err| EmployeeError::Corrupt(err.to_string()))?;

        Ok(EmployeeRecord {
            id: self.id,
            owner,
            profile: EmployeeProfile {
                name: self.name,
                government_id: self.government_id,
                position: self.position,
                status,
                address: self.address,
                phone: self.phone,
                email: self.email,
                gender: self.gender,
                date_of_birth: self.date_of_birth,
                birth_place: self.birth_place,
                joined_date: self.joined_date,
                last_education: self.last_education,
                religion: self.religion,
                bank: self.bank,
                bank_account_number: self.bank_account_number,
            },
            active: self.active != 0,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors raised by the employee repository.
#[derive(Debug, Error)]
pub enum EmployeeError {
    #[error("government id {0} is already used in this scope")]
    DuplicateGovernmentId(String),
    #[error("employee {0} disappeared while the roster was being updated")]
    Vanished(String),
    #[error("stored employee row is corrupt: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EmployeeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(err) if is_transient(err))
    }
}
