use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use uuid::Uuid;

use payroll_core::money::AmountError;
use payroll_core::replicate::StagedRecord;
use payroll_core::types::{Month, OwnerScope, PayrollRecord, Period, SalaryComponents};

use crate::{
    is_foreign_key_violation, is_transient, is_unique_violation, parse_decimal, to_rfc3339,
};

const SELECT_PAYROLL: &str = "SELECT id, owner_id, employee_id, month, year, basic, position_allowance, \
     family_allowance, child_allowance, food_allowance, bonus, thr, others, total, created_at, updated_at \
     FROM payroll_records";

/// Input for a new salary record. There is no total: it is always derived from the components.
#[derive(Debug, Clone)]
pub struct NewPayrollRecord<'a> {
    pub employee_id: &'a str,
    pub period: Period,
    pub components: &'a SalaryComponents,
}

/// Repository for salary records.
#[derive(Clone)]
pub struct PayrollRepository {
    pool: SqlitePool,
}

impl PayrollRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Lists the records of one period ordered by creation.
    pub async fn list_for_period(
        &self,
        owner: &OwnerScope,
        period: Period,
    ) -> Result<Vec<PayrollRecord>, PayrollError> {
        select_period(&self.pool, owner, period).await
    }

    pub async fn list_for_period_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        owner: &OwnerScope,
        period: Period,
    ) -> Result<Vec<PayrollRecord>, PayrollError> {
        select_period(&mut **tx, owner, period).await
    }

    pub async fn fetch(
        &self,
        owner: &OwnerScope,
        id: &str,
    ) -> Result<Option<PayrollRecord>, PayrollError> {
        let sql = format!("{SELECT_PAYROLL} WHERE owner_id = ? AND id = ?");
        let row = sqlx::query_as::<_, PayrollRow>(&sql)
            .bind(owner.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PayrollRow::into_domain).transpose()
    }

    /// Employee ids that already have a record in the period.
    pub async fn employee_ids_in_period_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        owner: &OwnerScope,
        period: Period,
    ) -> Result<HashSet<String>, PayrollError> {
        let rows = sqlx::query(
            "SELECT employee_id FROM payroll_records WHERE owner_id = ? AND month = ? AND year = ?",
        )
        .bind(owner.as_str())
        .bind(period.month.as_str())
        .bind(period.year)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("employee_id"))
            .collect())
    }

    /// Inserts one record after checking that the employee exists in the scope.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        owner: &OwnerScope,
        record: NewPayrollRecord<'_>,
        now: DateTime<Utc>,
    ) -> Result<PayrollRecord, PayrollError> {
        let employee = sqlx::query("SELECT 1 FROM employees WHERE owner_id = ? AND id = ?")
            .bind(owner.as_str())
            .bind(record.employee_id)
            .fetch_optional(&mut **tx)
            .await?;
        if employee.is_none() {
            return Err(PayrollError::MissingEmployee(record.employee_id.to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let total = record.components.total()?;
        let timestamp = to_rfc3339(now);
        let components = record.components;
        sqlx::query(
            "INSERT INTO payroll_records \
             (id, owner_id, employee_id, month, year, basic, position_allowance, family_allowance, \
              child_allowance, food_allowance, bonus, thr, others, total, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(owner.as_str())
        .bind(record.employee_id)
        .bind(record.period.month.as_str())
        .bind(record.period.year)
        .bind(components.basic.to_string())
        .bind(components.position_allowance.to_string())
        .bind(components.family_allowance.to_string())
        .bind(components.child_allowance.to_string())
        .bind(components.food_allowance.to_string())
        .bind(components.bonus.to_string())
        .bind(components.thr.to_string())
        .bind(components.others.to_string())
        .bind(total.to_string())
        .bind(&timestamp)
        .bind(&timestamp)
        .execute(&mut **tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                PayrollError::DuplicatePeriod {
                    employee_id: record.employee_id.to_string(),
                    period: record.period,
                }
            } else if is_foreign_key_violation(&err) {
                PayrollError::MissingEmployee(record.employee_id.to_string())
            } else {
                PayrollError::Database(err)
            }
        })?;

        Ok(PayrollRecord {
            id,
            owner: owner.clone(),
            employee_id: record.employee_id.to_string(),
            period: record.period,
            components: components.clone(),
            total,
            created_at: now,
            updated_at: now,
        })
    }

    /// Inserts a staged replication batch. The first failure aborts the loop;
    /// the caller rolls the transaction back so none of the batch becomes visible.
    pub async fn insert_batch(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        owner: &OwnerScope,
        staged: &[StagedRecord],
        now: DateTime<Utc>,
    ) -> Result<Vec<PayrollRecord>, PayrollError> {
        let mut created = Vec::with_capacity(staged.len());
        for record in staged {
            let inserted = self
                .insert(
                    tx,
                    owner,
                    NewPayrollRecord {
                        employee_id: &record.employee_id,
                        period: record.period,
                        components: &record.components,
                    },
                    now,
                )
                .await?;
            created.push(inserted);
        }
        Ok(created)
    }

    /// Replaces the components of a record and recomputes its total.
    pub async fn update_components(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        owner: &OwnerScope,
        id: &str,
        components: &SalaryComponents,
        now: DateTime<Utc>,
    ) -> Result<Option<PayrollRecord>, PayrollError> {
        let total = components.total()?;
        let result = sqlx::query(
            "UPDATE payroll_records SET \
             basic = ?, position_allowance = ?, family_allowance = ?, child_allowance = ?, \
             food_allowance = ?, bonus = ?, thr = ?, others = ?, total = ?, updated_at = ? \
             WHERE owner_id = ? AND id = ?",
        )
        .bind(components.basic.to_string())
        .bind(components.position_allowance.to_string())
        .bind(components.family_allowance.to_string())
        .bind(components.child_allowance.to_string())
        .bind(components.food_allowance.to_string())
        .bind(components.bonus.to_string())
        .bind(components.thr.to_string())
        .bind(components.others.to_string())
        .bind(total.to_string())
        .bind(to_rfc3339(now))
        .bind(owner.as_str())
        .bind(id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let sql = format!("{SELECT_PAYROLL} WHERE owner_id = ? AND id = ?");
        let row = sqlx::query_as::<_, PayrollRow>(&sql)
            .bind(owner.as_str())
            .bind(id)
            .fetch_one(&mut **tx)
            .await?;
        row.into_domain().map(Some)
    }

    pub async fn delete(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        owner: &OwnerScope,
        id: &str,
    ) -> Result<bool, PayrollError> {
        let result = sqlx::query("DELETE FROM payroll_records WHERE owner_id = ? AND id = ?")
            .bind(owner.as_str())
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

async fn select_period<'e, E>(
    executor: E,
    owner: &OwnerScope,
    period: Period,
) -> Result<Vec<PayrollRecord>, PayrollError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!("{SELECT_PAYROLL} WHERE owner_id = ? AND month = ? AND year = ? ORDER BY created_at, id");
    let rows = sqlx::query_as::<_, PayrollRow>(&sql)
        .bind(owner.as_str())
        .bind(period.month.as_str())
        .bind(period.year)
        .fetch_all(executor)
        .await?;
    rows.into_iter().map(PayrollRow::into_domain).collect()
}

#[derive(Debug, sqlx::FromRow)]
struct PayrollRow {
    id: String,
    owner_id: String,
    employee_id: String,
    month: String,
    year: i64,
    basic: String,
    position_allowance: String,
    family_allowance: String,
    child_allowance: String,
    food_allowance: String,
    bonus: String,
    thr: String,
    others: String,
    total: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PayrollRow {
    fn into_domain(self) -> Result<PayrollRecord, PayrollError> {
        let owner =
            OwnerScope::parse(&self.owner_id).map_err(|err| PayrollError::Corrupt(err.to_string()))?;
        let month: Month = self
            .month
            .parse()
            .map_err(|err: payroll_core::types::PeriodError| PayrollError::Corrupt(err.to_string()))?;
        let year = i32::try_from(self.year)
            .map_err(|_| PayrollError::Corrupt(format!("year {} out of range", self.year)))?;
        let period = Period::new(month, year).map_err(|err| PayrollError::Corrupt(err.to_string()))?;

        let amount = |column: &str, value: &str| parse_decimal(column, value).map_err(PayrollError::Corrupt);
        let components = SalaryComponents {
            basic: amount("basic", &self.basic)?,
            position_allowance: amount("position_allowance", &self.position_allowance)?,
            family_allowance: amount("family_allowance", &self.family_allowance)?,
            child_allowance: amount("child_allowance", &self.child_allowance)?,
            food_allowance: amount("food_allowance", &self.food_allowance)?,
            bonus: amount("bonus", &self.bonus)?,
            thr: amount("thr", &self.thr)?,
            others: amount("others", &self.others)?,
        };
        let total = amount("total", &self.total)?;

        Ok(PayrollRecord {
            id: self.id,
            owner,
            employee_id: self.employee_id,
            period,
            components,
            total,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors raised by the payroll repository.
#[derive(Debug, Error)]
pub enum PayrollError {
    #[error("employee {0} does not exist in this scope")]
    MissingEmployee(String),
    #[error("employee {employee_id} already has a record for {period}")]
    DuplicatePeriod { employee_id: String, period: Period },
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),
    #[error("stored payroll row is corrupt: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl PayrollError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(err) if is_transient(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    use payroll_core::replicate::{stage, ReplicationItem};
    use rust_decimal::Decimal;

    use crate::test_support::{owner, profile, seed_employee, setup_db};

    fn components(basic: &str) -> SalaryComponents {
        SalaryComponents {
            basic: Decimal::from_str(basic).unwrap(),
            position_allowance: Decimal::from_str("150000.50").unwrap(),
            thr: Decimal::from_str("0.25").unwrap(),
            ..SalaryComponents::default()
        }
    }

    fn period(month: Month) -> Period {
        Period::new(month, 2025).unwrap()
    }

    #[tokio::test]
    async fn insert_recomputes_total_and_reads_back() {
        let db = setup_db().await;
        let acme = owner("acme");
        let employee_id = seed_employee(&db, &acme, profile("1", "Ana")).await;
        let repo = db.payroll();

        let mut tx = db.begin().await.unwrap();
        let created = repo
            .insert(
                &mut tx,
                &acme,
                NewPayrollRecord {
                    employee_id: &employee_id,
                    period: period(Month::January),
                    components: &components("5000000"),
                },
                Utc::now(),
            )
            .await
            .expect("insert");
        tx.commit().await.unwrap();

        let fetched = repo.fetch(&acme, &created.id).await.unwrap().expect("record");
        assert_eq!(fetched.total, Decimal::from_str("5150000.75").unwrap());
        assert!(fetched.total_is_consistent());
        assert_eq!(fetched.period, period(Month::January));
    }

    #[tokio::test]
    async fn insert_rejects_unknown_and_foreign_employees() {
        let db = setup_db().await;
        let foreign = seed_employee(&db, &owner("globex"), profile("1", "Ana")).await;
        let mut tx = db.begin().await.unwrap();
        let repo = db.payroll();

        for employee_id in ["missing", foreign.as_str()] {
            let err = repo
                .insert(
                    &mut tx,
                    &owner("acme"),
                    NewPayrollRecord {
                        employee_id,
                        period: period(Month::January),
                        components: &components("1"),
                    },
                    Utc::now(),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, PayrollError::MissingEmployee(_)));
        }
    }

    #[tokio::test]
    async fn duplicate_period_is_reported() {
        let db = setup_db().await;
        let acme = owner("acme");
        let employee_id = seed_employee(&db, &acme, profile("1", "Ana")).await;
        let repo = db.payroll();
        let mut tx = db.begin().await.unwrap();
        let record = NewPayrollRecord {
            employee_id: &employee_id,
            period: period(Month::January),
            components: &components("1"),
        };
        repo.insert(&mut tx, &acme, record.clone(), Utc::now()).await.unwrap();
        let err = repo.insert(&mut tx, &acme, record, Utc::now()).await.unwrap_err();
        assert!(matches!(err, PayrollError::DuplicatePeriod { .. }));
    }

    #[tokio::test]
    async fn overflowing_components_are_refused_before_writing() {
        let db = setup_db().await;
        let acme = owner("acme");
        let employee_id = seed_employee(&db, &acme, profile("1", "Ana")).await;
        let repo = db.payroll();
        let overflowing = SalaryComponents {
            basic: Decimal::MAX,
            bonus: Decimal::ONE,
            ..SalaryComponents::default()
        };

        let mut tx = db.begin().await.unwrap();
        let err = repo
            .insert(
                &mut tx,
                &acme,
                NewPayrollRecord {
                    employee_id: &employee_id,
                    period: period(Month::January),
                    components: &overflowing,
                },
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PayrollError::InvalidAmount(AmountError::Overflow)));

        let created = repo
            .insert(
                &mut tx,
                &acme,
                NewPayrollRecord {
                    employee_id: &employee_id,
                    period: period(Month::February),
                    components: &components("10"),
                },
                Utc::now(),
            )
            .await
            .expect("insert");
        let err = repo
            .update_components(&mut tx, &acme, &created.id, &overflowing, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, PayrollError::InvalidAmount(AmountError::Overflow)));
        tx.commit().await.unwrap();

        let stored = repo.fetch(&acme, &created.id).await.unwrap().expect("record");
        assert_eq!(stored.components, components("10"));
        let january = repo.list_for_period(&acme, period(Month::January)).await.unwrap();
        assert!(january.is_empty());
    }

    #[tokio::test]
    async fn update_components_recomputes_total() {
        let db = setup_db().await;
        let acme = owner("acme");
        let employee_id = seed_employee(&db, &acme, profile("1", "Ana")).await;
        let repo = db.payroll();

        let mut tx = db.begin().await.unwrap();
        let created = repo
            .insert(
                &mut tx,
                &acme,
                NewPayrollRecord {
                    employee_id: &employee_id,
                    period: period(Month::January),
                    components: &components("100"),
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let updated = repo
            .update_components(&mut tx, &acme, &created.id, &components("200"), Utc::now())
            .await
            .unwrap()
            .expect("updated");
        tx.commit().await.unwrap();

        assert_eq!(updated.total, Decimal::from_str("150200.75").unwrap());
        assert!(updated.total_is_consistent());
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_records_behind() {
        let db = setup_db().await;
        let acme = owner("acme");
        let mut items = Vec::new();
        for i in 0..5 {
            let employee_id = seed_employee(&db, &acme, profile(&i.to_string(), &format!("E{i}"))).await;
            items.push(ReplicationItem {
                source_id: None,
                employee_id,
                components: components("1000"),
            });
        }

        // Abort the third insert into February.
        sqlx::query(
            "CREATE TRIGGER fail_third_insert BEFORE INSERT ON payroll_records \
             WHEN (SELECT COUNT(*) FROM payroll_records WHERE month = 'FEBRUARY') >= 2 \
             BEGIN SELECT RAISE(ABORT, 'injected failure'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let staged = stage(period(Month::January), period(Month::February), &items, &HashSet::new())
            .unwrap();
        let repo = db.payroll();
        let mut tx = db.begin().await.unwrap();
        let err = repo
            .insert_batch(&mut tx, &acme, &staged.pending, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, PayrollError::Database(_)));
        tx.rollback().await.expect("rollback");

        let visible = repo.list_for_period(&acme, period(Month::February)).await.unwrap();
        assert!(visible.is_empty());
    }
}
