use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::AmountError;
use crate::types::{PayrollRecord, Period, SalaryComponents};

/// One record to carry over into the target period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationItem {
    #[serde(default)]
    pub source_id: Option<String>,
    pub employee_id: String,
    #[serde(flatten)]
    pub components: SalaryComponents,
}

impl From<&PayrollRecord> for ReplicationItem {
    fn from(record: &PayrollRecord) -> Self {
        Self {
            source_id: Some(record.id.clone()),
            employee_id: record.employee_id.clone(),
            components: record.components.clone(),
        }
    }
}

/// A new record waiting in the batch, with its total already recomputed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedRecord {
    pub source_id: Option<String>,
    pub employee_id: String,
    pub period: Period,
    pub components: SalaryComponents,
    pub total: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyInTarget,
    DuplicateInBatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub employee_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationStage {
    pub pending: Vec<StagedRecord>,
    pub skipped: Vec<SkippedItem>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplicationError {
    #[error("source and target period are both {0}")]
    SamePeriod(Period),
    #[error("invalid amount for employee {employee_id}: {source}")]
    InvalidAmount {
        employee_id: String,
        #[source]
        source: AmountError,
    },
}

/// Stages a replication batch without touching storage.
///
/// `existing_in_target` holds the employee ids that already have a record in
/// the target period; those items are skipped, as is any later item for an
/// employee already staged in this batch.
pub fn stage(
    source: Period,
    target: Period,
    items: &[ReplicationItem],
    existing_in_target: &HashSet<String>,
) -> Result<ReplicationStage, ReplicationError> {
    if source == target {
        return Err(ReplicationError::SamePeriod(source));
    }

    let mut stage = ReplicationStage::default();
    let mut staged: HashSet<&str> = HashSet::with_capacity(items.len());

    for item in items {
        let total = item
            .components
            .validate()
            .and_then(|()| item.components.total())
            .map_err(|source| ReplicationError::InvalidAmount {
                employee_id: item.employee_id.clone(),
                source,
            })?;

        let reason = if existing_in_target.contains(&item.employee_id) {
            Some(SkipReason::AlreadyInTarget)
        } else if !staged.insert(item.employee_id.as_str()) {
            Some(SkipReason::DuplicateInBatch)
        } else {
            None
        };

        match reason {
            Some(reason) => stage.skipped.push(SkippedItem {
                source_id: item.source_id.clone(),
                employee_id: item.employee_id.clone(),
                reason,
            }),
            None => stage.pending.push(StagedRecord {
                source_id: item.source_id.clone(),
                employee_id: item.employee_id.clone(),
                period: target,
                components: item.components.clone(),
                total,
            }),
        }
    }

    Ok(stage)
}

/// Result of a committed replication batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationOutcome {
    pub created: usize,
    pub skipped: Vec<SkippedItem>,
    pub created_ids: Vec<String>,
}

impl ReplicationOutcome {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Month;

    fn period(month: Month) -> Period {
        Period::new(month, 2025).unwrap()
    }

    fn item(employee_id: &str, basic: i64) -> ReplicationItem {
        ReplicationItem {
            source_id: Some(format!("src-{employee_id}")),
            employee_id: employee_id.into(),
            components: SalaryComponents {
                basic: Decimal::new(basic, 0),
                food_allowance: Decimal::new(250, 1),
                ..SalaryComponents::default()
            },
        }
    }

    #[test]
    fn stages_every_item_with_recomputed_totals() {
        let items = vec![item("e-1", 100), item("e-2", 200)];
        let stage = stage(period(Month::January), period(Month::February), &items, &HashSet::new())
            .expect("stage");

        assert!(stage.skipped.is_empty());
        assert_eq!(stage.pending.len(), 2);
        assert_eq!(stage.pending[0].period, period(Month::February));
        assert_eq!(stage.pending[0].total, Decimal::new(1250, 1));
        assert_eq!(stage.pending[1].total, Decimal::new(2250, 1));
    }

    #[test]
    fn skips_employees_already_in_target_and_batch_duplicates() {
        let items = vec![item("e-1", 100), item("e-2", 200), item("e-2", 300)];
        let existing: HashSet<String> = ["e-1".to_string()].into_iter().collect();

        let stage = stage(period(Month::January), period(Month::February), &items, &existing)
            .expect("stage");

        assert_eq!(stage.pending.len(), 1);
        assert_eq!(stage.pending[0].employee_id, "e-2");
        assert_eq!(
            stage.skipped.iter().map(|s| s.reason).collect::<Vec<_>>(),
            vec![SkipReason::AlreadyInTarget, SkipReason::DuplicateInBatch]
        );
    }

    #[test]
    fn rejects_identical_periods() {
        let err = stage(period(Month::March), period(Month::March), &[], &HashSet::new()).unwrap_err();
        assert_eq!(err, ReplicationError::SamePeriod(period(Month::March)));
    }

    #[test]
    fn rejects_negative_components() {
        let mut bad = item("e-1", 100);
        bad.components.bonus = Decimal::new(-1, 0);
        let err = stage(period(Month::January), period(Month::February), &[bad], &HashSet::new())
            .unwrap_err();
        assert!(matches!(err, ReplicationError::InvalidAmount { .. }));
    }

    #[test]
    fn rejects_components_beyond_the_amount_ceiling() {
        let mut huge = item("e-2", 100);
        huge.components.basic = Decimal::MAX;
        let err = stage(
            period(Month::January),
            period(Month::February),
            &[item("e-1", 100), huge],
            &HashSet::new(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ReplicationError::InvalidAmount {
                employee_id: "e-2".into(),
                source: AmountError::TooLarge { field: "basic" },
            }
        );
    }
}
