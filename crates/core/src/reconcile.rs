use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::roster_csv::RowError;
use crate::types::{EmployeeProfile, EmployeeRecord, OwnerScope};

/// Full-row replacement of an existing employee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpdate {
    pub employee_id: String,
    pub profile: EmployeeProfile,
}

/// A persisted employee that is absent from the candidate set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedDelete {
    pub employee_id: String,
    pub government_id: String,
    pub name: String,
}

impl PlannedDelete {
    fn from_record(record: &EmployeeRecord) -> Self {
        Self {
            employee_id: record.id.clone(),
            government_id: record.profile.government_id.clone(),
            name: record.profile.name.clone(),
        }
    }
}

/// Three-way diff of a candidate roster against the persisted one.
///
/// `to_insert`, `to_update` and `to_delete` never share a government ID.
/// Employees that would be deleted but still have payroll records land in
/// `skipped_deletions` instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub to_insert: Vec<EmployeeProfile>,
    pub to_update: Vec<PlannedUpdate>,
    pub to_delete: Vec<PlannedDelete>,
    pub skipped_deletions: Vec<PlannedDelete>,
    pub unchanged: usize,
}

impl ReconciliationPlan {
    pub fn is_noop(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Government IDs per action, for callers that build a confirmation prompt.
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            insert: self
                .to_insert
                .iter()
                .map(|profile| profile.government_id.clone())
                .collect(),
            update: self
                .to_update
                .iter()
                .map(|update| update.profile.government_id.clone())
                .collect(),
            delete: self
                .to_delete
                .iter()
                .map(|delete| delete.government_id.clone())
                .collect(),
            skipped_deletions: self
                .skipped_deletions
                .iter()
                .map(|delete| delete.government_id.clone())
                .collect(),
            unchanged: self.unchanged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub insert: Vec<String>,
    pub update: Vec<String>,
    pub delete: Vec<String>,
    pub skipped_deletions: Vec<String>,
    pub unchanged: usize,
}

/// Computes the reconciliation plan for one owner scope.
///
/// `referenced` holds the ids of employees that have at least one payroll
/// record. Persisted rows of other scopes are ignored. Candidates are expected
/// to have unique government IDs; if one repeats, the first occurrence wins.
pub fn plan(
    owner: &OwnerScope,
    persisted: &[EmployeeRecord],
    referenced: &HashSet<String>,
    candidates: &[EmployeeProfile],
) -> ReconciliationPlan {
    let by_key: HashMap<&str, &EmployeeRecord> = persisted
        .iter()
        .filter(|record| &record.owner == owner)
        .map(|record| (record.profile.government_id.as_str(), record))
        .collect();

    let mut plan = ReconciliationPlan::default();
    let mut seen: HashSet<&str> = HashSet::with_capacity(candidates.len());

    for candidate in candidates {
        if !seen.insert(candidate.government_id.as_str()) {
            continue;
        }
        match by_key.get(candidate.government_id.as_str()) {
            None => plan.to_insert.push(candidate.clone()),
            Some(existing) if existing.profile == *candidate => plan.unchanged += 1,
            Some(existing) => plan.to_update.push(PlannedUpdate {
                employee_id: existing.id.clone(),
                profile: candidate.clone(),
            }),
        }
    }

    let mut absent: Vec<&EmployeeRecord> = by_key
        .values()
        .filter(|record| !seen.contains(record.profile.government_id.as_str()))
        .copied()
        .collect();
    absent.sort_by(|a, b| a.profile.government_id.cmp(&b.profile.government_id));

    for record in absent {
        let delete = PlannedDelete::from_record(record);
        if referenced.contains(&record.id) {
            plan.skipped_deletions.push(delete);
        } else {
            plan.to_delete.push(delete);
        }
    }

    plan
}

/// Counts reported back to the caller after a reconciliation commits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub skipped_deletions: Vec<String>,
    pub row_errors: Vec<RowError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::types::EmploymentStatus;

    fn owner() -> OwnerScope {
        OwnerScope::parse("acme").unwrap()
    }

    fn profile(government_id: &str, name: &str) -> EmployeeProfile {
        EmployeeProfile {
            name: name.into(),
            government_id: government_id.into(),
            position: "Clerk".into(),
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

    fn record(id: &str, profile: EmployeeProfile) -> EmployeeRecord {
        let now = Utc::now();
        EmployeeRecord {
            id: id.into(),
            owner: owner(),
            profile,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn classifies_insert_update_unchanged_and_delete() {
        let persisted = vec![
            record("e-1", profile("1", "Ana")),
            record("e-2", profile("2", "Budi")),
            record("e-3", profile("3", "Citra")),
        ];
        let candidates = vec![
            profile("1", "Ana"),
            profile("2", "Budi Santoso"),
            profile("4", "Dewi"),
        ];

        let plan = plan(&owner(), &persisted, &HashSet::new(), &candidates);

        assert_eq!(plan.unchanged, 1);
        assert_eq!(plan.to_insert, vec![profile("4", "Dewi")]);
        assert_eq!(
            plan.to_update,
            vec![PlannedUpdate {
                employee_id: "e-2".into(),
                profile: profile("2", "Budi Santoso"),
            }]
        );
        assert_eq!(plan.to_delete.len(), 1);
        assert_eq!(plan.to_delete[0].employee_id, "e-3");
        assert!(plan.skipped_deletions.is_empty());
    }

    #[test]
    fn referenced_employees_are_never_deleted() {
        let persisted = vec![record("e-1", profile("1", "Ana")), record("e-2", profile("2", "Budi"))];
        let referenced: HashSet<String> = ["e-1".to_string()].into_iter().collect();

        let plan = plan(&owner(), &persisted, &referenced, &[]);

        assert_eq!(plan.to_delete.len(), 1);
        assert_eq!(plan.to_delete[0].government_id, "2");
        assert_eq!(plan.skipped_deletions.len(), 1);
        assert_eq!(plan.skipped_deletions[0].government_id, "1");
    }

    #[test]
    fn action_sets_are_disjoint_and_cover_every_candidate() {
        let persisted: Vec<EmployeeRecord> = (0..20)
            .map(|i| record(&format!("e-{i}"), profile(&i.to_string(), &format!("P{i}"))))
            .collect();
        let candidates: Vec<EmployeeProfile> = (10..30)
            .map(|i| {
                let name = if i % 3 == 0 { format!("Renamed{i}") } else { format!("P{i}") };
                profile(&i.to_string(), &name)
            })
            .collect();
        let referenced: HashSet<String> = (0..20)
            .filter(|i| i % 2 == 0)
            .map(|i| format!("e-{i}"))
            .collect();

        let plan = plan(&owner(), &persisted, &referenced, &candidates);

        let inserts: HashSet<String> = plan.to_insert.iter().map(|p| p.government_id.clone()).collect();
        let updates: HashSet<String> = plan
            .to_update
            .iter()
            .map(|u| u.profile.government_id.clone())
            .collect();
        let deletes: HashSet<String> = plan.to_delete.iter().map(|d| d.government_id.clone()).collect();

        assert!(inserts.is_disjoint(&updates));
        assert!(inserts.is_disjoint(&deletes));
        assert!(updates.is_disjoint(&deletes));
        assert_eq!(inserts.len() + updates.len() + plan.unchanged, candidates.len());
        assert_eq!(deletes.len() + plan.skipped_deletions.len(), 10);
        for delete in &plan.to_delete {
            assert!(!referenced.contains(&delete.employee_id));
        }
    }

    #[test]
    fn other_scopes_are_ignored() {
        let mut foreign = record("x-1", profile("1", "Ana"));
        foreign.owner = OwnerScope::parse("globex").unwrap();

        let plan = plan(&owner(), &[foreign], &HashSet::new(), &[profile("1", "Ana")]);

        assert_eq!(plan.to_insert.len(), 1);
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn identical_roster_is_a_noop() {
        let persisted = vec![record("e-1", profile("1", "Ana"))];
        let plan = plan(&owner(), &persisted, &HashSet::new(), &[profile("1", "Ana")]);
        assert!(plan.is_noop());
        assert_eq!(plan.summary().unchanged, 1);
    }
}
