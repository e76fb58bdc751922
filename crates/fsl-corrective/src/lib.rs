use chrono::NaiveDate;
use fsl_core::action_plan::{ActionPlanner, OUT_OF_SERVICE_MARKER};
use fsl_core::record::{latest_record, Approval, DueDates, GeoPoint, InspectionRecord, ServiceType};
use fsl_core::schedule::SchedulePolicy;
use fsl_storage::{AuditEntry, LedgerStore, StorageError};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CorrectiveError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("no ledger history for equipment {0}")]
    NoHistory(String),
    /// The retirement record is committed but the substitute's install record
    /// is not. There is no rollback; the caller must reconcile manually
    /// before retrying, or the retry will duplicate the retirement.
    #[error(
        "retirement of {equipment_id} committed but install of {substitute_id} failed: {source}"
    )]
    InstallPending {
        equipment_id: String,
        substitute_id: String,
        #[source]
        source: StorageError,
    },
    /// Ledger writes are committed but the audit-log append failed.
    #[error("ledger writes for {equipment_id} committed but audit append failed: {source}")]
    AuditPending {
        equipment_id: String,
        #[source]
        source: StorageError,
    },
}

/// Operator decision resolving one non-compliant equipment ID. A substitute
/// ID together with a location selects retire-and-substitute; otherwise the
/// non-conformity is resolved in place.
#[derive(Debug, Clone)]
pub struct CorrectiveAction {
    pub action_taken: String,
    pub responsible: String,
    pub substitute_id: Option<String>,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CorrectiveOutcome {
    Resolved(InspectionRecord),
    Substituted {
        retired: InspectionRecord,
        installed: InspectionRecord,
    },
}

/// Composes the scheduler, the action-plan generator, and the ledger store to
/// run the two resolution transitions. Every append is independent; a failure
/// leaves earlier appends committed.
pub struct CorrectiveActionOrchestrator {
    policy: SchedulePolicy,
    planner: ActionPlanner,
}

impl CorrectiveActionOrchestrator {
    pub fn new(policy: SchedulePolicy, planner: ActionPlanner) -> Self {
        Self { policy, planner }
    }

    pub fn apply(
        &self,
        store: &dyn LedgerStore,
        equipment_id: &str,
        action: &CorrectiveAction,
        operator: &str,
        today: NaiveDate,
    ) -> Result<CorrectiveOutcome, CorrectiveError> {
        let history = store.records_for_equipment(equipment_id)?;
        let latest = latest_record(&history)
            .ok_or_else(|| CorrectiveError::NoHistory(equipment_id.to_string()))?
            .clone();

        let outcome = match (&action.substitute_id, &action.location) {
            (Some(substitute_id), Some(location)) => self.retire_and_substitute(
                store,
                &latest,
                substitute_id,
                location.clone(),
                action,
                operator,
                today,
            )?,
            _ => self.resolve_in_place(store, &latest, action, operator, today)?,
        };

        let audit = AuditEntry {
            date: today,
            equipment_id: latest.equipment_id.clone(),
            problem: latest.action_plan.clone(),
            action_taken: action.action_taken.clone(),
            responsible: action.responsible.clone(),
            substitute_id: action.substitute_id.clone(),
        };
        store
            .append_audit_entry(&audit)
            .map_err(|source| CorrectiveError::AuditPending {
                equipment_id: latest.equipment_id.clone(),
                source,
            })?;

        Ok(outcome)
    }

    /// A fresh passing inspection for the same ID at the same location,
    /// describing the applied fix.
    fn resolve_in_place(
        &self,
        store: &dyn LedgerStore,
        latest: &InspectionRecord,
        action: &CorrectiveAction,
        operator: &str,
        today: NaiveDate,
    ) -> Result<CorrectiveOutcome, CorrectiveError> {
        let observations = format!("Corrective action applied: {}", action.action_taken);
        let record = InspectionRecord {
            equipment_id: latest.equipment_id.clone(),
            agent_type: latest.agent_type.clone(),
            capacity: latest.capacity.clone(),
            manufacturer: latest.manufacturer.clone(),
            seal_id: latest.seal_id.clone(),
            service_type: ServiceType::Inspection,
            service_date: iso(today),
            inspector: Some(operator.to_string()),
            approval: Some(Approval::Pass),
            observations: observations.clone(),
            action_plan: self.planner.generate(Some(Approval::Pass), &observations),
            location: latest.location.clone(),
            due_dates: self.policy.compute_due_dates(
                ServiceType::Inspection,
                Some(today),
                latest.agent_type.as_deref(),
                &latest.due_dates,
            ),
        };

        store.append_record(&record)?;
        info!(equipment_id = %latest.equipment_id, "non-conformity resolved in place");
        Ok(CorrectiveOutcome::Resolved(record))
    }

    /// Retires the original ID and installs the substitute at the original's
    /// former location. Two independent appends: if the second fails the
    /// retirement stays committed and the partial state is surfaced.
    #[allow(clippy::too_many_arguments)]
    fn retire_and_substitute(
        &self,
        store: &dyn LedgerStore,
        latest: &InspectionRecord,
        substitute_id: &str,
        location: GeoPoint,
        action: &CorrectiveAction,
        operator: &str,
        today: NaiveDate,
    ) -> Result<CorrectiveOutcome, CorrectiveError> {
        let retired = InspectionRecord {
            equipment_id: latest.equipment_id.clone(),
            agent_type: latest.agent_type.clone(),
            capacity: latest.capacity.clone(),
            manufacturer: latest.manufacturer.clone(),
            seal_id: latest.seal_id.clone(),
            service_type: ServiceType::Substitution,
            service_date: iso(today),
            inspector: Some(operator.to_string()),
            approval: Some(Approval::NotApplicable),
            observations: format!(
                "Removed for action: '{}'. Substituted by ID: {substitute_id}",
                action.action_taken
            ),
            action_plan: OUT_OF_SERVICE_MARKER.to_string(),
            location: None,
            due_dates: self.policy.compute_due_dates(
                ServiceType::Substitution,
                Some(today),
                latest.agent_type.as_deref(),
                &latest.due_dates,
            ),
        };
        store.append_record(&retired)?;
        info!(equipment_id = %latest.equipment_id, substitute_id, "equipment retired");

        // Brand-new stock has no history of its own; fall back to the
        // retired equipment's attributes.
        let substitute_history = store
            .records_for_equipment(substitute_id)
            .map_err(|source| CorrectiveError::InstallPending {
                equipment_id: latest.equipment_id.clone(),
                substitute_id: substitute_id.to_string(),
                source,
            })?;
        let donor = latest_record(&substitute_history).unwrap_or(latest);

        let observations = format!(
            "Installed in substitution of ID: {}",
            latest.equipment_id
        );
        let installed = InspectionRecord {
            equipment_id: substitute_id.to_string(),
            agent_type: donor.agent_type.clone(),
            capacity: donor.capacity.clone(),
            manufacturer: donor.manufacturer.clone(),
            seal_id: donor.seal_id.clone(),
            service_type: ServiceType::Inspection,
            service_date: iso(today),
            inspector: Some(operator.to_string()),
            approval: Some(Approval::Pass),
            observations: observations.clone(),
            action_plan: self.planner.generate(Some(Approval::Pass), &observations),
            // Continuity of physical coverage: the substitute takes over the
            // original's spot, not its own previous one.
            location: Some(location),
            due_dates: self.policy.compute_due_dates(
                ServiceType::Inspection,
                Some(today),
                donor.agent_type.as_deref(),
                &DueDates::default(),
            ),
        };
        store
            .append_record(&installed)
            .map_err(|source| CorrectiveError::InstallPending {
                equipment_id: latest.equipment_id.clone(),
                substitute_id: substitute_id.to_string(),
                source,
            })?;
        info!(substitute_id, "substitute installed");

        Ok(CorrectiveOutcome::Substituted { retired, installed })
    }
}

fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsl_status::{ComplianceStatus, StatusConsolidator};
    use fsl_storage::SqliteLedger;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn seed_record(
        equipment_id: &str,
        service_date: &str,
        approval: Approval,
        observations: &str,
        action_plan: &str,
    ) -> InspectionRecord {
        InspectionRecord {
            equipment_id: equipment_id.to_string(),
            agent_type: Some("ABC Powder".to_string()),
            capacity: Some("6kg".to_string()),
            manufacturer: Some("Acme".to_string()),
            seal_id: Some("S-1".to_string()),
            service_type: ServiceType::Inspection,
            service_date: service_date.to_string(),
            inspector: Some("Silva".to_string()),
            approval: Some(approval),
            observations: observations.to_string(),
            action_plan: action_plan.to_string(),
            location: Some(GeoPoint {
                latitude: -23.55,
                longitude: -46.63,
                accuracy: None,
            }),
            due_dates: DueDates {
                inspection: Some(day(2024, 2, 10)),
                maintenance_l2: Some(day(2024, 11, 1)),
                maintenance_l3: None,
                last_hydrostatic_test: None,
            },
        }
    }

    fn orchestrator() -> CorrectiveActionOrchestrator {
        CorrectiveActionOrchestrator::new(SchedulePolicy::default(), ActionPlanner::default())
    }

    fn resolve_action(action_taken: &str) -> CorrectiveAction {
        CorrectiveAction {
            action_taken: action_taken.to_string(),
            responsible: "Souza".to_string(),
            substitute_id: None,
            location: None,
        }
    }

    #[test]
    fn resolve_in_place_appends_a_passing_inspection() {
        let db = SqliteLedger::open_in_memory().expect("open db");
        db.append_record(&seed_record(
            "E1",
            "2024-01-10",
            Approval::Fail,
            "manometer stuck",
            "Replace the pressure gauge immediately.",
        ))
        .expect("seed");

        let outcome = orchestrator()
            .apply(&db, "E1", &resolve_action("Gauge replaced"), "Souza", day(2024, 1, 20))
            .expect("apply");

        let CorrectiveOutcome::Resolved(record) = outcome else {
            panic!("expected resolve-in-place");
        };
        assert_eq!(record.approval, Some(Approval::Pass));
        // Monotonicity: the new inspection due lands strictly after today.
        assert_eq!(record.due_dates.inspection, Some(day(2024, 2, 20)));
        assert!(record.due_dates.inspection.expect("due") > day(2024, 1, 20));
        // The unrelated tier-2 clock merged forward untouched.
        assert_eq!(record.due_dates.maintenance_l2, Some(day(2024, 11, 1)));
        assert_eq!(record.location, Some(GeoPoint {
            latitude: -23.55,
            longitude: -46.63,
            accuracy: None,
        }));

        let consolidator = StatusConsolidator::new(SchedulePolicy::default());
        let status = consolidator
            .consolidate(&db.records_for_equipment("E1").expect("read"), day(2024, 1, 21))
            .expect("status");
        assert_eq!(status.status, ComplianceStatus::Ok);
    }

    #[test]
    fn resolve_in_place_writes_an_audit_entry() {
        let db = SqliteLedger::open_in_memory().expect("open db");
        db.append_record(&seed_record(
            "E1",
            "2024-01-10",
            Approval::Fail,
            "manometer stuck",
            "Replace the pressure gauge immediately.",
        ))
        .expect("seed");

        orchestrator()
            .apply(&db, "E1", &resolve_action("Gauge replaced"), "Souza", day(2024, 1, 20))
            .expect("apply");

        let log = db.audit_entries().expect("audit");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].equipment_id, "E1");
        assert_eq!(log[0].problem, "Replace the pressure gauge immediately.");
        assert_eq!(log[0].action_taken, "Gauge replaced");
        assert_eq!(log[0].responsible, "Souza");
        assert_eq!(log[0].substitute_id, None);
    }

    #[test]
    fn substitution_retires_the_original_and_installs_at_its_location() {
        let db = SqliteLedger::open_in_memory().expect("open db");
        db.append_record(&seed_record(
            "E1",
            "2024-01-10",
            Approval::Fail,
            "hose cracked",
            "Replace the discharge hose/nozzle assembly.",
        ))
        .expect("seed");

        let original_location = GeoPoint {
            latitude: -23.55,
            longitude: -46.63,
            accuracy: None,
        };
        let action = CorrectiveAction {
            action_taken: "Unit swapped for spare".to_string(),
            responsible: "Souza".to_string(),
            substitute_id: Some("E2".to_string()),
            location: Some(original_location.clone()),
        };

        let outcome = orchestrator()
            .apply(&db, "E1", &action, "Souza", day(2024, 1, 25))
            .expect("apply");

        let CorrectiveOutcome::Substituted { retired, installed } = outcome else {
            panic!("expected substitution");
        };
        assert!(retired.is_retirement_marker());
        assert_eq!(retired.action_plan, OUT_OF_SERVICE_MARKER);
        assert_eq!(installed.equipment_id, "E2");
        assert_eq!(installed.location, Some(original_location));
        assert_eq!(installed.due_dates.inspection, Some(day(2024, 2, 25)));
        // New stock: attributes fall back to the retired unit's.
        assert_eq!(installed.agent_type.as_deref(), Some("ABC Powder"));

        let consolidator = StatusConsolidator::new(SchedulePolicy::default());
        let all = db.all_records().expect("read");
        let active = consolidator.active_board(&all, day(2024, 1, 26));
        let ids: Vec<&str> = active
            .iter()
            .map(|status| status.equipment_id.as_str())
            .collect();
        assert_eq!(ids, vec!["E2"]);

        let log = db.audit_entries().expect("audit");
        assert_eq!(log[0].substitute_id.as_deref(), Some("E2"));
    }

    #[test]
    fn substitute_with_its_own_history_keeps_its_own_attributes() {
        let db = SqliteLedger::open_in_memory().expect("open db");
        db.append_record(&seed_record(
            "E1",
            "2024-01-10",
            Approval::Fail,
            "hose cracked",
            "Replace the discharge hose/nozzle assembly.",
        ))
        .expect("seed original");
        let mut spare = seed_record(
            "E2",
            "2023-12-01",
            Approval::Pass,
            "stock check",
            "Keep under routine periodic monitoring.",
        );
        spare.agent_type = Some("CO2".to_string());
        spare.location = Some(GeoPoint {
            latitude: 0.0,
            longitude: 0.0,
            accuracy: None,
        });
        db.append_record(&spare).expect("seed spare");

        let action = CorrectiveAction {
            action_taken: "Swap".to_string(),
            responsible: "Souza".to_string(),
            substitute_id: Some("E2".to_string()),
            location: Some(GeoPoint {
                latitude: -23.55,
                longitude: -46.63,
                accuracy: None,
            }),
        };

        let outcome = orchestrator()
            .apply(&db, "E1", &action, "Souza", day(2024, 1, 25))
            .expect("apply");
        let CorrectiveOutcome::Substituted { installed, .. } = outcome else {
            panic!("expected substitution");
        };

        assert_eq!(installed.agent_type.as_deref(), Some("CO2"));
        // Location continuity: the original's spot, not the spare's depot.
        assert_eq!(
            installed.location,
            Some(GeoPoint {
                latitude: -23.55,
                longitude: -46.63,
                accuracy: None,
            })
        );
    }

    /// Store double that rejects appends for one equipment ID, to exercise
    /// the committed-retirement / failed-install partial state.
    struct FailingInstallStore {
        inner: SqliteLedger,
        reject_id: String,
    }

    impl LedgerStore for FailingInstallStore {
        fn append_record(&self, record: &InspectionRecord) -> Result<(), StorageError> {
            if record.equipment_id == self.reject_id {
                return Err(StorageError::InvalidValue("append rejected".to_string()));
            }
            self.inner.append_record(record)
        }

        fn all_records(&self) -> Result<Vec<InspectionRecord>, StorageError> {
            self.inner.all_records()
        }

        fn records_for_equipment(
            &self,
            equipment_id: &str,
        ) -> Result<Vec<InspectionRecord>, StorageError> {
            self.inner.records_for_equipment(equipment_id)
        }

        fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), StorageError> {
            self.inner.append_audit_entry(entry)
        }

        fn audit_entries(&self) -> Result<Vec<AuditEntry>, StorageError> {
            self.inner.audit_entries()
        }
    }

    #[test]
    fn failed_install_surfaces_partial_state_and_keeps_the_retirement() {
        let store = FailingInstallStore {
            inner: SqliteLedger::open_in_memory().expect("open db"),
            reject_id: "E2".to_string(),
        };
        store
            .append_record(&seed_record(
                "E1",
                "2024-01-10",
                Approval::Fail,
                "hose cracked",
                "Replace the discharge hose/nozzle assembly.",
            ))
            .expect("seed");

        let action = CorrectiveAction {
            action_taken: "Swap".to_string(),
            responsible: "Souza".to_string(),
            substitute_id: Some("E2".to_string()),
            location: Some(GeoPoint {
                latitude: -23.55,
                longitude: -46.63,
                accuracy: None,
            }),
        };

        let err = orchestrator()
            .apply(&store, "E1", &action, "Souza", day(2024, 1, 25))
            .expect_err("install should fail");
        assert!(matches!(
            err,
            CorrectiveError::InstallPending { ref equipment_id, ref substitute_id, .. }
                if equipment_id == "E1" && substitute_id == "E2"
        ));

        // The retirement stays committed; no compensating rollback.
        let e1 = store.records_for_equipment("E1").expect("read");
        assert!(e1.last().expect("rows").is_retirement_marker());
        // The audit entry was never reached.
        assert!(store.audit_entries().expect("audit").is_empty());
    }

    #[test]
    fn unknown_equipment_yields_no_history_error() {
        let db = SqliteLedger::open_in_memory().expect("open db");
        let err = orchestrator()
            .apply(&db, "GHOST", &resolve_action("noop"), "Souza", day(2024, 1, 20))
            .expect_err("should fail");
        assert!(matches!(err, CorrectiveError::NoHistory(id) if id == "GHOST"));
    }

    #[test]
    fn missing_location_falls_back_to_resolve_in_place() {
        let db = SqliteLedger::open_in_memory().expect("open db");
        db.append_record(&seed_record(
            "E1",
            "2024-01-10",
            Approval::Fail,
            "hose cracked",
            "Replace the discharge hose/nozzle assembly.",
        ))
        .expect("seed");

        let action = CorrectiveAction {
            action_taken: "Hose replaced".to_string(),
            responsible: "Souza".to_string(),
            substitute_id: Some("E2".to_string()),
            location: None,
        };

        let outcome = orchestrator()
            .apply(&db, "E1", &action, "Souza", day(2024, 1, 20))
            .expect("apply");
        assert!(matches!(outcome, CorrectiveOutcome::Resolved(_)));
        assert!(db.records_for_equipment("E2").expect("read").is_empty());
    }
}
