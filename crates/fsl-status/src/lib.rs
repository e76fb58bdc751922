use chrono::NaiveDate;
use fsl_core::action_plan::OUT_OF_SERVICE_MARKER;
use fsl_core::record::{Approval, DueDates, GeoPoint, InspectionRecord, ServiceType};
use fsl_core::schedule::SchedulePolicy;
use fsl_storage::{LedgerStore, StorageError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Derived compliance state. Never stored; always recomputed by folding the
/// full history.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Ok,
    Overdue,
    NonCompliant,
    OutOfService,
}

impl ComplianceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceStatus::Ok => "ok",
            ComplianceStatus::Overdue => "overdue",
            ComplianceStatus::NonCompliant => "non_compliant",
            ComplianceStatus::OutOfService => "out_of_service",
        }
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fold of one equipment ID's entire history into its current state.
///
/// Descriptive attributes come from the latest record by service date; the
/// per-tier dues are carried for display even though only `next_due` drives
/// the status.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConsolidatedStatus {
    pub equipment_id: String,
    pub agent_type: Option<String>,
    pub capacity: Option<String>,
    pub manufacturer: Option<String>,
    pub seal_id: Option<String>,
    pub status: ComplianceStatus,
    pub last_service_date: NaiveDate,
    pub last_approval: Option<Approval>,
    pub last_observations: String,
    pub last_action_plan: String,
    pub location: Option<GeoPoint>,
    pub inspection_due: Option<NaiveDate>,
    pub maintenance_l2_due: Option<NaiveDate>,
    pub maintenance_l3_due: Option<NaiveDate>,
    /// Soonest of the per-tier dues. The soonest obligation governs the
    /// status, not the most recent service.
    pub next_due: Option<NaiveDate>,
}

pub struct StatusConsolidator {
    policy: SchedulePolicy,
}

impl StatusConsolidator {
    pub fn new(policy: SchedulePolicy) -> Self {
        Self { policy }
    }

    /// Folds all records of one equipment ID. Records with unparseable
    /// service dates are discarded; when none remain the equipment has no
    /// status and is excluded from every view.
    pub fn consolidate(
        &self,
        records: &[InspectionRecord],
        today: NaiveDate,
    ) -> Option<ConsolidatedStatus> {
        let refs: Vec<&InspectionRecord> = records.iter().collect();
        self.consolidate_refs(&refs, today)
    }

    /// Consolidates every equipment ID present in a full ledger snapshot,
    /// in deterministic ID order.
    pub fn status_board(
        &self,
        records: &[InspectionRecord],
        today: NaiveDate,
    ) -> Vec<ConsolidatedStatus> {
        let mut by_equipment: BTreeMap<&str, Vec<&InspectionRecord>> = BTreeMap::new();
        for record in records {
            by_equipment
                .entry(record.equipment_id.as_str())
                .or_default()
                .push(record);
        }

        by_equipment
            .values()
            .filter_map(|group| self.consolidate_refs(group, today))
            .collect()
    }

    /// `status_board` without retired equipment: an ID whose history carries
    /// a retirement never appears here.
    pub fn active_board(
        &self,
        records: &[InspectionRecord],
        today: NaiveDate,
    ) -> Vec<ConsolidatedStatus> {
        self.status_board(records, today)
            .into_iter()
            .filter(|status| status.status != ComplianceStatus::OutOfService)
            .collect()
    }

    /// Reads the full ledger through the injected store and consolidates it.
    pub fn status_board_from_store(
        &self,
        store: &dyn LedgerStore,
        today: NaiveDate,
    ) -> Result<Vec<ConsolidatedStatus>, StatusError> {
        let records = store.all_records()?;
        Ok(self.status_board(&records, today))
    }

    fn consolidate_refs(
        &self,
        records: &[&InspectionRecord],
        today: NaiveDate,
    ) -> Option<ConsolidatedStatus> {
        let mut dated: Vec<(NaiveDate, &InspectionRecord)> = Vec::with_capacity(records.len());
        for record in records {
            match record.parsed_service_date() {
                Some(date) => dated.push((date, record)),
                None => debug!(
                    equipment_id = %record.equipment_id,
                    service_date = %record.service_date,
                    "discarding record with unparseable service date"
                ),
            }
        }
        if dated.is_empty() {
            return None;
        }

        // Later ledger position wins a date tie, so scan with >=.
        let mut latest = dated[0];
        for entry in &dated[1..] {
            if entry.0 >= latest.0 {
                latest = *entry;
            }
        }
        let (latest_date, latest) = latest;

        // A retirement is permanent: rows appended after it by mistake never
        // bring the ID back into active views.
        let retired = dated.iter().any(|(_, record)| record.is_retirement_marker());

        let inspection_due = self.tier_due(&dated, ServiceType::Inspection, latest);
        let maintenance_l2_due = self.tier_due(&dated, ServiceType::MaintenanceTier2, latest);
        let maintenance_l3_due = self.tier_due(&dated, ServiceType::MaintenanceTier3, latest);
        let next_due = [inspection_due, maintenance_l2_due, maintenance_l3_due]
            .into_iter()
            .flatten()
            .min();

        let status = if retired || latest.action_plan == OUT_OF_SERVICE_MARKER {
            ComplianceStatus::OutOfService
        } else if latest.approval == Some(Approval::Fail) {
            ComplianceStatus::NonCompliant
        } else if next_due.is_some_and(|due| due < today) {
            ComplianceStatus::Overdue
        } else {
            ComplianceStatus::Ok
        };

        Some(ConsolidatedStatus {
            equipment_id: latest.equipment_id.clone(),
            agent_type: latest.agent_type.clone(),
            capacity: latest.capacity.clone(),
            manufacturer: latest.manufacturer.clone(),
            seal_id: latest.seal_id.clone(),
            status,
            last_service_date: latest_date,
            last_approval: latest.approval,
            last_observations: latest.observations.clone(),
            last_action_plan: latest.action_plan.clone(),
            location: latest.location.clone(),
            inspection_due,
            maintenance_l2_due,
            maintenance_l3_due,
            next_due,
        })
    }

    /// Next due for one tier: the most recent service of that type fed
    /// through the scheduler, reading back the tier's own clock.
    fn tier_due(
        &self,
        dated: &[(NaiveDate, &InspectionRecord)],
        service_type: ServiceType,
        latest: &InspectionRecord,
    ) -> Option<NaiveDate> {
        let last_service = dated
            .iter()
            .filter(|(_, record)| record.service_type == service_type)
            .map(|(date, _)| *date)
            .max()?;

        let dues = self.policy.compute_due_dates(
            service_type,
            Some(last_service),
            latest.agent_type.as_deref(),
            &DueDates::default(),
        );
        match service_type {
            ServiceType::Inspection => dues.inspection,
            ServiceType::MaintenanceTier2 => dues.maintenance_l2,
            ServiceType::MaintenanceTier3 => dues.maintenance_l3,
            ServiceType::Substitution => None,
        }
    }
}
