use chrono::NaiveDate;
use fsl_core::action_plan::ActionPlanner;
use fsl_core::record::{latest_record, Approval, DueDates, GeoPoint, InspectionRecord, ServiceType};
use fsl_core::schedule::SchedulePolicy;
use fsl_storage::{LedgerStore, StorageError};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("no ledger history for equipment {0}")]
    UnknownEquipment(String),
}

/// One equipment dictionary as produced by the AI extraction collaborator.
///
/// Extraction output is loose: IDs arrive as strings or numbers, keys go
/// missing, approvals use assorted spellings. This is the only place the
/// shape is validated; downstream code works on `InspectionRecord` and never
/// re-checks fields.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedRecord {
    #[serde(default, deserialize_with = "deserialize_loose_id")]
    pub equipment_id: Option<String>,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub capacity: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub seal_id: Option<String>,
    #[serde(default)]
    pub service_date: Option<String>,
    #[serde(default)]
    pub inspector: Option<String>,
    #[serde(default)]
    pub approval: Option<String>,
    #[serde(default)]
    pub observations: Option<String>,
}

/// Accepts a string or a number for an extracted equipment ID.
fn deserialize_loose_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => {
            let trimmed = s.trim().to_string();
            Ok(if trimmed.is_empty() { None } else { Some(trimmed) })
        }
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(serde::de::Error::custom(
            "expected string or number for equipment_id",
        )),
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IntakeReport {
    pub appended: usize,
    pub skipped: usize,
}

/// Builds ledger records for the two operator-facing creation paths: batch
/// ingestion of an extraction run, and a quick field inspection.
pub struct IntakePipeline {
    policy: SchedulePolicy,
    planner: ActionPlanner,
}

impl IntakePipeline {
    pub fn new(policy: SchedulePolicy, planner: ActionPlanner) -> Self {
        Self { policy, planner }
    }

    /// Appends one record per extracted row, folding due-dates forward from
    /// the equipment's latest prior record. Rows without an equipment ID are
    /// counted as skipped; a row with an unparseable service date is still
    /// appended (its dues are simply carried over unchanged).
    pub fn ingest_batch(
        &self,
        store: &dyn LedgerStore,
        service_type: ServiceType,
        batch: &[ExtractedRecord],
    ) -> Result<IntakeReport, IntakeError> {
        let mut report = IntakeReport::default();

        for extracted in batch {
            let Some(equipment_id) = extracted.equipment_id.as_deref() else {
                warn!("skipping extracted row without an equipment id");
                report.skipped += 1;
                continue;
            };

            let history = store.records_for_equipment(equipment_id)?;
            let prior_dues = latest_record(&history)
                .map(|record| record.due_dates.clone())
                .unwrap_or_default();

            let service_date_raw = extracted.service_date.clone().unwrap_or_default();
            let service_date =
                NaiveDate::parse_from_str(service_date_raw.trim(), "%Y-%m-%d").ok();
            let approval = extracted
                .approval
                .as_deref()
                .and_then(|value| value.parse::<Approval>().ok());
            let observations = extracted.observations.clone().unwrap_or_default();

            let record = InspectionRecord {
                equipment_id: equipment_id.to_string(),
                agent_type: extracted.agent_type.clone(),
                capacity: extracted.capacity.clone(),
                manufacturer: extracted.manufacturer.clone(),
                seal_id: extracted.seal_id.clone(),
                service_type,
                service_date: service_date_raw,
                inspector: extracted.inspector.clone(),
                approval,
                observations: observations.clone(),
                action_plan: self.planner.generate(approval, &observations),
                location: None,
                due_dates: self.policy.compute_due_dates(
                    service_type,
                    service_date,
                    extracted.agent_type.as_deref(),
                    &prior_dues,
                ),
            };

            store.append_record(&record)?;
            debug!(equipment_id, %service_type, "appended ingested record");
            report.appended += 1;
        }

        Ok(report)
    }

    /// Records a quick field inspection against known equipment: descriptive
    /// attributes are cloned off the latest record, the new approval and
    /// observations drive the plan, and the due-dates merge forward.
    #[allow(clippy::too_many_arguments)]
    pub fn record_field_inspection(
        &self,
        store: &dyn LedgerStore,
        equipment_id: &str,
        approval: Approval,
        observations: &str,
        inspector: &str,
        location: Option<GeoPoint>,
        today: NaiveDate,
    ) -> Result<InspectionRecord, IntakeError> {
        let history = store.records_for_equipment(equipment_id)?;
        let latest = latest_record(&history)
            .ok_or_else(|| IntakeError::UnknownEquipment(equipment_id.to_string()))?;

        let record = InspectionRecord {
            equipment_id: equipment_id.to_string(),
            agent_type: latest.agent_type.clone(),
            capacity: latest.capacity.clone(),
            manufacturer: latest.manufacturer.clone(),
            seal_id: latest.seal_id.clone(),
            service_type: ServiceType::Inspection,
            service_date: today.format("%Y-%m-%d").to_string(),
            inspector: Some(inspector.to_string()),
            approval: Some(approval),
            observations: observations.to_string(),
            action_plan: self.planner.generate(Some(approval), observations),
            location: location.or_else(|| latest.location.clone()),
            due_dates: self.policy.compute_due_dates(
                ServiceType::Inspection,
                Some(today),
                latest.agent_type.as_deref(),
                &latest.due_dates,
            ),
        };

        store.append_record(&record)?;
        debug!(equipment_id, "appended field inspection");
        Ok(record)
    }
}

/// Parses the JSON body produced by one extraction run: either a bare array
/// of equipment dictionaries or an object wrapping one under `equipment`.
pub fn parse_extraction_batch(body: &str) -> Result<Vec<ExtractedRecord>, serde_json::Error> {
    #[derive(Deserialize)]
    struct Wrapped {
        equipment: Vec<ExtractedRecord>,
    }

    match serde_json::from_str::<Vec<ExtractedRecord>>(body) {
        Ok(batch) => Ok(batch),
        Err(first_err) => match serde_json::from_str::<Wrapped>(body) {
            Ok(wrapped) => Ok(wrapped.equipment),
            Err(_) => Err(first_err),
        },
    }
}
