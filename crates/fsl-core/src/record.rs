use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category of a service event recorded in the ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Inspection,
    MaintenanceTier2,
    MaintenanceTier3,
    Substitution,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Inspection => "inspection",
            ServiceType::MaintenanceTier2 => "maintenance_l2",
            ServiceType::MaintenanceTier3 => "maintenance_l3",
            ServiceType::Substitution => "substitution",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "inspection" => Ok(ServiceType::Inspection),
            "maintenance_l2" | "maintenance-l2" | "tier2" | "maintenance_tier_2" => {
                Ok(ServiceType::MaintenanceTier2)
            }
            "maintenance_l3" | "maintenance-l3" | "tier3" | "maintenance_tier_3" => {
                Ok(ServiceType::MaintenanceTier3)
            }
            "substitution" => Ok(ServiceType::Substitution),
            other => Err(format!("Unknown service type: {other}")),
        }
    }
}

/// Outcome of the approval check on an inspection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Approval {
    Pass,
    Fail,
    NotApplicable,
}

impl Approval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Approval::Pass => "pass",
            Approval::Fail => "fail",
            Approval::NotApplicable => "n/a",
        }
    }
}

impl fmt::Display for Approval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Approval {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "pass" | "approved" | "yes" => Ok(Approval::Pass),
            "fail" | "rejected" | "no" => Ok(Approval::Fail),
            "n/a" | "na" | "not_applicable" => Ok(Approval::NotApplicable),
            other => Err(format!("Unknown approval value: {other}")),
        }
    }
}

/// Position supplied by the geolocation collaborator at recording time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

/// The due-date snapshot attached to every ledger record.
///
/// `last_hydrostatic_test` is the date of the last Tier-3 pressure test, not
/// an obligation, so `next_obligation` ignores it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DueDates {
    pub inspection: Option<NaiveDate>,
    pub maintenance_l2: Option<NaiveDate>,
    pub maintenance_l3: Option<NaiveDate>,
    pub last_hydrostatic_test: Option<NaiveDate>,
}

impl DueDates {
    /// Soonest of the three due fields; `None` when nothing is scheduled.
    pub fn next_obligation(&self) -> Option<NaiveDate> {
        [self.inspection, self.maintenance_l2, self.maintenance_l3]
            .into_iter()
            .flatten()
            .min()
    }

    pub fn is_cleared(&self) -> bool {
        self.inspection.is_none() && self.maintenance_l2.is_none() && self.maintenance_l3.is_none()
    }
}

/// One immutable service event. Appended, never updated or deleted.
///
/// Descriptive attributes are not authoritative on a single record; the
/// consolidator always reads them off the latest record by service date.
/// `service_date` stays raw text because the shared ledger has historical
/// rows written outside this system; it is parsed lazily and rows that fail
/// to parse are excluded from aggregation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InspectionRecord {
    pub equipment_id: String,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub capacity: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub seal_id: Option<String>,
    pub service_type: ServiceType,
    pub service_date: String,
    #[serde(default)]
    pub inspector: Option<String>,
    #[serde(default)]
    pub approval: Option<Approval>,
    #[serde(default)]
    pub observations: String,
    #[serde(default)]
    pub action_plan: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub due_dates: DueDates,
}

impl InspectionRecord {
    pub fn parsed_service_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.service_date.trim(), "%Y-%m-%d").ok()
    }

    /// A Substitution record with all due-dates and location cleared retires
    /// the ID permanently. The consolidator treats this as irreversible even
    /// when later rows are appended to the same ID by mistake.
    pub fn is_retirement_marker(&self) -> bool {
        self.service_type == ServiceType::Substitution
            && self.due_dates.is_cleared()
            && self.location.is_none()
    }
}

/// Most recent record by parsed service date, later ledger position breaking
/// ties. Records with unparseable dates never win.
pub fn latest_record(records: &[InspectionRecord]) -> Option<&InspectionRecord> {
    let mut best: Option<(NaiveDate, &InspectionRecord)> = None;
    for record in records {
        let Some(date) = record.parsed_service_date() else {
            continue;
        };
        match &best {
            Some((best_date, _)) if *best_date > date => {}
            _ => best = Some((date, record)),
        }
    }
    best.map(|(_, record)| record)
}
