use crate::record::{DueDates, ServiceType};
use chrono::{Months, NaiveDate};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Maintenance-frequency rule table.
///
/// The frequency policy changed over the life of the source system (an early
/// agent-type-dependent table, later a flat monthly rule with cascading
/// resets), so the intervals are injected configuration rather than code.
/// `Default` is the flat monthly rule; `agent_based` reconstructs the early
/// table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulePolicy {
    pub inspection_interval_months: u32,
    /// Agent-type keyword (matched case-insensitively as a substring of the
    /// equipment's agent type) to inspection interval in months.
    pub inspection_overrides: BTreeMap<String, u32>,
    pub tier2_interval_months: u32,
    pub tier3_interval_years: u32,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            inspection_interval_months: 1,
            inspection_overrides: BTreeMap::new(),
            tier2_interval_months: 12,
            tier3_interval_years: 5,
        }
    }
}

impl SchedulePolicy {
    /// The early rule set: annual inspections, semi-annual for CO2 units.
    pub fn agent_based() -> Self {
        let mut inspection_overrides = BTreeMap::new();
        inspection_overrides.insert("CO2".to_string(), 6);
        Self {
            inspection_interval_months: 12,
            inspection_overrides,
            tier2_interval_months: 12,
            tier3_interval_years: 5,
        }
    }

    fn inspection_months(&self, agent_type: Option<&str>) -> u32 {
        if let Some(agent_type) = agent_type {
            let upper = agent_type.to_uppercase();
            for (keyword, months) in &self.inspection_overrides {
                if upper.contains(&keyword.to_uppercase()) {
                    return *months;
                }
            }
        }
        self.inspection_interval_months
    }

    /// Merges the due-dates forward for one service event.
    ///
    /// Starts from a copy of `prior` and only overwrites the fields the
    /// service type legitimately resets: an inspection touches the inspection
    /// clock, Tier-2 also counts as that month's inspection, Tier-3 resets
    /// every lower tier and records the hydrostatic test, and a substitution
    /// clears everything. A missing or unparseable service date is a no-op.
    pub fn compute_due_dates(
        &self,
        service_type: ServiceType,
        service_date: Option<NaiveDate>,
        agent_type: Option<&str>,
        prior: &DueDates,
    ) -> DueDates {
        let Some(date) = service_date else {
            return prior.clone();
        };

        let mut updated = prior.clone();
        match service_type {
            ServiceType::Substitution => return DueDates::default(),
            ServiceType::Inspection => {
                updated.inspection = Some(add_months(date, self.inspection_months(agent_type)));
            }
            ServiceType::MaintenanceTier2 => {
                updated.inspection = Some(add_months(date, self.inspection_months(agent_type)));
                updated.maintenance_l2 = Some(add_months(date, self.tier2_interval_months));
            }
            ServiceType::MaintenanceTier3 => {
                updated.inspection = Some(add_months(date, self.inspection_months(agent_type)));
                updated.maintenance_l2 = Some(add_months(date, self.tier2_interval_months));
                updated.maintenance_l3 = Some(add_months(date, self.tier3_interval_years * 12));
                updated.last_hydrostatic_test = Some(date);
            }
        }
        updated
    }
}

fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months))
        .unwrap_or(NaiveDate::MAX)
}
