use crate::record::Approval;
use regex::Regex;

/// Written as the action plan of a retirement record by the substitution
/// transition; the consolidator keys the OutOfService state off it.
pub const OUT_OF_SERVICE_MARKER: &str = "OUT OF SERVICE (SUBSTITUTED)";

pub const ROUTINE_MONITORING_PLAN: &str = "Keep under routine periodic monitoring.";
pub const NOT_APPLICABLE_PLAN: &str = "N/A";

/// One prioritized remediation rule: first pattern hit wins.
#[derive(Debug, Clone)]
pub struct PlanRule {
    pattern: Regex,
    remediation: String,
}

impl PlanRule {
    pub fn new(pattern: &str, remediation: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            remediation: remediation.to_string(),
        })
    }

    pub fn remediation(&self) -> &str {
        &self.remediation
    }
}

/// Maps a failed inspection's free-text observations to a prescribed
/// remediation. Pure and deterministic; never reads the ledger.
///
/// The rule list is a priority order, critical defects before cosmetic ones,
/// not an alphabetical catalogue.
#[derive(Debug, Clone)]
pub struct ActionPlanner {
    rules: Vec<PlanRule>,
}

impl Default for ActionPlanner {
    fn default() -> Self {
        let rules = [
            (
                r"(?i)\b(manometer|gauge)\b",
                "Replace the pressure gauge immediately.",
            ),
            (
                r"(?i)\b(trigger|handle)\b",
                "Replace the trigger assembly.",
            ),
            (
                r"(?i)\b(hose|nozzle)\b",
                "Replace the discharge hose/nozzle assembly.",
            ),
            (
                r"(?i)\b(recharge|recharging|refill)\b",
                "Send the unit out for recharge.",
            ),
            (
                r"(?i)\b(seal|tamper)\b",
                "Replace the tamper seal and investigate the violation.",
            ),
            (
                r"(?i)\b(paint|painting|corrosion|rust)\b",
                "Schedule corrective repainting of the shell.",
            ),
        ]
        .iter()
        .map(|(pattern, remediation)| {
            PlanRule::new(pattern, remediation).expect("built-in pattern is valid")
        })
        .collect();

        Self { rules }
    }
}

impl ActionPlanner {
    pub fn with_rules(rules: Vec<PlanRule>) -> Self {
        Self { rules }
    }

    pub fn generate(&self, approval: Option<Approval>, observations: &str) -> String {
        match approval {
            Some(Approval::Pass) => ROUTINE_MONITORING_PLAN.to_string(),
            Some(Approval::Fail) => {
                for rule in &self.rules {
                    if rule.pattern.is_match(observations) {
                        return rule.remediation.clone();
                    }
                }
                // Fallback keeps the operator's text intact rather than
                // dropping information the rule table does not recognize.
                format!("Review and correct the non-conformity: {observations}")
            }
            _ => NOT_APPLICABLE_PLAN.to_string(),
        }
    }
}
