pub mod action_plan;
pub mod record;
pub mod schedule;

pub use action_plan::{ActionPlanner, PlanRule, OUT_OF_SERVICE_MARKER};
pub use record::{
    latest_record, Approval, DueDates, GeoPoint, InspectionRecord, ServiceType,
};
pub use schedule::SchedulePolicy;
