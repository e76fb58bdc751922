use crate::{LedgerStore, StorageError};
use fsl_core::record::InspectionRecord;
use std::time::{Duration, Instant};

/// TTL-bounded snapshot of a full ledger read.
///
/// The consolidation core always operates on whatever snapshot it is handed;
/// this cache sits strictly outside it, at the call site that owns the read.
/// Writers should call `invalidate` after appending so the next read sees
/// their own rows.
pub struct SnapshotCache {
    ttl: Duration,
    cached: Option<(Instant, Vec<InspectionRecord>)>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, cached: None }
    }

    pub fn snapshot(&mut self, store: &dyn LedgerStore) -> Result<&[InspectionRecord], StorageError> {
        let stale = match &self.cached {
            Some((fetched_at, _)) => fetched_at.elapsed() >= self.ttl,
            None => true,
        };
        if stale {
            self.cached = Some((Instant::now(), store.all_records()?));
        }
        Ok(self
            .cached
            .as_ref()
            .map(|(_, records)| records.as_slice())
            .unwrap_or(&[]))
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteLedger;
    use fsl_core::record::{DueDates, ServiceType};

    fn record(equipment_id: &str) -> InspectionRecord {
        InspectionRecord {
            equipment_id: equipment_id.to_string(),
            agent_type: None,
            capacity: None,
            manufacturer: None,
            seal_id: None,
            service_type: ServiceType::Inspection,
            service_date: "2024-01-10".to_string(),
            inspector: None,
            approval: None,
            observations: String::new(),
            action_plan: String::new(),
            location: None,
            due_dates: DueDates::default(),
        }
    }

    #[test]
    fn serves_the_cached_snapshot_within_ttl() {
        let db = SqliteLedger::open_in_memory().expect("open db");
        db.append_record(&record("E1")).expect("append");

        let mut cache = SnapshotCache::new(Duration::from_secs(600));
        assert_eq!(cache.snapshot(&db).expect("snapshot").len(), 1);

        db.append_record(&record("E2")).expect("append");
        // Still within TTL: the new row is not visible yet.
        assert_eq!(cache.snapshot(&db).expect("snapshot").len(), 1);
    }

    #[test]
    fn invalidate_forces_a_fresh_read() {
        let db = SqliteLedger::open_in_memory().expect("open db");
        db.append_record(&record("E1")).expect("append");

        let mut cache = SnapshotCache::new(Duration::from_secs(600));
        assert_eq!(cache.snapshot(&db).expect("snapshot").len(), 1);

        db.append_record(&record("E2")).expect("append");
        cache.invalidate();
        assert_eq!(cache.snapshot(&db).expect("snapshot").len(), 2);
    }

    #[test]
    fn zero_ttl_always_refreshes() {
        let db = SqliteLedger::open_in_memory().expect("open db");
        let mut cache = SnapshotCache::new(Duration::ZERO);
        assert!(cache.snapshot(&db).expect("snapshot").is_empty());

        db.append_record(&record("E1")).expect("append");
        assert_eq!(cache.snapshot(&db).expect("snapshot").len(), 1);
    }
}
