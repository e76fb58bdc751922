pub mod cache;

pub use cache::SnapshotCache;

use chrono::NaiveDate;
use fsl_core::record::{Approval, DueDates, GeoPoint, InspectionRecord, ServiceType};
use rusqlite::{params, Connection};
use std::path::Path;
use thiserror::Error;

pub const LEDGER_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// One row of the corrective-action audit log. `problem` is the action plan
/// the equipment carried before the transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub date: NaiveDate,
    pub equipment_id: String,
    pub problem: String,
    pub action_taken: String,
    pub responsible: String,
    pub substitute_id: Option<String>,
}

/// Append-only event sink shared by every record creation path.
///
/// The store is injected into the consolidator and orchestrator explicitly;
/// there is no module-level shared client. Appends are independent: no retry,
/// no rollback of previously committed rows.
pub trait LedgerStore {
    fn append_record(&self, record: &InspectionRecord) -> Result<(), StorageError>;
    fn all_records(&self) -> Result<Vec<InspectionRecord>, StorageError>;
    fn records_for_equipment(
        &self,
        equipment_id: &str,
    ) -> Result<Vec<InspectionRecord>, StorageError>;
    fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), StorageError>;
    fn audit_entries(&self) -> Result<Vec<AuditEntry>, StorageError>;
}

pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > LEDGER_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: LEDGER_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_ledger_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        use rusqlite::OptionalExtension;
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?1 LIMIT 1",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    fn query_records(
        &self,
        sql: &str,
        filter: Option<&str>,
    ) -> Result<Vec<InspectionRecord>, StorageError> {
        let mut statement = self.conn.prepare(sql)?;

        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<InspectionRecord> {
            let service_type_raw: String = row.get(5)?;
            let service_type = service_type_raw.parse::<ServiceType>().map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, err)),
                )
            })?;
            let approval = row
                .get::<_, Option<String>>(8)?
                .and_then(|value| value.parse::<Approval>().ok());

            let latitude: Option<f64> = row.get(11)?;
            let longitude: Option<f64> = row.get(12)?;
            let location = match (latitude, longitude) {
                (Some(latitude), Some(longitude)) => Some(GeoPoint {
                    latitude,
                    longitude,
                    accuracy: row.get(13)?,
                }),
                _ => None,
            };

            Ok(InspectionRecord {
                equipment_id: row.get(0)?,
                agent_type: row.get(1)?,
                capacity: row.get(2)?,
                manufacturer: row.get(3)?,
                seal_id: row.get(4)?,
                service_type,
                service_date: row.get(6)?,
                inspector: row.get(7)?,
                approval,
                observations: row.get(9)?,
                action_plan: row.get(10)?,
                location,
                due_dates: DueDates {
                    inspection: parse_date_opt(row.get(14)?),
                    maintenance_l2: parse_date_opt(row.get(15)?),
                    maintenance_l3: parse_date_opt(row.get(16)?),
                    last_hydrostatic_test: parse_date_opt(row.get(17)?),
                },
            })
        };

        let rows = match filter {
            Some(value) => statement.query_map([value], map_row)?,
            None => statement.query_map([], map_row)?,
        };

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

const RECORD_COLUMNS: &str = "
    equipment_id, agent_type, capacity, manufacturer, seal_id,
    service_type, service_date, inspector, approval, observations,
    action_plan, latitude, longitude, accuracy,
    inspection_due, maintenance_l2_due, maintenance_l3_due, last_hydrostatic_test
";

impl LedgerStore for SqliteLedger {
    fn append_record(&self, record: &InspectionRecord) -> Result<(), StorageError> {
        self.conn.execute(
            &format!(
                "
                INSERT INTO inspection_records ({RECORD_COLUMNS})
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                "
            ),
            params![
                record.equipment_id,
                record.agent_type,
                record.capacity,
                record.manufacturer,
                record.seal_id,
                record.service_type.as_str(),
                record.service_date,
                record.inspector,
                record.approval.map(|approval| approval.as_str()),
                record.observations,
                record.action_plan,
                record.location.as_ref().map(|point| point.latitude),
                record.location.as_ref().map(|point| point.longitude),
                record.location.as_ref().and_then(|point| point.accuracy),
                record.due_dates.inspection.map(iso),
                record.due_dates.maintenance_l2.map(iso),
                record.due_dates.maintenance_l3.map(iso),
                record.due_dates.last_hydrostatic_test.map(iso),
            ],
        )?;
        Ok(())
    }

    fn all_records(&self) -> Result<Vec<InspectionRecord>, StorageError> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM inspection_records ORDER BY seq ASC"
            ),
            None,
        )
    }

    fn records_for_equipment(
        &self,
        equipment_id: &str,
    ) -> Result<Vec<InspectionRecord>, StorageError> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM inspection_records WHERE equipment_id = ?1 ORDER BY seq ASC"
            ),
            Some(equipment_id),
        )
    }

    fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO corrective_action_log (
                entry_date, equipment_id, problem, action_taken, responsible, substitute_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                iso(entry.date),
                entry.equipment_id,
                entry.problem,
                entry.action_taken,
                entry.responsible,
                entry.substitute_id,
            ],
        )?;
        Ok(())
    }

    fn audit_entries(&self) -> Result<Vec<AuditEntry>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT entry_date, equipment_id, problem, action_taken, responsible, substitute_id
            FROM corrective_action_log
            ORDER BY seq ASC
            ",
        )?;

        let rows = statement.query_map([], |row| {
            let raw_date: String = row.get(0)?;
            let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d").map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(err),
                )
            })?;

            Ok(AuditEntry {
                date,
                equipment_id: row.get(1)?,
                problem: row.get(2)?,
                action_taken: row.get(3)?,
                responsible: row.get(4)?,
                substitute_id: row.get(5)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

// Stored due dates written by older tooling can be junk; a bad value reads
// back as null rather than failing the whole snapshot.
fn parse_date_opt(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|value| NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok())
}
