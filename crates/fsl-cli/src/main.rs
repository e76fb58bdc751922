use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use fsl_core::action_plan::ActionPlanner;
use fsl_core::record::{Approval, GeoPoint, ServiceType};
use fsl_core::schedule::SchedulePolicy;
use fsl_corrective::{CorrectiveAction, CorrectiveActionOrchestrator, CorrectiveError, CorrectiveOutcome};
use fsl_intake::{parse_extraction_batch, IntakePipeline};
use fsl_status::StatusConsolidator;
use fsl_storage::{LedgerStore, SqliteLedger};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fsl")]
#[command(about = "Fire-safety equipment compliance ledger", long_about = None)]
struct Cli {
    /// Path to the ledger database (defaults to the platform data dir).
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Optional TOML file overriding the maintenance schedule policy.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a JSON batch produced by the document extraction step
    Ingest {
        file: PathBuf,
        #[arg(long, value_enum)]
        service: ServiceArg,
    },
    /// Record a quick field inspection for known equipment
    Inspect {
        equipment_id: String,
        #[arg(long, value_enum)]
        result: ResultArg,
        #[arg(long, default_value = "")]
        observations: String,
        #[arg(long)]
        inspector: String,
        #[arg(long)]
        lat: Option<f64>,
        #[arg(long)]
        lon: Option<f64>,
        #[arg(long)]
        accuracy: Option<f64>,
    },
    /// Show the consolidated compliance board
    Status {
        /// Include out-of-service equipment.
        #[arg(long)]
        all: bool,
        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Resolve a non-conformity in place
    Resolve {
        equipment_id: String,
        #[arg(long)]
        action: String,
        #[arg(long)]
        responsible: String,
        #[arg(long)]
        operator: Option<String>,
    },
    /// Retire equipment and install a substitute at its location
    Substitute {
        equipment_id: String,
        #[arg(long)]
        substitute: String,
        #[arg(long)]
        action: String,
        #[arg(long)]
        responsible: String,
        #[arg(long)]
        operator: Option<String>,
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lon: f64,
    },
    /// Print the full service history of one equipment ID
    History { equipment_id: String },
    /// Print the corrective-action audit log
    AuditLog,
}

#[derive(Clone, Copy, ValueEnum)]
enum ServiceArg {
    Inspection,
    Tier2,
    Tier3,
}

impl From<ServiceArg> for ServiceType {
    fn from(value: ServiceArg) -> Self {
        match value {
            ServiceArg::Inspection => ServiceType::Inspection,
            ServiceArg::Tier2 => ServiceType::MaintenanceTier2,
            ServiceArg::Tier3 => ServiceType::MaintenanceTier3,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ResultArg {
    Pass,
    Fail,
}

impl From<ResultArg> for Approval {
    fn from(value: ResultArg) -> Self {
        match value {
            ResultArg::Pass => Approval::Pass,
            ResultArg::Fail => Approval::Fail,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    schedule: SchedulePolicy,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let cli = Cli::parse();
    let policy = load_policy(cli.config.clone())?;
    let store = open_store(cli.db.clone())?;
    let today = Local::now().date_naive();

    match cli.command {
        Commands::Ingest { file, service } => {
            let body = fs::read_to_string(&file)
                .with_context(|| format!("failed to read batch file {}", file.display()))?;
            let batch = parse_extraction_batch(&body).context("failed to parse batch JSON")?;

            let pipeline = IntakePipeline::new(policy, ActionPlanner::default());
            let report = pipeline.ingest_batch(&store, service.into(), &batch)?;
            println!(
                "Ingested {} record(s), skipped {}.",
                report.appended, report.skipped
            );
        }
        Commands::Inspect {
            equipment_id,
            result,
            observations,
            inspector,
            lat,
            lon,
            accuracy,
        } => {
            let location = match (lat, lon) {
                (Some(latitude), Some(longitude)) => Some(GeoPoint {
                    latitude,
                    longitude,
                    accuracy,
                }),
                (None, None) => None,
                _ => bail!("--lat and --lon must be given together"),
            };

            let pipeline = IntakePipeline::new(policy, ActionPlanner::default());
            let record = pipeline.record_field_inspection(
                &store,
                &equipment_id,
                result.into(),
                &observations,
                &inspector,
                location,
                today,
            )?;
            println!("Recorded inspection for {equipment_id}.");
            println!("  action plan: {}", record.action_plan);
            if let Some(due) = record.due_dates.inspection {
                println!("  next inspection due: {due}");
            }
        }
        Commands::Status { all, json } => {
            let consolidator = StatusConsolidator::new(policy);
            let records = store.all_records()?;
            let board = if all {
                consolidator.status_board(&records, today)
            } else {
                consolidator.active_board(&records, today)
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&board)?);
            } else if board.is_empty() {
                println!("No equipment with usable history.");
            } else {
                for status in &board {
                    println!(
                        "{:<12} {:<15} next due {}  {}",
                        status.equipment_id,
                        status.status,
                        status
                            .next_due
                            .map(|due| due.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        status.last_action_plan,
                    );
                }
            }
        }
        Commands::Resolve {
            equipment_id,
            action,
            responsible,
            operator,
        } => {
            let orchestrator = CorrectiveActionOrchestrator::new(policy, ActionPlanner::default());
            let operator = operator.unwrap_or_else(|| responsible.clone());
            let details = CorrectiveAction {
                action_taken: action,
                responsible,
                substitute_id: None,
                location: None,
            };
            apply_corrective(&orchestrator, &store, &equipment_id, &details, &operator, today)?;
        }
        Commands::Substitute {
            equipment_id,
            substitute,
            action,
            responsible,
            operator,
            lat,
            lon,
        } => {
            let orchestrator = CorrectiveActionOrchestrator::new(policy, ActionPlanner::default());
            let operator = operator.unwrap_or_else(|| responsible.clone());
            let details = CorrectiveAction {
                action_taken: action,
                responsible,
                substitute_id: Some(substitute),
                location: Some(GeoPoint {
                    latitude: lat,
                    longitude: lon,
                    accuracy: None,
                }),
            };
            apply_corrective(&orchestrator, &store, &equipment_id, &details, &operator, today)?;
        }
        Commands::History { equipment_id } => {
            let records = store.records_for_equipment(&equipment_id)?;
            if records.is_empty() {
                println!("No records for {equipment_id}.");
            }
            for record in records {
                println!(
                    "{:<12} {:<15} approval {:<5} {}",
                    record.service_date,
                    record.service_type,
                    record
                        .approval
                        .map(|approval| approval.as_str())
                        .unwrap_or("-"),
                    record.action_plan,
                );
            }
        }
        Commands::AuditLog => {
            for entry in store.audit_entries()? {
                println!(
                    "{} {:<12} {} -> {} (responsible: {}{})",
                    entry.date,
                    entry.equipment_id,
                    entry.problem,
                    entry.action_taken,
                    entry.responsible,
                    entry
                        .substitute_id
                        .map(|id| format!(", substitute: {id}"))
                        .unwrap_or_default(),
                );
            }
        }
    }

    Ok(())
}

fn apply_corrective(
    orchestrator: &CorrectiveActionOrchestrator,
    store: &dyn LedgerStore,
    equipment_id: &str,
    details: &CorrectiveAction,
    operator: &str,
    today: NaiveDate,
) -> Result<()> {
    match orchestrator.apply(store, equipment_id, details, operator, today) {
        Ok(CorrectiveOutcome::Resolved(record)) => {
            println!("Resolved in place for {equipment_id}.");
            if let Some(due) = record.due_dates.inspection {
                println!("  next inspection due: {due}");
            }
            Ok(())
        }
        Ok(CorrectiveOutcome::Substituted { installed, .. }) => {
            println!(
                "Retired {equipment_id}; installed {} at its location.",
                installed.equipment_id
            );
            Ok(())
        }
        // Partial states are committed ledger facts; print them explicitly so
        // the operator can reconcile instead of blindly retrying.
        Err(err @ CorrectiveError::InstallPending { .. }) => {
            eprintln!("PARTIAL: {err}");
            bail!("substitution left in a partial state");
        }
        Err(err @ CorrectiveError::AuditPending { .. }) => {
            eprintln!("PARTIAL: {err}");
            bail!("audit log entry is missing for a committed action");
        }
        Err(err) => Err(err.into()),
    }
}

fn load_policy(config: Option<PathBuf>) -> Result<SchedulePolicy> {
    let Some(path) = config else {
        return Ok(SchedulePolicy::default());
    };
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: CliConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(config.schedule)
}

fn open_store(db: Option<PathBuf>) -> Result<SqliteLedger> {
    let path = match db {
        Some(path) => path,
        None => {
            let base = dirs::data_dir().context("no platform data directory available")?;
            let dir = base.join("fsl");
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            dir.join("ledger.db")
        }
    };
    SqliteLedger::open(&path)
        .with_context(|| format!("failed to open ledger at {}", path.display()))
}
