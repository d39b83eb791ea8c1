//! # Health Records CLI (`hrec`)
//!
//! Command-line front end for the tag-indexed record store.
//!
//! ## Usage
//!
//! ```bash
//! hrec --config ./config/hrec.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hrec init` | Open the configured backend and create its schema |
//! | `hrec add <type>` | Validate and store a new record |
//! | `hrec query` | List records matching all given filters |
//! | `hrec get <id>` | Print one record |
//! | `hrec delete-patient <id>` | Delete every record of a patient |
//! | `hrec stats` | Record counts per type |
//! | `hrec audit` | Check index sets against stored records |
//!
//! ## Examples
//!
//! ```bash
//! hrec add lab_result --patient 123 --provider "Dr. Smith" \
//!     --field value=10.5 --field "description=Blood Test"
//! hrec query --patient 123 --type lab_result
//! hrec delete-patient 123
//! ```
//!
//! Results are printed to stdout as JSON; logs go to stderr. Invalid input
//! exits with status 2, storage failures with status 1. The store is closed
//! before the process exits, on success and on failure.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use health_records::config::{self, Config};
use health_records::record::{self, FieldMap};
use health_records::store::{RecordQuery, RecordStore};
use health_records::Error;

/// Health Records CLI: store and query typed health records by patient,
/// record type, or provider.
#[derive(Parser)]
#[command(
    name = "hrec",
    about = "Tag-indexed health record store",
    version,
    long_about = "Stores lab results, prescriptions, appointment notes and self-measurements \
    as flat field maps with patient, type and provider index sets, and answers filter \
    queries by intersecting those sets."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/hrec.toml`. When the file does not exist an
    /// in-memory store is used.
    #[arg(long, global = true, default_value = "./config/hrec.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Open the configured backend and create its schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Validate and store a new record.
    ///
    /// Variant fields are passed as repeated `--field key=value` pairs:
    /// `value`/`description` for lab_result and self_measurement,
    /// `dose`/`drug` for prescription, `note` for appointment_note.
    Add {
        /// Record type: lab_result, prescription, appointment_note, self_measurement.
        record_type: String,

        /// Patient identifier.
        #[arg(long, value_parser = parse_non_empty)]
        patient: String,

        /// Provider name.
        #[arg(long)]
        provider: Option<String>,

        /// Variant field as `key=value`.
        #[arg(long = "field", value_parser = parse_key_val)]
        fields: Vec<(String, String)>,

        /// Creation time (RFC 3339). Defaults to now.
        #[arg(long, value_parser = parse_timestamp)]
        timestamp: Option<DateTime<Utc>>,
    },

    /// List records matching every given filter.
    ///
    /// With no filters, lists all records.
    Query {
        /// Only records of this patient.
        #[arg(long)]
        patient: Option<String>,

        /// Only records of this type.
        #[arg(long = "type")]
        record_type: Option<String>,

        /// Only records naming this provider.
        #[arg(long)]
        provider: Option<String>,
    },

    /// Print one record by id.
    Get {
        /// Record id.
        id: String,
    },

    /// Delete every record of a patient.
    DeletePatient {
        /// Patient identifier.
        patient_id: String,
    },

    /// Show record counts per type.
    Stats,

    /// Check index sets against stored records.
    Audit {
        /// Fix dangling and missing index entries.
        #[arg(long)]
        repair: bool,
    },
}

/// Parse a `key=value` pair for `--field` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn parse_non_empty(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        Err("must not be empty".to_string())
    } else {
        Ok(s.to_string())
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp '{}': {}", s, e))
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Process exit status for a failed command: 2 for bad input, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<Error>() {
        Some(e) if e.is_client_error() => 2,
        _ => 1,
    }
}

/// Run one command against an open store and return its exit status.
async fn run(store: &RecordStore, command: Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Init => {
            println!("Store initialized ({}).", store.backend_name());
        }
        Commands::Add {
            record_type,
            patient,
            provider,
            fields,
            timestamp,
        } => {
            let fields: FieldMap = fields.into_iter().collect();
            let built = match timestamp {
                Some(ts) => record::build_at(&record_type, &patient, provider.as_deref(), &fields, ts),
                None => record::build(&record_type, &patient, provider.as_deref(), &fields),
            };
            let record = built.map_err(Error::from)?;
            let stored = store.put(&record).await.map_err(Error::from)?;
            print_json(&stored)?;
        }
        Commands::Query {
            patient,
            record_type,
            provider,
        } => {
            let query = RecordQuery {
                patient_id: patient,
                record_type,
                provider,
            };
            let records = store.query(&query).await.map_err(Error::from)?;
            print_json(&records)?;
        }
        Commands::Get { id } => match store.get(&id).await.map_err(Error::from)? {
            Some(fields) => print_json(&fields)?,
            None => {
                eprintln!("Error: record not found: {}", id);
                return Ok(1);
            }
        },
        Commands::DeletePatient { patient_id } => {
            let deleted = store
                .delete_by_patient(&patient_id)
                .await
                .map_err(Error::from)?;
            print_json(&serde_json::json!({ "deleted": deleted }))?;
        }
        Commands::Stats => {
            let stats = store.stats().await.map_err(Error::from)?;
            print_json(&stats)?;
        }
        Commands::Audit { repair } => {
            let result = if repair {
                store.repair().await
            } else {
                store.audit().await
            };
            let report = result.map_err(Error::from)?;
            print_json(&report)?;
            if !repair && !report.is_consistent() {
                return Ok(1);
            }
        }
    }
    Ok(0)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        Config::minimal()
    };
    init_tracing(&cfg.logging.level);

    let store = RecordStore::open(&cfg)
        .await
        .context("Failed to open record store")?;

    let outcome = run(&store, cli.command).await;
    store.close().await?;

    match outcome {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {}", err);
            std::process::exit(exit_code(&err));
        }
    }
}
