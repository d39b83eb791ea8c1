//! # Health Records
//!
//! A tag-indexed store for small, typed health records: lab results,
//! prescriptions, appointment notes and self-measurements.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐
//! │ record::build│──▶│ RecordStore  │──▶│ Backend              │
//! │  + render    │   │ put / query  │   │ memory/sqlite/redis  │
//! └──────────────┘   │ delete       │   └──────────────────────┘
//!                    └──────┬───────┘
//!                           ▼
//!                      ┌──────────┐
//!                      │   CLI    │
//!                      │  (hrec)  │
//!                      └──────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The caller builds a [`record::HealthRecord`] with [`record::build`],
//!    which validates the variant and its required fields.
//! 2. [`store::RecordStore::put`] renders it to a flat [`record::FieldMap`],
//!    writes it under `health_record:<id>`, and adds the id to the
//!    `patient:`, `type:` and `provider:` index sets.
//! 3. [`store::RecordStore::query`] intersects the index sets named by the
//!    query and resolves the surviving ids to field maps.
//! 4. [`store::RecordStore::delete_by_patient`] removes a patient's records
//!    and every index entry that referenced them.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`record`] | Record variants, validation and field-map rendering |
//! | [`store`] | Indexed store, backends, audit and repair |
//! | [`error`] | Validation and backend error types |
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | SQLite schema for the key-value tables |

pub mod config;
pub mod db;
pub mod error;
pub mod migrate;
pub mod record;
pub mod store;

pub use error::{BackendError, Error, ErrorKind, ValidationError};
pub use record::{build, build_at, render, FieldMap, HealthRecord, RecordType};
pub use store::{RecordQuery, RecordStore};
