//! PostgreSQL persistent storage for job records.
//!
//! This module provides the job record store: a row per submitted job whose
//! lifecycle runs Pending -> Running -> {Succeeded, Failed}. The immutable
//! half of a row (identity, input path, parameters) is written once at
//! creation; the mutable half (status, worker attribution, timestamps,
//! result path, error message) is owned by whichever worker drives the job.
//!
//! The storage system consists of:
//! - **Database**: PostgreSQL client and job repository operations
//! - **Migrations**: Idempotent schema management
//! - **Schema**: DDL constants for the jobs table

pub mod database;
pub mod jobs;
pub mod migrations;
pub mod schema;

// Re-export main types for convenience
pub use database::{Database, StoreError};
pub use jobs::{JobFilter, JobRecord, JobStatus, ProcessingType};
pub use migrations::{MigrationError, MigrationRunner};
