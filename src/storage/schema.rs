//! Database schema constants.
//!
//! This module contains the SQL schema definitions for the PostgreSQL
//! storage backend.

/// SQL schema for creating the jobs table.
pub const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY,
    original_filename TEXT NOT NULL,
    file_path TEXT NOT NULL,
    processing_type TEXT NOT NULL,
    parameters JSONB NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'pending',
    result_path TEXT,
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    worker_id TEXT,
    delay_ms INTEGER NOT NULL DEFAULT 0
)
"#;

/// SQL for creating all required indexes.
pub const CREATE_JOBS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);
CREATE INDEX IF NOT EXISTS idx_jobs_worker_id ON jobs(worker_id)
"#;

/// Returns all schema creation statements in the correct order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![CREATE_JOBS_TABLE, CREATE_JOBS_INDEXES]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_are_idempotent() {
        for statement in all_schema_statements() {
            assert!(statement.contains("IF NOT EXISTS"));
        }
    }

    #[test]
    fn jobs_table_has_lifecycle_columns() {
        for column in [
            "status",
            "result_path",
            "error_message",
            "started_at",
            "completed_at",
            "worker_id",
            "delay_ms",
        ] {
            assert!(
                CREATE_JOBS_TABLE.contains(column),
                "missing column {column}"
            );
        }
    }
}
