//! Database migration helpers.
//!
//! This module provides utilities for running database migrations
//! and managing schema versions.

use sqlx::PgPool;
use thiserror::Error;

use super::schema;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Database query failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration script failed to execute.
    #[error("migration failed: {0}")]
    MigrationFailed(String),
}

/// Migration runner for applying schema changes.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    /// Creates a new migration runner.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending migrations.
    ///
    /// This method is idempotent - running it multiple times will not
    /// cause errors or duplicate schema objects due to IF NOT EXISTS clauses.
    pub async fn run_migrations(&self) -> Result<(), MigrationError> {
        self.ensure_migrations_table().await?;

        for (idx, statement) in schema::all_schema_statements().iter().enumerate() {
            let migration_name = format!("schema_v1_part_{}", idx);

            if !self.is_migration_applied(&migration_name).await? {
                self.apply_migration(&migration_name, statement).await?;
            }
        }

        Ok(())
    }

    /// Ensures the migrations tracking table exists.
    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                id SERIAL PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Checks if a migration has already been applied.
    async fn is_migration_applied(&self, name: &str) -> Result<bool, MigrationError> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT id FROM _migrations WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(result.is_some())
    }

    /// Applies a single migration and records it.
    async fn apply_migration(&self, name: &str, statement: &str) -> Result<(), MigrationError> {
        // Some schema parts contain multiple statements separated by
        // semicolons; execute each on its own.
        for part in statement.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            sqlx::query(part).execute(&self.pool).await.map_err(|e| {
                MigrationError::MigrationFailed(format!("{name}: {e}"))
            })?;
        }

        sqlx::query("INSERT INTO _migrations (name) VALUES ($1)")
            .bind(name)
            .execute(&self.pool)
            .await?;

        tracing::info!(migration = name, "applied migration");
        Ok(())
    }
}
