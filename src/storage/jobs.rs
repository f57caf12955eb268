//! Job record types and repository operations.
//!
//! Every mutation is a single atomic row update; a mutation that affects
//! zero rows surfaces as [`StoreError::NotFound`]. Status transitions are
//! monotonic: `mark_running` is the unique transition into Running and sets
//! worker attribution exactly once, `set_result`/`set_error` close the row.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use super::database::{Database, StoreError};

/// Lifecycle status of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created by the publisher, not yet claimed.
    Pending,
    /// Claimed and attributed to a worker.
    Running,
    /// Terminal: result path recorded.
    Succeeded,
    /// Terminal: error message recorded.
    Failed,
}

impl JobStatus {
    /// Wire/database representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Kind of text transformation a job requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingType {
    /// Count of whitespace-separated runs.
    #[serde(rename = "wordcount")]
    WordCount,
    /// Count of lines, including an unterminated trailing line.
    #[serde(rename = "linecount")]
    LineCount,
    /// Unicode-aware uppercasing of the full content.
    Uppercase,
    /// Unicode-aware lowercasing of the full content.
    Lowercase,
    /// Literal replacement of every non-overlapping occurrence.
    Replace,
    /// All regex matches joined by newlines, in document order.
    Extract,
}

impl ProcessingType {
    /// Wire/database representation of the processing type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingType::WordCount => "wordcount",
            ProcessingType::LineCount => "linecount",
            ProcessingType::Uppercase => "uppercase",
            ProcessingType::Lowercase => "lowercase",
            ProcessingType::Replace => "replace",
            ProcessingType::Extract => "extract",
        }
    }

    /// All recognized processing types.
    pub fn all() -> &'static [ProcessingType] {
        &[
            ProcessingType::WordCount,
            ProcessingType::LineCount,
            ProcessingType::Uppercase,
            ProcessingType::Lowercase,
            ProcessingType::Replace,
            ProcessingType::Extract,
        ]
    }
}

impl fmt::Display for ProcessingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wordcount" => Ok(ProcessingType::WordCount),
            "linecount" => Ok(ProcessingType::LineCount),
            "uppercase" => Ok(ProcessingType::Uppercase),
            "lowercase" => Ok(ProcessingType::Lowercase),
            "replace" => Ok(ProcessingType::Replace),
            "extract" => Ok(ProcessingType::Extract),
            other => Err(format!("unknown processing type: {other}")),
        }
    }
}

/// A job row.
///
/// Identity fields are written once at creation; lifecycle fields are
/// mutated only through the repository operations below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique identifier, shared with the queue message.
    pub id: Uuid,
    /// Filename as submitted by the user.
    pub original_filename: String,
    /// Absolute path of the stored input artifact.
    pub file_path: String,
    /// Requested transformation.
    pub processing_type: ProcessingType,
    /// Transformation parameters (string keys, JSON values).
    pub parameters: serde_json::Value,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Synthetic processing delay in milliseconds.
    pub delay_ms: i32,
    /// Path of the result artifact; set iff succeeded.
    pub result_path: Option<String>,
    /// Human-readable failure cause; set iff failed.
    pub error_message: Option<String>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the job entered Running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Identity of the worker that drove the transition to Running.
    pub worker_id: Option<String>,
}

impl JobRecord {
    /// Creates a new pending record.
    pub fn new(
        id: Uuid,
        original_filename: impl Into<String>,
        file_path: impl Into<String>,
        processing_type: ProcessingType,
        parameters: serde_json::Value,
        delay_ms: i32,
    ) -> Self {
        Self {
            id,
            original_filename: original_filename.into(),
            file_path: file_path.into(),
            processing_type,
            parameters,
            status: JobStatus::Pending,
            delay_ms,
            result_path: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            worker_id: None,
        }
    }
}

/// Filter for listing job rows.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Only rows in this status.
    pub status: Option<JobStatus>,
    /// Maximum number of rows to return (default 100).
    pub limit: Option<i64>,
    /// Number of rows to skip.
    pub offset: i64,
}

fn row_to_job(row: &PgRow) -> Result<JobRecord, StoreError> {
    let status_raw: String = row.try_get("status")?;
    let status = status_raw.parse().map_err(|_| StoreError::Decode {
        column: "status",
        value: status_raw.clone(),
    })?;

    let type_raw: String = row.try_get("processing_type")?;
    let processing_type = type_raw.parse().map_err(|_| StoreError::Decode {
        column: "processing_type",
        value: type_raw.clone(),
    })?;

    Ok(JobRecord {
        id: row.try_get("id")?,
        original_filename: row.try_get("original_filename")?,
        file_path: row.try_get("file_path")?,
        processing_type,
        parameters: row.try_get("parameters")?,
        status,
        delay_ms: row.try_get("delay_ms")?,
        result_path: row.try_get("result_path")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        worker_id: row.try_get("worker_id")?,
    })
}

const JOB_COLUMNS: &str = "id, original_filename, file_path, processing_type, parameters, \
     status, delay_ms, result_path, error_message, created_at, started_at, \
     completed_at, worker_id";

impl Database {
    /// Inserts a new pending job row.
    pub async fn create_job(&self, job: &JobRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, original_filename, file_path, processing_type,
                parameters, status, delay_ms, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(job.id)
        .bind(&job.original_filename)
        .bind(&job.file_path)
        .bind(job.processing_type.as_str())
        .bind(&job.parameters)
        .bind(job.status.as_str())
        .bind(job.delay_ms)
        .bind(job.created_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Fetches a job row by id.
    pub async fn get_job(&self, id: Uuid) -> Result<JobRecord, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => row_to_job(&row),
            None => Err(StoreError::NotFound(id)),
        }
    }

    /// Lists job rows, newest first.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError> {
        let limit = filter.limit.unwrap_or(100).max(1);
        let offset = filter.offset.max(0);

        let rows = match filter.status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = $1 \
                     ORDER BY created_at DESC LIMIT $2 OFFSET $3"
                ))
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs \
                     ORDER BY created_at DESC LIMIT $1 OFFSET $2"
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(self.pool())
                .await?
            }
        };

        rows.iter().map(row_to_job).collect()
    }

    /// Transitions a row into Running, stamping `started_at` and the
    /// claiming worker's identity.
    pub async fn mark_running(&self, id: Uuid, worker_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = $2, started_at = NOW(), worker_id = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(JobStatus::Running.as_str())
        .bind(worker_id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        Ok(())
    }

    /// Closes a row as Succeeded with its result artifact path.
    pub async fn set_result(&self, id: Uuid, result_path: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET result_path = $2, status = $3, completed_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(result_path)
        .bind(JobStatus::Succeeded.as_str())
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        Ok(())
    }

    /// Closes a row as Failed with a human-readable cause.
    pub async fn set_error(&self, id: Uuid, error_message: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET error_message = $2, status = $3, completed_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(error_message)
        .bind(JobStatus::Failed.as_str())
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        Ok(())
    }

    /// Counts all job rows.
    pub async fn count_jobs(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM jobs")
            .fetch_one(self.pool())
            .await?;
        Ok(row.try_get("count")?)
    }

    /// Counts job rows in the given status.
    pub async fn count_jobs_by_status(&self, status: JobStatus) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM jobs WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(self.pool())
            .await?;
        Ok(row.try_get("count")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = status.as_str().parse().expect("should parse");
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<JobStatus>().is_err());
    }

    #[test]
    fn processing_type_round_trip() {
        for ptype in ProcessingType::all() {
            let parsed: ProcessingType = ptype.as_str().parse().expect("should parse");
            assert_eq!(parsed, *ptype);
        }
        assert!("tokenize".parse::<ProcessingType>().is_err());
    }

    #[test]
    fn processing_type_wire_names() {
        assert_eq!(ProcessingType::WordCount.as_str(), "wordcount");
        assert_eq!(ProcessingType::LineCount.as_str(), "linecount");

        let json = serde_json::to_string(&ProcessingType::WordCount).expect("serialize");
        assert_eq!(json, "\"wordcount\"");
        let parsed: ProcessingType = serde_json::from_str("\"extract\"").expect("deserialize");
        assert_eq!(parsed, ProcessingType::Extract);
    }

    #[test]
    fn new_record_is_pending() {
        let id = Uuid::new_v4();
        let record = JobRecord::new(
            id,
            "input.txt",
            "/data/uploads/input.txt",
            ProcessingType::Uppercase,
            serde_json::json!({}),
            0,
        );

        assert_eq!(record.id, id);
        assert_eq!(record.status, JobStatus::Pending);
        assert!(record.started_at.is_none());
        assert!(record.completed_at.is_none());
        assert!(record.result_path.is_none());
        assert!(record.error_message.is_none());
        assert!(record.worker_id.is_none());
    }
}
