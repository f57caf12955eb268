//! File pipeline: bounded input read, transform, result write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;
use uuid::Uuid;

use crate::error::ProcessError;
use crate::storage::ProcessingType;

use super::transform::TransformRequest;

/// Permissions of the result directory.
const RESULT_DIR_MODE: u32 = 0o750;
/// Permissions of each result artifact.
const RESULT_FILE_MODE: u32 = 0o600;

/// Reads input artifacts, runs the transform engine, and writes result
/// artifacts into the result directory.
///
/// No size cap is enforced here; the ingestion front end bounds uploads.
pub struct FilePipeline {
    result_dir: PathBuf,
}

impl FilePipeline {
    /// Creates a pipeline writing into `result_dir`.
    ///
    /// The directory itself is created by [`create_result_dir`] at worker
    /// start.
    pub fn new(result_dir: impl Into<PathBuf>) -> Self {
        Self {
            result_dir: result_dir.into(),
        }
    }

    /// Path of the result artifact for a job.
    ///
    /// Job ids are UUIDs, so the namespace is collision-free by
    /// construction.
    pub fn result_path(&self, job_id: Uuid) -> PathBuf {
        self.result_dir.join(format!("result_{job_id}.txt"))
    }

    /// Runs one job's transformation end to end.
    ///
    /// Parameters are validated before any file I/O. Line counting scans
    /// the input as a stream; every other transform reads the whole file.
    pub async fn execute(
        &self,
        job_id: Uuid,
        file_path: &str,
        processing_type: ProcessingType,
        parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<PathBuf, ProcessError> {
        let request = TransformRequest::parse(processing_type, parameters)?;

        debug!(%job_id, %processing_type, file_path, "running transform");

        let output = match &request {
            TransformRequest::LineCount => count_lines(file_path).await?.to_string(),
            _ => {
                let content = read_input(file_path).await?;
                request.apply(&content)
            }
        };

        self.write_result(job_id, &output).await
    }

    /// Writes the result artifact with mode 0600.
    async fn write_result(&self, job_id: Uuid, content: &str) -> Result<PathBuf, ProcessError> {
        let output_path = self.result_path(job_id);
        let wrap = |source| ProcessError::FileWrite {
            path: output_path.display().to_string(),
            source,
        };

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(RESULT_FILE_MODE)
            .open(&output_path)
            .await
            .map_err(wrap)?;
        file.write_all(content.as_bytes()).await.map_err(wrap)?;
        file.flush().await.map_err(wrap)?;

        Ok(output_path)
    }
}

/// Reads the whole input artifact into memory.
async fn read_input(file_path: &str) -> Result<String, ProcessError> {
    tokio::fs::read_to_string(file_path)
        .await
        .map_err(|source| ProcessError::FileRead {
            path: file_path.to_string(),
            source,
        })
}

/// Counts lines without holding the whole file in memory.
///
/// A trailing unterminated line counts, matching the in-memory engine.
async fn count_lines(file_path: &str) -> Result<usize, ProcessError> {
    let wrap = |source| ProcessError::FileRead {
        path: file_path.to_string(),
        source,
    };

    let file = tokio::fs::File::open(file_path).await.map_err(wrap)?;
    let mut lines = BufReader::new(file).lines();

    let mut count = 0;
    while lines.next_line().await.map_err(wrap)?.is_some() {
        count += 1;
    }

    Ok(count)
}

/// Creates the result directory with mode 0750, including parents.
pub fn create_result_dir(dir: &Path) -> Result<(), ProcessError> {
    use std::os::unix::fs::DirBuilderExt;

    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(RESULT_DIR_MODE)
        .create(dir)
        .map_err(|source| ProcessError::FileWrite {
            path: dir.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_params() -> HashMap<String, serde_json::Value> {
        HashMap::new()
    }

    async fn write_input(dir: &Path, name: &str, content: &str) -> String {
        let path = dir.join(name);
        tokio::fs::write(&path, content).await.expect("write input");
        path.display().to_string()
    }

    #[tokio::test]
    async fn uppercase_writes_result_artifact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_input(dir.path(), "a.txt", "Hello").await;
        let pipeline = FilePipeline::new(dir.path());
        let job_id = Uuid::new_v4();

        let output_path = pipeline
            .execute(job_id, &input, ProcessingType::Uppercase, &no_params())
            .await
            .expect("execute");

        assert_eq!(output_path, dir.path().join(format!("result_{job_id}.txt")));
        let result = tokio::fs::read_to_string(&output_path).await.expect("read");
        assert_eq!(result, "HELLO");
    }

    #[tokio::test]
    async fn result_file_mode_is_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_input(dir.path(), "a.txt", "x").await;
        let pipeline = FilePipeline::new(dir.path());

        let output_path = pipeline
            .execute(Uuid::new_v4(), &input, ProcessingType::WordCount, &no_params())
            .await
            .expect("execute");

        let mode = std::fs::metadata(&output_path)
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn line_count_streams_the_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_input(dir.path(), "lines.txt", "x\ny\n").await;
        let pipeline = FilePipeline::new(dir.path());

        let output_path = pipeline
            .execute(Uuid::new_v4(), &input, ProcessingType::LineCount, &no_params())
            .await
            .expect("execute");
        let result = tokio::fs::read_to_string(&output_path).await.expect("read");
        assert_eq!(result, "2");

        // Unterminated trailing line counts too.
        let input = write_input(dir.path(), "lines2.txt", "x\ny").await;
        let output_path = pipeline
            .execute(Uuid::new_v4(), &input, ProcessingType::LineCount, &no_params())
            .await
            .expect("execute");
        let result = tokio::fs::read_to_string(&output_path).await.expect("read");
        assert_eq!(result, "2");
    }

    #[tokio::test]
    async fn missing_input_surfaces_file_read_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = FilePipeline::new(dir.path());
        let missing = dir.path().join("missing.txt").display().to_string();

        let err = pipeline
            .execute(Uuid::new_v4(), &missing, ProcessingType::Uppercase, &no_params())
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::FileRead { .. }));
        assert!(err.to_string().contains("missing.txt"));
    }

    #[tokio::test]
    async fn invalid_parameters_fail_before_io() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = FilePipeline::new(dir.path());

        // The input path does not exist, but validation runs first.
        let err = pipeline
            .execute(
                Uuid::new_v4(),
                "/nonexistent/input.txt",
                ProcessingType::Extract,
                &no_params(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::InvalidParameter { ref name, .. } if name == "pattern"));
    }

    #[test]
    fn create_result_dir_sets_mode_0750() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("results");
        create_result_dir(&target).expect("create");

        let mode = std::fs::metadata(&target)
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o750);
    }
}
