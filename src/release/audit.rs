// ABOUTME: Audit sinks receiving a record of every attempt that reaches a terminal stage.
// ABOUTME: JSON-lines file for the CLI, in-memory sink for tests and embedding.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::io::Write;
use std::path::PathBuf;

use crate::types::{ArtifactRef, AttemptId, EnvironmentName, SourceRef};

use super::attempt::ReleaseAttempt;
use super::error::FailureRecord;
use super::stage::Stage;
use super::store::{CreateDirSnafu, ReadSnafu, StoreError, WriteSnafu};

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub attempt_id: AttemptId,
    pub environment: EnvironmentName,
    pub source_ref: SourceRef,
    pub outcome: Stage,
    pub artifact_ref: Option<ArtifactRef>,
    pub previous_artifact_ref: Option<ArtifactRef>,
    pub failure: Option<FailureRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&ReleaseAttempt> for AuditRecord {
    fn from(attempt: &ReleaseAttempt) -> Self {
        Self {
            attempt_id: attempt.id(),
            environment: attempt.environment().clone(),
            source_ref: attempt.source_ref().clone(),
            outcome: attempt.stage(),
            artifact_ref: attempt.artifact_ref().cloned(),
            previous_artifact_ref: attempt.previous_artifact_ref().cloned(),
            failure: attempt.failure().cloned(),
            started_at: attempt.created_at(),
            finished_at: attempt.finished_at(),
        }
    }
}

/// Destination for finished attempts.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, attempt: &ReleaseAttempt) -> Result<(), StoreError>;
}

/// Appends one JSON object per line.
#[derive(Debug, Clone)]
pub struct JsonlAuditLog {
    path: PathBuf,
}

impl JsonlAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Every record in the log, oldest first.
    pub fn read_all(&self) -> Result<Vec<AuditRecord>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(source).context(ReadSnafu {
                    path: self.path.clone(),
                });
            }
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|source| StoreError::Corrupt {
                    path: self.path.clone(),
                    source,
                })
            })
            .collect()
    }

    fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu { path: parent })?;
        }
        let mut line = serde_json::to_string(record).map_err(|e| StoreError::Sink {
            message: e.to_string(),
        })?;
        line.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context(WriteSnafu { path: &self.path })?;
        file.write_all(line.as_bytes())
            .context(WriteSnafu { path: &self.path })
    }
}

#[async_trait]
impl AuditSink for JsonlAuditLog {
    async fn record(&self, attempt: &ReleaseAttempt) -> Result<(), StoreError> {
        // One small append; synchronous like the attempt snapshots
        self.append(&AuditRecord::from(attempt))
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, attempt: &ReleaseAttempt) -> Result<(), StoreError> {
        self.records.lock().push(AuditRecord::from(attempt));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished_attempt() -> ReleaseAttempt {
        let mut attempt = ReleaseAttempt::new(
            SourceRef::new("abc123").unwrap(),
            EnvironmentName::new("staging").unwrap(),
        );
        attempt.advance(Stage::Testing).unwrap();
        attempt
            .record_failure(&crate::release::ReleaseError::TestFailure("2 failed".into()))
            .unwrap();
        attempt.advance(Stage::Failed).unwrap();
        attempt
    }

    #[tokio::test]
    async fn jsonl_log_appends_records() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlAuditLog::new(dir.path().join("nested").join("audit.jsonl"));

        let attempt = finished_attempt();
        log.record(&attempt).await.unwrap();
        log.record(&attempt).await.unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome, Stage::Failed);
        assert_eq!(records[0].attempt_id, attempt.id());
    }

    #[test]
    fn missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlAuditLog::new(dir.path().join("audit.jsonl"));
        assert!(log.read_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_sink_keeps_failure() {
        let sink = MemoryAuditSink::new();
        sink.record(&finished_attempt()).await.unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let failure = records[0].failure.as_ref().unwrap();
        assert_eq!(failure.kind, crate::release::ReleaseErrorKind::TestFailure);
    }
}
