//! The persistent unit of work: one uploaded resume awaiting text extraction.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0} is not a valid JobStatus")]
pub struct ParseJobStatusError(String);

/// Enumeration of possible statuses for a Job.
///
/// Statuses only move forward: queued -> processing -> completed | failed
/// (or queued -> failed when the job never reached a worker). The executor is
/// the only writer after ingress, which is what makes the ordering hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting on the queue to be picked up by a worker.
    Queued,
    /// Picked up by a worker, extraction in progress.
    Processing,
    /// Text extracted and persisted.
    Completed,
    /// Terminally failed; `error_message` holds the cause.
    Failed,
}

impl JobStatus {
    /// Completed and failed jobs are never touched again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allow casting JobStatus from the lowercase strings stored in the database.
impl FromStr for JobStatus {
    type Err = ParseJobStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            invalid => Err(ParseJobStatusError(invalid.to_owned())),
        }
    }
}

/// A resume-processing job as stored in the `jobs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Time-ordered unique identifier, generated at ingress.
    pub id: Uuid,
    /// Current position in the state machine.
    pub status: JobStatus,
    /// Key locating the uploaded document in the blob store.
    #[serde(rename = "fileKey")]
    pub file_key: String,
    /// Extracted text; absent until the job completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Human-readable cause; present exactly when the job failed.
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Wall-clock timestamp assigned at ingress.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// A freshly ingested job, before any worker has seen it.
    pub fn new(id: Uuid, file_key: impl Into<String>) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            file_key: file_key.into(),
            content: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
    }

    #[test]
    fn unknown_status_string_is_rejected() {
        assert!("running".parse::<JobStatus>().is_err());
        assert!("Queued".parse::<JobStatus>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn serialized_record_omits_absent_fields() {
        let job = Job::new(Uuid::now_v7(), "abc-pdf");
        let value = serde_json::to_value(&job).expect("failed to serialize job");
        assert_eq!(value["status"], "queued");
        assert_eq!(value["fileKey"], "abc-pdf");
        assert!(value.get("content").is_none());
        assert!(value.get("errorMessage").is_none());
    }
}
