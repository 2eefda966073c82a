//! Error taxonomy shared by every stage of job processing.
//!
//! Every fallible collaborator call collapses into one of three kinds:
//! cancellation (give up silently), permanent (record the failure on the job
//! row) or transient (worth another attempt). Retry loops and terminal status
//! writes both consult [`JobError::is_retryable`], so classification lives in
//! exactly one place.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The surrounding scope was cancelled or a deadline elapsed.
    #[error("operation cancelled")]
    Cancelled,
    /// Retrying can never succeed: bad input, missing data, corrupt document.
    #[error("permanent failure: {reason}")]
    Permanent { reason: String },
    /// Anything else. Assumed to be an infrastructure hiccup worth retrying.
    #[error("transient failure: {reason}")]
    Transient { reason: String },
}

impl JobError {
    pub fn permanent(reason: impl Into<String>) -> Self {
        JobError::Permanent {
            reason: reason.into(),
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        JobError::Transient {
            reason: reason.into(),
        }
    }

    /// The single classification predicate: only transient errors retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Transient { .. })
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, JobError::Permanent { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }

    /// Annotate a transient error that exhausted its retry budget with the
    /// number of attempts made. Permanent and cancelled errors pass through.
    pub fn after_attempts(self, attempts: u32) -> Self {
        match self {
            JobError::Transient { reason } => JobError::Transient {
                reason: format!("{reason} (gave up after {attempts} attempts)"),
            },
            other => other,
        }
    }
}

impl From<sqlx::Error> for JobError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => JobError::permanent("job row not found"),
            other => JobError::transient(format!("database error: {other}")),
        }
    }
}

impl From<redis::RedisError> for JobError {
    fn from(error: redis::RedisError) -> Self {
        JobError::transient(format!("queue error: {error}"))
    }
}

impl From<tokio::time::error::Elapsed> for JobError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        JobError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(!JobError::Cancelled.is_retryable());
        assert!(!JobError::permanent("corrupt document").is_retryable());
        assert!(JobError::transient("connection reset").is_retryable());
    }

    #[test]
    fn row_not_found_is_permanent() {
        let error: JobError = sqlx::Error::RowNotFound.into();
        assert!(error.is_permanent());
    }

    #[test]
    fn after_attempts_annotates_transient_only() {
        let transient = JobError::transient("timeout").after_attempts(4);
        assert_eq!(
            transient,
            JobError::transient("timeout (gave up after 4 attempts)")
        );
        assert_eq!(JobError::Cancelled.after_attempts(4), JobError::Cancelled);
        let permanent = JobError::permanent("bad input").after_attempts(4);
        assert_eq!(permanent, JobError::permanent("bad input"));
    }
}
