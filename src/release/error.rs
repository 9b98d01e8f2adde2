// ABOUTME: Error types for release attempts.
// ABOUTME: Each stage failure has its own variant; kinds are stored on the attempt for auditing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::ArtifactRef;

use super::lock::LockInfo;
use super::stage::Stage;
use super::store::StoreError;

/// Errors that end, or threaten to end, a release attempt.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    /// Test runner reported failure, errored or timed out.
    #[error("tests failed: {0}")]
    TestFailure(String),

    /// Builder did not produce a valid artifact.
    #[error("build failed: {0}")]
    BuildError(String),

    /// Registry rejected the artifact on every attempt.
    #[error("push failed after {attempts} attempt(s): {message}")]
    PushError { attempts: u32, message: String },

    /// Platform update request did not return in time.
    #[error("platform update timed out after {}s", .0.as_secs())]
    DeployTimeout(Duration),

    /// Platform rejected the update or its state could not be read.
    #[error("platform update failed: {0}")]
    DeployFailed(String),

    /// A read-only platform or registry query kept timing out.
    #[error("{collaborator} did not report the running artifact after {attempts} attempt(s) of {}s each", .limit.as_secs_f64())]
    QueryTimeout {
        collaborator: &'static str,
        attempts: u32,
        limit: Duration,
    },

    /// Observation window elapsed without enough healthy instances.
    #[error("health check window of {}s elapsed without enough healthy instances", .0.as_secs())]
    HealthCheckTimeout(Duration),

    /// Instances stayed unhealthy beyond the configured tolerance.
    #[error("health check failed: {0}")]
    HealthCheckFailed(String),

    /// Rolling back to the previous artifact did not restore a healthy system.
    #[error("rollback failed: {0}")]
    RollbackFailure(String),

    /// Operator requested an abort.
    #[error("release aborted by operator")]
    Aborted,

    /// Another attempt holds the environment.
    #[error(
        "environment {} already has an active release (attempt {} on {} pid {} since {})",
        .0.environment, .0.attempt_id, .0.holder, .0.pid, .0.started_at
    )]
    Conflict(Box<LockInfo>),

    /// Lock file could not be created, read or removed.
    #[error("lock error: {0}")]
    Lock(String),

    #[error("invalid stage transition from {from} to {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("artifact reference already assigned: {0}")]
    ArtifactAlreadyAssigned(ArtifactRef),

    #[error("invalid attempt state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error kind for programmatic handling and audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseErrorKind {
    TestFailure,
    BuildError,
    PushError,
    DeployTimeout,
    DeployFailed,
    QueryTimeout,
    HealthCheckTimeout,
    HealthCheckFailed,
    RollbackFailure,
    Aborted,
    Conflict,
    Lock,
    Internal,
    Store,
}

impl ReleaseErrorKind {
    /// Retried locally before the attempt is failed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ReleaseErrorKind::PushError | ReleaseErrorKind::QueryTimeout
        )
    }

    /// Needs an operator: the known-good state may be broken too.
    pub fn is_fatal(self) -> bool {
        matches!(self, ReleaseErrorKind::RollbackFailure)
    }
}

impl ReleaseError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> ReleaseErrorKind {
        match self {
            ReleaseError::TestFailure(_) => ReleaseErrorKind::TestFailure,
            ReleaseError::BuildError(_) => ReleaseErrorKind::BuildError,
            ReleaseError::PushError { .. } => ReleaseErrorKind::PushError,
            ReleaseError::DeployTimeout(_) => ReleaseErrorKind::DeployTimeout,
            ReleaseError::DeployFailed(_) => ReleaseErrorKind::DeployFailed,
            ReleaseError::QueryTimeout { .. } => ReleaseErrorKind::QueryTimeout,
            ReleaseError::HealthCheckTimeout(_) => ReleaseErrorKind::HealthCheckTimeout,
            ReleaseError::HealthCheckFailed(_) => ReleaseErrorKind::HealthCheckFailed,
            ReleaseError::RollbackFailure(_) => ReleaseErrorKind::RollbackFailure,
            ReleaseError::Aborted => ReleaseErrorKind::Aborted,
            ReleaseError::Conflict(_) => ReleaseErrorKind::Conflict,
            ReleaseError::Lock(_) => ReleaseErrorKind::Lock,
            ReleaseError::InvalidTransition { .. }
            | ReleaseError::ArtifactAlreadyAssigned(_)
            | ReleaseError::InvalidState(_) => ReleaseErrorKind::Internal,
            ReleaseError::Store(_) => ReleaseErrorKind::Store,
        }
    }

    /// Returns lock holder details if this is a conflict.
    pub fn lock_holder_info(&self) -> Option<&LockInfo> {
        match self {
            ReleaseError::Conflict(info) => Some(info),
            _ => None,
        }
    }

    pub(crate) fn lock_held(info: LockInfo) -> Self {
        ReleaseError::Conflict(Box::new(info))
    }

    pub(crate) fn lock_error(message: impl Into<String>) -> Self {
        ReleaseError::Lock(message.into())
    }
}

/// Why an attempt ended unsuccessfully, as kept on the attempt record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: ReleaseErrorKind,
    pub message: String,
}

impl From<&ReleaseError> for FailureRecord {
    fn from(error: &ReleaseError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}
