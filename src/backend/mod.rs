// ABOUTME: Interfaces to the external systems a release passes through.
// ABOUTME: Test runner, artifact builder, registry and orchestration platform.

mod command;
mod http;

pub use command::CommandBackend;
pub use http::HttpHealthProbe;

use async_trait::async_trait;

use crate::release::{InstanceHealth, ReleaseContext};
use crate::types::{ArtifactRef, EnvironmentName};

/// Outcome of a test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    /// Tests ran and failed; carries a short summary for the audit trail.
    Fail(String),
}

/// Errors talking to an external system.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("unexpected output: {0}")]
    InvalidOutput(String),

    #[error("HTTP request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// Runs the automated test suite for a source revision.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// An `Err` means the suite could not be run at all.
    async fn run(&self, ctx: &ReleaseContext) -> Result<Verdict, BackendError>;
}

/// Produces an immutable artifact from a source revision.
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    async fn build(&self, ctx: &ReleaseContext) -> Result<ArtifactRef, BackendError>;
}

/// Stores artifacts and knows what each environment was last promoted to.
#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    /// `Ok` acknowledges durable storage.
    async fn push(&self, ctx: &ReleaseContext, artifact: &ArtifactRef) -> Result<(), BackendError>;

    async fn current_production(
        &self,
        environment: &EnvironmentName,
    ) -> Result<Option<ArtifactRef>, BackendError>;
}

/// Runs artifact instances and reports on them.
#[async_trait]
pub trait OrchestrationPlatform: Send + Sync {
    /// Request that the environment run `artifact`. Returning does not imply healthy.
    async fn update_to(
        &self,
        environment: &EnvironmentName,
        artifact: &ArtifactRef,
    ) -> Result<(), BackendError>;

    /// One entry per running instance.
    async fn instance_health(
        &self,
        environment: &EnvironmentName,
    ) -> Result<Vec<InstanceHealth>, BackendError>;

    /// What the environment currently runs, if the platform can tell.
    async fn running_artifact(
        &self,
        _environment: &EnvironmentName,
    ) -> Result<Option<ArtifactRef>, BackendError> {
        Ok(None)
    }
}
