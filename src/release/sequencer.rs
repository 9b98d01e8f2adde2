// ABOUTME: Drives a release attempt through test, build, push, deploy and the health gate.
// ABOUTME: Every platform-touching failure routes through rollback to the captured previous artifact.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::backend::{
    ArtifactBuilder, ArtifactRegistry, BackendError, OrchestrationPlatform, TestRunner, Verdict,
};
use crate::config::{Config, HealthPolicy, LockConfig, RetryPolicy, Timeouts};
use crate::diagnostics::{Diagnostics, Warning};
use crate::types::{ArtifactRef, AttemptId, EnvironmentName, SourceRef};

use super::abort::AbortSignal;
use super::attempt::{HealthCheckResult, ReleaseAttempt};
use super::audit::AuditSink;
use super::error::ReleaseError;
use super::health::await_healthy;
use super::lock::EnvironmentLock;
use super::stage::Stage;
use super::store::AttemptStore;

/// The external systems an attempt passes through.
#[derive(Clone)]
pub struct Collaborators {
    pub tests: Arc<dyn TestRunner>,
    pub builder: Arc<dyn ArtifactBuilder>,
    pub registry: Arc<dyn ArtifactRegistry>,
    pub platform: Arc<dyn OrchestrationPlatform>,
}

impl Collaborators {
    /// Use one value for every role.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: TestRunner + ArtifactBuilder + ArtifactRegistry + OrchestrationPlatform + 'static,
    {
        Self {
            tests: backend.clone(),
            builder: backend.clone(),
            registry: backend.clone(),
            platform: backend,
        }
    }
}

/// Policies governing one environment's releases.
#[derive(Debug, Clone, Default)]
pub struct SequencerSettings {
    pub health: HealthPolicy,
    pub retry: RetryPolicy,
    pub timeouts: Timeouts,
    pub lock: LockConfig,
    /// Break any existing environment lock.
    pub force: bool,
}

impl SequencerSettings {
    pub fn from_config(config: &Config, force: bool) -> Self {
        Self {
            health: config.health.clone(),
            retry: config.retry.clone(),
            timeouts: config.timeouts.clone(),
            lock: config.lock.clone(),
            force,
        }
    }
}

/// A stage change, as reported to progress listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub attempt_id: AttemptId,
    pub from: Stage,
    pub to: Stage,
    pub at: DateTime<Utc>,
}

/// How a run ended.
#[derive(Debug)]
pub struct RunOutcome {
    /// The attempt in its terminal stage.
    pub attempt: ReleaseAttempt,
    /// Why it did not succeed, if it did not.
    pub error: Option<ReleaseError>,
    pub diagnostics: Diagnostics,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.attempt.stage() == Stage::Succeeded
    }
}

pub struct Sequencer {
    collaborators: Collaborators,
    settings: SequencerSettings,
    store: AttemptStore,
    audit: Arc<dyn AuditSink>,
    progress: Option<mpsc::UnboundedSender<Transition>>,
}

impl Sequencer {
    pub fn new(
        collaborators: Collaborators,
        settings: SequencerSettings,
        store: AttemptStore,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            collaborators,
            settings,
            store,
            audit,
            progress: None,
        }
    }

    /// Report every stage change on `tx`.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<Transition>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Create a `Pending` attempt, rejecting it if the environment is mid-rollout.
    pub fn trigger(
        &self,
        source_ref: SourceRef,
        environment: EnvironmentName,
    ) -> Result<ReleaseAttempt, ReleaseError> {
        EnvironmentLock::check_available(
            &self.store.lock_dir(),
            &environment,
            self.settings.force,
            self.settings.lock.stale_after,
        )?;

        let attempt = ReleaseAttempt::new(source_ref, environment);
        self.store.save(&attempt)?;
        tracing::info!(
            "Triggered attempt {} for {} at {}",
            attempt.id(),
            attempt.environment(),
            attempt.source_ref()
        );
        Ok(attempt)
    }

    /// Trigger and run to completion.
    pub async fn execute(
        &self,
        source_ref: SourceRef,
        environment: EnvironmentName,
        abort: AbortSignal,
    ) -> Result<RunOutcome, ReleaseError> {
        let attempt = self.trigger(source_ref, environment)?;
        self.run(attempt, abort).await
    }

    /// Run a `Pending` attempt until it reaches a terminal stage.
    ///
    /// Stage failures do not surface as `Err`; they end the attempt and are
    /// reported in `RunOutcome::error`.
    pub async fn run(
        &self,
        attempt: ReleaseAttempt,
        abort: AbortSignal,
    ) -> Result<RunOutcome, ReleaseError> {
        if attempt.stage() != Stage::Pending {
            return Err(ReleaseError::InvalidState(format!(
                "attempt {} is {}, expected Pending",
                attempt.id(),
                attempt.stage()
            )));
        }

        let mut run = Run {
            seq: self,
            attempt,
            abort,
            lock: None,
            diagnostics: Diagnostics::default(),
        };

        let error = match run.drive().await {
            Ok(()) => None,
            Err(cause) => Some(run.fail(cause).await),
        };
        run.finish().await;

        Ok(RunOutcome {
            attempt: run.attempt,
            error,
            diagnostics: run.diagnostics,
        })
    }
}

/// Result of a collaborator call raced against its timeout and the abort signal.
enum Call<T> {
    Done(T),
    TimedOut,
    Aborted,
}

/// State of one in-flight run.
struct Run<'a> {
    seq: &'a Sequencer,
    attempt: ReleaseAttempt,
    abort: AbortSignal,
    lock: Option<EnvironmentLock>,
    diagnostics: Diagnostics,
}

impl Run<'_> {
    async fn drive(&mut self) -> Result<(), ReleaseError> {
        self.advance(Stage::Testing)?;
        self.test().await?;

        self.advance(Stage::Building)?;
        let artifact = self.build().await?;
        self.attempt.assign_artifact(artifact)?;
        self.persist();

        self.advance(Stage::Pushing)?;
        self.push().await?;

        self.check_abort()?;
        self.lock = Some(EnvironmentLock::acquire(
            &self.seq.store.lock_dir(),
            self.attempt.environment(),
            self.attempt.id(),
            self.seq.settings.force,
            self.seq.settings.lock.stale_after,
        )?);
        self.advance(Stage::Deploying)?;
        self.deploy().await?;

        self.advance(Stage::HealthChecking)?;
        await_healthy(
            self.seq.collaborators.platform.as_ref(),
            self.attempt.environment(),
            &self.seq.settings.health,
            self.seq.settings.timeouts.health_probe,
            &self.abort,
        )
        .await?;
        self.attempt.record_health(HealthCheckResult::Pass)?;

        self.advance(Stage::Succeeded)
    }

    async fn test(&mut self) -> Result<(), ReleaseError> {
        let ctx = self.attempt.context();
        let limit = self.seq.settings.timeouts.tests;
        match self.guarded(limit, self.seq.collaborators.tests.run(&ctx)).await {
            Call::Done(Ok(Verdict::Pass)) => Ok(()),
            Call::Done(Ok(Verdict::Fail(summary))) => Err(ReleaseError::TestFailure(summary)),
            Call::Done(Err(e)) => Err(ReleaseError::TestFailure(e.to_string())),
            Call::TimedOut => Err(ReleaseError::TestFailure(timed_out(limit))),
            Call::Aborted => Err(ReleaseError::Aborted),
        }
    }

    async fn build(&mut self) -> Result<ArtifactRef, ReleaseError> {
        let ctx = self.attempt.context();
        let limit = self.seq.settings.timeouts.build;
        match self.guarded(limit, self.seq.collaborators.builder.build(&ctx)).await {
            Call::Done(Ok(artifact)) => {
                tracing::info!("Built {}", artifact);
                Ok(artifact)
            }
            Call::Done(Err(e)) => Err(ReleaseError::BuildError(e.to_string())),
            Call::TimedOut => Err(ReleaseError::BuildError(timed_out(limit))),
            Call::Aborted => Err(ReleaseError::Aborted),
        }
    }

    async fn push(&mut self) -> Result<(), ReleaseError> {
        let artifact = self.require_artifact()?;
        let ctx = self.attempt.context();
        let limit = self.seq.settings.timeouts.push;
        let max_attempts = self.seq.settings.retry.push_attempts.max(1);
        let mut last_error = String::new();

        for n in 1..=max_attempts {
            self.check_abort()?;
            self.attempt.record_push_attempt()?;

            let call = self
                .guarded(limit, self.seq.collaborators.registry.push(&ctx, &artifact))
                .await;
            match call {
                Call::Done(Ok(())) => {
                    tracing::info!("Pushed {}", artifact);
                    self.persist();
                    return Ok(());
                }
                Call::Done(Err(e)) => last_error = e.to_string(),
                Call::TimedOut => last_error = timed_out(limit),
                Call::Aborted => return Err(ReleaseError::Aborted),
            }

            tracing::warn!(
                "Push attempt {}/{} failed: {}",
                n,
                max_attempts,
                last_error
            );
            self.persist();

            if n < max_attempts {
                let delay = self.seq.settings.retry.backoff.delay(n);
                tokio::select! {
                    biased;
                    _ = self.abort.aborted() => return Err(ReleaseError::Aborted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(ReleaseError::PushError {
            attempts: max_attempts,
            message: last_error,
        })
    }

    async fn deploy(&mut self) -> Result<(), ReleaseError> {
        let environment = self.attempt.environment().clone();
        let artifact = self.require_artifact()?;

        let previous = self.query_previous(&environment).await?;
        match &previous {
            Some(previous) => tracing::info!("{} is running {}", environment, previous),
            None => tracing::info!("{} has no running artifact, first deployment", environment),
        }
        self.attempt.capture_previous(previous)?;
        self.attempt.mark_rollout_started()?;
        self.persist();

        tracing::info!("Updating {} to {}", environment, artifact);
        let limit = self.seq.settings.timeouts.deploy;
        let update = self
            .seq
            .collaborators
            .platform
            .update_to(&environment, &artifact);
        // The update is not abandoned on abort; the platform must not be left mid-request.
        match tokio::time::timeout(limit, update).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ReleaseError::DeployFailed(e.to_string())),
            Err(_) => return Err(ReleaseError::DeployTimeout(limit)),
        }

        self.check_abort()
    }

    /// The running artifact is asked from the platform first, then from the registry.
    async fn query_previous(
        &mut self,
        environment: &EnvironmentName,
    ) -> Result<Option<ArtifactRef>, ReleaseError> {
        let platform = self.seq.collaborators.platform.clone();
        let running = self
            .query("platform", || platform.running_artifact(environment))
            .await?;
        if running.is_some() {
            return Ok(running);
        }

        let registry = self.seq.collaborators.registry.clone();
        self.query("registry", || registry.current_production(environment))
            .await
    }

    /// Read-only query, retried with backoff while it times out.
    async fn query<'q, F>(
        &self,
        collaborator: &'static str,
        mut call: F,
    ) -> Result<Option<ArtifactRef>, ReleaseError>
    where
        F: FnMut() -> BoxFuture<'q, Result<Option<ArtifactRef>, BackendError>>,
    {
        let limit = self.seq.settings.timeouts.query;
        let max_attempts = self.seq.settings.retry.query_attempts.max(1);

        for n in 1..=max_attempts {
            match self.guarded(limit, call()).await {
                Call::Done(Ok(artifact)) => return Ok(artifact),
                Call::Done(Err(e)) => {
                    return Err(ReleaseError::DeployFailed(format!(
                        "could not query running artifact from {}: {}",
                        collaborator, e
                    )));
                }
                Call::TimedOut => {}
                Call::Aborted => return Err(ReleaseError::Aborted),
            }

            tracing::warn!(
                "Running artifact query to {} timed out ({}/{})",
                collaborator,
                n,
                max_attempts
            );
            if n < max_attempts {
                let delay = self.seq.settings.retry.backoff.delay(n);
                tokio::select! {
                    biased;
                    _ = self.abort.aborted() => return Err(ReleaseError::Aborted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(ReleaseError::QueryTimeout {
            collaborator,
            attempts: max_attempts,
            limit,
        })
    }

    /// End the attempt after `cause`, rolling back if the platform was touched.
    /// Returns the error that decided the terminal stage.
    async fn fail(&mut self, cause: ReleaseError) -> ReleaseError {
        let stage = self.attempt.stage();
        tracing::error!("Attempt {} failed in {}: {}", self.attempt.id(), stage, cause);

        if stage.is_terminal() {
            return cause;
        }
        if let Err(e) = self.attempt.record_failure(&cause) {
            tracing::warn!("Could not record failure: {}", e);
        }
        if stage == Stage::HealthChecking
            && let Err(e) = self.attempt.record_health(HealthCheckResult::Fail)
        {
            tracing::warn!("Could not record health result: {}", e);
        }

        // Aborted while still reading the platform: the rollback has nothing to undo
        if stage.touches_platform()
            && !self.attempt.rollout_started()
            && matches!(cause, ReleaseError::Aborted)
        {
            tracing::info!(
                "No update was sent to {}; nothing to roll back",
                self.attempt.environment()
            );
            self.terminate(Stage::RolledBack);
            return cause;
        }

        if stage.touches_platform() && self.attempt.rollout_started() {
            match self.rollback(&cause).await {
                Ok(()) => {
                    self.terminate(Stage::RolledBack);
                    return cause;
                }
                Err(rollback_error) => {
                    tracing::error!("{}", rollback_error);
                    if let Err(e) = self.attempt.record_failure(&rollback_error) {
                        tracing::warn!("Could not record failure: {}", e);
                    }
                    self.terminate(Stage::Failed);
                    return rollback_error;
                }
            }
        }

        self.terminate(Stage::Failed);
        cause
    }

    async fn rollback(&mut self, cause: &ReleaseError) -> Result<(), ReleaseError> {
        let environment = self.attempt.environment().clone();
        let Some(previous) = self.attempt.previous_artifact_ref().cloned() else {
            return Err(ReleaseError::RollbackFailure(format!(
                "no previous artifact to roll back to after: {}",
                cause
            )));
        };

        tracing::warn!("Rolling back {} to {}", environment, previous);
        let platform = self.seq.collaborators.platform.clone();
        let limit = self.seq.settings.timeouts.deploy;

        match tokio::time::timeout(limit, platform.update_to(&environment, &previous)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(ReleaseError::RollbackFailure(format!(
                    "update back to {} failed: {}",
                    previous, e
                )));
            }
            Err(_) => {
                return Err(ReleaseError::RollbackFailure(format!(
                    "update back to {} timed out after {}s",
                    previous,
                    limit.as_secs()
                )));
            }
        }

        // Rollback is not abortable; the gate only ends by window or tolerance.
        await_healthy(
            platform.as_ref(),
            &environment,
            &self.seq.settings.health,
            self.seq.settings.timeouts.health_probe,
            &AbortSignal::never(),
        )
        .await
        .map_err(|e| {
            ReleaseError::RollbackFailure(format!("{} did not become healthy: {}", previous, e))
        })?;

        tracing::info!("Rolled back {} to {}", environment, previous);
        Ok(())
    }

    /// Release resources and deliver the terminal record.
    async fn finish(&mut self) {
        if let Some(lock) = self.lock.take()
            && let Err(e) = lock.release()
        {
            self.diagnostics.warn(Warning::lock_release(format!(
                "failed to release lock for {}: {}",
                self.attempt.environment(),
                e
            )));
        }

        if let Err(e) = self.seq.audit.record(&self.attempt).await {
            self.diagnostics.warn(Warning::audit_write(format!(
                "failed to write audit record for {}: {}",
                self.attempt.id(),
                e
            )));
        }

        if let Err(e) = self.seq.store.clear_abort(self.attempt.id()) {
            tracing::debug!("Could not clear abort marker: {}", e);
        }
    }

    fn advance(&mut self, to: Stage) -> Result<(), ReleaseError> {
        let from = self.attempt.stage();
        self.attempt.advance(to)?;
        tracing::info!("{} {}: {} -> {}", self.attempt.environment(), self.attempt.id(), from, to);
        self.persist();

        if let Some(tx) = &self.seq.progress {
            let _ = tx.send(Transition {
                attempt_id: self.attempt.id(),
                from,
                to,
                at: self.attempt.updated_at(),
            });
        }
        Ok(())
    }

    /// Final transition; the caller has already decided the outcome.
    fn terminate(&mut self, to: Stage) {
        if let Err(e) = self.advance(to) {
            tracing::error!("Could not move attempt {} to {}: {}", self.attempt.id(), to, e);
        }
    }

    fn persist(&mut self) {
        if let Err(e) = self.seq.store.save(&self.attempt) {
            self.diagnostics.warn(Warning::state_persist(format!(
                "failed to save attempt {}: {}",
                self.attempt.id(),
                e
            )));
        }
    }

    fn check_abort(&self) -> Result<(), ReleaseError> {
        if self.abort.is_aborted() {
            Err(ReleaseError::Aborted)
        } else {
            Ok(())
        }
    }

    fn require_artifact(&self) -> Result<ArtifactRef, ReleaseError> {
        self.attempt
            .artifact_ref()
            .cloned()
            .ok_or_else(|| ReleaseError::InvalidState("no artifact assigned".to_string()))
    }

    async fn guarded<T>(&self, limit: Duration, call: impl Future<Output = T>) -> Call<T> {
        tokio::select! {
            biased;
            _ = self.abort.aborted() => Call::Aborted,
            result = tokio::time::timeout(limit, call) => match result {
                Ok(value) => Call::Done(value),
                Err(_) => Call::TimedOut,
            },
        }
    }
}

fn timed_out(limit: Duration) -> String {
    format!("timed out after {}s", limit.as_secs_f64())
}
