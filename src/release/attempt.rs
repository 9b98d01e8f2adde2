// ABOUTME: The release attempt record and its guarded mutators.
// ABOUTME: Stage changes go through the transition table; write-once fields reject reassignment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ArtifactRef, AttemptId, EnvironmentName, SourceRef};

use super::error::{FailureRecord, ReleaseError};
use super::stage::Stage;

/// Outcome of the post-deploy health gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckResult {
    Pass,
    Fail,
}

/// One entry in an attempt's stage history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEntry {
    pub stage: Stage,
    pub entered_at: DateTime<Utc>,
}

/// One attempt to move an environment to a new version.
///
/// Only the sequencer mutates an attempt, and only through the methods below,
/// which enforce the stage order and the write-once fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseAttempt {
    attempt_id: AttemptId,
    source_ref: SourceRef,
    environment: EnvironmentName,
    stage: Stage,
    #[serde(default)]
    artifact_ref: Option<ArtifactRef>,
    #[serde(default)]
    previous_artifact_ref: Option<ArtifactRef>,
    #[serde(default)]
    previous_captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    rollout_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    health_check_result: Option<HealthCheckResult>,
    #[serde(default)]
    push_attempts: u32,
    #[serde(default)]
    failure: Option<FailureRecord>,
    history: Vec<StageEntry>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    finished_at: Option<DateTime<Utc>>,
}

/// What collaborators get to know about the attempt they are serving.
#[derive(Debug, Clone)]
pub struct ReleaseContext {
    pub attempt_id: AttemptId,
    pub source_ref: SourceRef,
    pub environment: EnvironmentName,
    pub artifact_ref: Option<ArtifactRef>,
}

impl ReleaseAttempt {
    /// Create a new attempt in `Pending`.
    pub fn new(source_ref: SourceRef, environment: EnvironmentName) -> Self {
        let now = Utc::now();
        Self {
            attempt_id: AttemptId::generate(),
            source_ref,
            environment,
            stage: Stage::Pending,
            artifact_ref: None,
            previous_artifact_ref: None,
            previous_captured_at: None,
            rollout_started_at: None,
            health_check_result: None,
            push_attempts: 0,
            failure: None,
            history: vec![StageEntry {
                stage: Stage::Pending,
                entered_at: now,
            }],
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn id(&self) -> AttemptId {
        self.attempt_id
    }

    pub fn source_ref(&self) -> &SourceRef {
        &self.source_ref
    }

    pub fn environment(&self) -> &EnvironmentName {
        &self.environment
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn artifact_ref(&self) -> Option<&ArtifactRef> {
        self.artifact_ref.as_ref()
    }

    pub fn previous_artifact_ref(&self) -> Option<&ArtifactRef> {
        self.previous_artifact_ref.as_ref()
    }

    pub fn previous_captured_at(&self) -> Option<DateTime<Utc>> {
        self.previous_captured_at
    }

    pub fn rollout_started_at(&self) -> Option<DateTime<Utc>> {
        self.rollout_started_at
    }

    /// True once an update has been requested from the platform.
    pub fn rollout_started(&self) -> bool {
        self.rollout_started_at.is_some()
    }

    pub fn health_check_result(&self) -> Option<HealthCheckResult> {
        self.health_check_result
    }

    pub fn push_attempts(&self) -> u32 {
        self.push_attempts
    }

    pub fn failure(&self) -> Option<&FailureRecord> {
        self.failure.as_ref()
    }

    pub fn history(&self) -> &[StageEntry] {
        &self.history
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn context(&self) -> ReleaseContext {
        ReleaseContext {
            attempt_id: self.attempt_id,
            source_ref: self.source_ref.clone(),
            environment: self.environment.clone(),
            artifact_ref: self.artifact_ref.clone(),
        }
    }

    /// Move to `to`, if the transition table allows it.
    pub fn advance(&mut self, to: Stage) -> Result<(), ReleaseError> {
        if !self.stage.can_transition_to(to) {
            return Err(ReleaseError::InvalidTransition {
                from: self.stage,
                to,
            });
        }

        let now = Utc::now();
        self.stage = to;
        self.updated_at = now;
        self.history.push(StageEntry {
            stage: to,
            entered_at: now,
        });
        if to.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// Record the built artifact. Allowed once, while building.
    pub fn assign_artifact(&mut self, artifact: ArtifactRef) -> Result<(), ReleaseError> {
        if let Some(existing) = &self.artifact_ref {
            return Err(ReleaseError::ArtifactAlreadyAssigned(existing.clone()));
        }
        self.require_stage(Stage::Building, "artifact can only be assigned while building")?;
        self.artifact_ref = Some(artifact);
        self.touch();
        Ok(())
    }

    pub fn record_push_attempt(&mut self) -> Result<(), ReleaseError> {
        self.require_stage(Stage::Pushing, "push attempts are only counted while pushing")?;
        self.push_attempts += 1;
        self.touch();
        Ok(())
    }

    /// Record what was running before this attempt touched the platform.
    ///
    /// `None` means nothing was running (first deployment).
    pub fn capture_previous(&mut self, previous: Option<ArtifactRef>) -> Result<(), ReleaseError> {
        self.require_stage(Stage::Deploying, "previous artifact is captured while deploying")?;
        if self.previous_captured_at.is_some() {
            return Err(ReleaseError::InvalidState(
                "previous artifact already captured".to_string(),
            ));
        }
        self.previous_artifact_ref = previous;
        self.previous_captured_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Mark that the platform update is about to be requested.
    pub fn mark_rollout_started(&mut self) -> Result<(), ReleaseError> {
        self.require_stage(Stage::Deploying, "rollout starts while deploying")?;
        if self.previous_captured_at.is_none() {
            return Err(ReleaseError::InvalidState(
                "previous artifact must be captured before the platform is updated".to_string(),
            ));
        }
        if self.artifact_ref.is_none() {
            return Err(ReleaseError::InvalidState(
                "no artifact to roll out".to_string(),
            ));
        }
        self.rollout_started_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    pub fn record_health(&mut self, result: HealthCheckResult) -> Result<(), ReleaseError> {
        self.require_stage(
            Stage::HealthChecking,
            "health results are recorded while health checking",
        )?;
        self.health_check_result = Some(result);
        self.touch();
        Ok(())
    }

    /// Replaces any earlier failure, so a failed rollback is what the record
    /// ends up showing.
    pub fn record_failure(&mut self, error: &ReleaseError) -> Result<(), ReleaseError> {
        if self.stage.is_terminal() {
            return Err(ReleaseError::InvalidState(format!(
                "attempt {} is already {}",
                self.attempt_id, self.stage
            )));
        }
        self.failure = Some(FailureRecord::from(error));
        self.touch();
        Ok(())
    }

    fn require_stage(&self, stage: Stage, message: &str) -> Result<(), ReleaseError> {
        if self.stage != stage {
            return Err(ReleaseError::InvalidState(format!(
                "{} (attempt is {})",
                message, self.stage
            )));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt() -> ReleaseAttempt {
        ReleaseAttempt::new(
            SourceRef::new("abc123").unwrap(),
            EnvironmentName::new("production").unwrap(),
        )
    }

    fn advance_to(attempt: &mut ReleaseAttempt, stage: Stage) {
        while attempt.stage() != stage {
            let next = attempt.stage().next().expect("stage reachable");
            attempt.advance(next).unwrap();
        }
    }

    #[test]
    fn new_attempt_is_pending_with_history() {
        let attempt = attempt();
        assert_eq!(attempt.stage(), Stage::Pending);
        assert_eq!(attempt.history().len(), 1);
        assert!(attempt.finished_at().is_none());
    }

    #[test]
    fn artifact_is_write_once() {
        let mut attempt = attempt();
        advance_to(&mut attempt, Stage::Building);

        let first = ArtifactRef::parse("sha256:111").unwrap();
        attempt.assign_artifact(first.clone()).unwrap();

        let err = attempt
            .assign_artifact(ArtifactRef::parse("sha256:222").unwrap())
            .unwrap_err();
        assert!(matches!(err, ReleaseError::ArtifactAlreadyAssigned(_)));
        assert_eq!(attempt.artifact_ref(), Some(&first));
    }

    #[test]
    fn artifact_cannot_be_assigned_outside_building() {
        let mut attempt = attempt();
        let err = attempt
            .assign_artifact(ArtifactRef::parse("sha256:111").unwrap())
            .unwrap_err();
        assert!(matches!(err, ReleaseError::InvalidState(_)));
    }

    #[test]
    fn rollout_requires_captured_previous() {
        let mut attempt = attempt();
        advance_to(&mut attempt, Stage::Building);
        attempt
            .assign_artifact(ArtifactRef::parse("sha256:111").unwrap())
            .unwrap();
        advance_to(&mut attempt, Stage::Deploying);

        assert!(attempt.mark_rollout_started().is_err());

        attempt
            .capture_previous(Some(ArtifactRef::parse("sha256:000").unwrap()))
            .unwrap();
        attempt.mark_rollout_started().unwrap();

        assert!(attempt.previous_captured_at() <= attempt.rollout_started_at());
        assert!(attempt.capture_previous(None).is_err());
    }

    #[test]
    fn terminal_attempt_rejects_changes() {
        let mut attempt = attempt();
        attempt.advance(Stage::Failed).unwrap();

        assert!(attempt.finished_at().is_some());
        assert!(attempt.advance(Stage::Testing).is_err());
        assert!(
            attempt
                .record_failure(&ReleaseError::Aborted)
                .is_err()
        );
    }

    #[test]
    fn serde_round_trip_preserves_record() {
        let mut attempt = attempt();
        advance_to(&mut attempt, Stage::Building);
        attempt
            .assign_artifact(ArtifactRef::parse("registry.example.com/app@sha256:abc").unwrap())
            .unwrap();

        let json = serde_json::to_string(&attempt).unwrap();
        let back: ReleaseAttempt = serde_json::from_str(&json).unwrap();
        assert_eq!(back, attempt);
    }
}
