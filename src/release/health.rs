// ABOUTME: Post-deploy health gate: consecutive-success streaks per instance inside a bounded window.
// ABOUTME: Fails early once unhealthy reports persist beyond the configured tolerance.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

use crate::backend::OrchestrationPlatform;
use crate::config::HealthPolicy;
use crate::types::EnvironmentName;

use super::ReleaseError;
use super::abort::AbortSignal;

/// One instance's answer to a health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceHealth {
    Healthy,
    Unhealthy,
}

impl InstanceHealth {
    pub fn is_healthy(self) -> bool {
        self == InstanceHealth::Healthy
    }
}

impl fmt::Display for InstanceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceHealth::Healthy => write!(f, "healthy"),
            InstanceHealth::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

impl FromStr for InstanceHealth {
    type Err = String;

    /// Accepts `healthy`/`unhealthy` (and a few synonyms) as the last word of a line,
    /// so `web-1 healthy` and `healthy` both parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let word = s.split_whitespace().last().unwrap_or_default();
        match word.to_ascii_lowercase().as_str() {
            "healthy" | "ok" | "pass" | "up" => Ok(InstanceHealth::Healthy),
            "unhealthy" | "fail" | "down" => Ok(InstanceHealth::Unhealthy),
            _ => Err(format!("unrecognized health status: {:?}", s.trim())),
        }
    }
}

/// Result of evaluating one observation round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateProgress {
    Passed,
    Waiting,
    Failed(String),
}

/// Aggregates probe rounds into a gate decision.
#[derive(Debug)]
pub struct HealthTracker {
    consecutive_successes: u32,
    min_healthy_fraction: f64,
    unhealthy_tolerance: u32,
    streaks: Vec<u32>,
    unhealthy_rounds: u32,
    rounds: u32,
}

impl HealthTracker {
    pub fn new(policy: &HealthPolicy) -> Self {
        Self {
            consecutive_successes: policy.consecutive_successes.max(1),
            min_healthy_fraction: policy.min_healthy_fraction,
            unhealthy_tolerance: policy.unhealthy_tolerance,
            streaks: Vec::new(),
            unhealthy_rounds: 0,
            rounds: 0,
        }
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Instances whose streak has reached the threshold.
    pub fn healthy_instances(&self) -> usize {
        self.streaks
            .iter()
            .filter(|s| **s >= self.consecutive_successes)
            .count()
    }

    pub fn total_instances(&self) -> usize {
        self.streaks.len()
    }

    /// Feed one round of probe results.
    pub fn observe(&mut self, round: &[InstanceHealth]) -> GateProgress {
        self.rounds += 1;

        // Instances are identified by position; a changed count means the
        // platform replaced them, so streaks start over.
        if round.len() != self.streaks.len() {
            self.streaks = vec![0; round.len()];
        }

        if round.is_empty() {
            return GateProgress::Waiting;
        }

        for (streak, health) in self.streaks.iter_mut().zip(round) {
            if health.is_healthy() {
                *streak = streak.saturating_add(1);
            } else {
                *streak = 0;
            }
        }

        if self.meets_threshold() {
            return GateProgress::Passed;
        }

        if round.iter().any(|h| !h.is_healthy()) {
            self.record_unhealthy_round(format!(
                "{} of {} instance(s) unhealthy",
                round.iter().filter(|h| !h.is_healthy()).count(),
                round.len()
            ))
        } else {
            self.unhealthy_rounds = 0;
            GateProgress::Waiting
        }
    }

    /// A probe that could not be completed counts as an unhealthy round.
    pub fn observe_error(&mut self, message: &str) -> GateProgress {
        self.rounds += 1;
        self.streaks.iter_mut().for_each(|s| *s = 0);
        self.record_unhealthy_round(format!("health probe failed: {}", message))
    }

    fn meets_threshold(&self) -> bool {
        let total = self.total_instances();
        if total == 0 {
            return false;
        }
        let fraction = self.healthy_instances() as f64 / total as f64;
        // Tolerate float error so 1.0 with 3/3 healthy is not rejected
        fraction + 1e-9 >= self.min_healthy_fraction
    }

    fn record_unhealthy_round(&mut self, detail: String) -> GateProgress {
        self.unhealthy_rounds += 1;
        if self.unhealthy_rounds > self.unhealthy_tolerance {
            GateProgress::Failed(format!(
                "{} for {} consecutive round(s), tolerance is {}",
                detail, self.unhealthy_rounds, self.unhealthy_tolerance
            ))
        } else {
            GateProgress::Waiting
        }
    }
}

/// How the gate was passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSummary {
    pub healthy: usize,
    pub total: usize,
    pub rounds: u32,
    pub elapsed: Duration,
}

/// Poll the platform until the environment passes the gate.
///
/// Returns `HealthCheckTimeout` when the window elapses, `HealthCheckFailed`
/// when unhealthy reports exceed the tolerance and `Aborted` when `abort` fires.
pub async fn await_healthy(
    platform: &dyn OrchestrationPlatform,
    environment: &EnvironmentName,
    policy: &HealthPolicy,
    probe_timeout: Duration,
    abort: &AbortSignal,
) -> Result<HealthSummary, ReleaseError> {
    let started = Instant::now();
    let deadline = started + policy.window;
    let schedule = policy.poll_backoff();
    let mut tracker = HealthTracker::new(policy);

    loop {
        let probe = tokio::time::timeout(probe_timeout, platform.instance_health(environment));
        let progress = tokio::select! {
            biased;
            _ = abort.aborted() => return Err(ReleaseError::Aborted),
            result = probe => match result {
                Ok(Ok(round)) => {
                    tracing::debug!(
                        "Health round {} for {}: {:?}",
                        tracker.rounds() + 1,
                        environment,
                        round
                    );
                    tracker.observe(&round)
                }
                Ok(Err(e)) => tracker.observe_error(&e.to_string()),
                Err(_) => tracker.observe_error(&format!(
                    "no answer within {}s",
                    probe_timeout.as_secs_f64()
                )),
            },
        };

        match progress {
            GateProgress::Passed => {
                let summary = HealthSummary {
                    healthy: tracker.healthy_instances(),
                    total: tracker.total_instances(),
                    rounds: tracker.rounds(),
                    elapsed: started.elapsed(),
                };
                tracing::info!(
                    "{} healthy: {}/{} instance(s) after {} round(s)",
                    environment,
                    summary.healthy,
                    summary.total,
                    summary.rounds
                );
                return Ok(summary);
            }
            GateProgress::Failed(reason) => return Err(ReleaseError::HealthCheckFailed(reason)),
            GateProgress::Waiting => {}
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::warn!(
                "{}: {}/{} instance(s) healthy when the {}s window closed",
                environment,
                tracker.healthy_instances(),
                tracker.total_instances(),
                policy.window.as_secs()
            );
            return Err(ReleaseError::HealthCheckTimeout(policy.window));
        }

        let wake = (now + schedule.delay(tracker.rounds())).min(deadline);
        tokio::select! {
            biased;
            _ = abort.aborted() => return Err(ReleaseError::Aborted),
            _ = tokio::time::sleep_until(wake) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use InstanceHealth::{Healthy, Unhealthy};

    fn policy(consecutive: u32, fraction: f64, tolerance: u32) -> HealthPolicy {
        HealthPolicy {
            consecutive_successes: consecutive,
            min_healthy_fraction: fraction,
            unhealthy_tolerance: tolerance,
            ..HealthPolicy::default()
        }
    }

    #[test]
    fn parses_instance_lines() {
        assert_eq!("healthy".parse::<InstanceHealth>(), Ok(Healthy));
        assert_eq!("web-1 UNHEALTHY".parse::<InstanceHealth>(), Ok(Unhealthy));
        assert_eq!("  ok ".parse::<InstanceHealth>(), Ok(Healthy));
        assert!("starting".parse::<InstanceHealth>().is_err());
    }

    #[test]
    fn passes_after_consecutive_successes() {
        let mut tracker = HealthTracker::new(&policy(3, 1.0, 3));
        let all = [Healthy, Healthy, Healthy];

        assert_eq!(tracker.observe(&all), GateProgress::Waiting);
        assert_eq!(tracker.observe(&all), GateProgress::Waiting);
        assert_eq!(tracker.observe(&all), GateProgress::Passed);
    }

    #[test]
    fn unhealthy_report_resets_streak() {
        let mut tracker = HealthTracker::new(&policy(2, 1.0, 5));

        tracker.observe(&[Healthy, Healthy]);
        tracker.observe(&[Healthy, Unhealthy]);
        assert_eq!(tracker.observe(&[Healthy, Healthy]), GateProgress::Waiting);
        assert_eq!(tracker.observe(&[Healthy, Healthy]), GateProgress::Passed);
    }

    #[test]
    fn fraction_allows_partial_health() {
        let mut tracker = HealthTracker::new(&policy(1, 0.5, 0));
        assert_eq!(
            tracker.observe(&[Healthy, Unhealthy]),
            GateProgress::Passed
        );
    }

    #[test]
    fn fails_beyond_tolerance() {
        let mut tracker = HealthTracker::new(&policy(1, 1.0, 2));
        let round = [Healthy, Unhealthy];

        assert_eq!(tracker.observe(&round), GateProgress::Waiting);
        assert_eq!(tracker.observe(&round), GateProgress::Waiting);
        assert!(matches!(tracker.observe(&round), GateProgress::Failed(_)));
    }

    #[test]
    fn no_instances_is_not_a_failure() {
        let mut tracker = HealthTracker::new(&policy(1, 1.0, 0));
        for _ in 0..5 {
            assert_eq!(tracker.observe(&[]), GateProgress::Waiting);
        }
    }

    #[test]
    fn probe_errors_count_against_tolerance() {
        let mut tracker = HealthTracker::new(&policy(1, 1.0, 1));
        assert_eq!(tracker.observe_error("refused"), GateProgress::Waiting);
        assert!(matches!(
            tracker.observe_error("refused"),
            GateProgress::Failed(_)
        ));
    }

    #[test]
    fn changed_instance_count_restarts_streaks() {
        let mut tracker = HealthTracker::new(&policy(2, 1.0, 3));
        tracker.observe(&[Healthy]);
        assert_eq!(tracker.observe(&[Healthy, Healthy]), GateProgress::Waiting);
        assert_eq!(tracker.observe(&[Healthy, Healthy]), GateProgress::Passed);
    }
}
