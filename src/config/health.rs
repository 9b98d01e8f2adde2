// ABOUTME: Health gate configuration for the post-deploy observation window.
// ABOUTME: Consecutive-success threshold, healthy fraction, tolerance and polling cadence.

use serde::Deserialize;
use std::time::Duration;

use crate::release::Backoff;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthPolicy {
    /// Consecutive passing probes before an instance counts as healthy.
    #[serde(default = "default_consecutive_successes")]
    pub consecutive_successes: u32,

    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Growth factor for the polling interval; 1.0 polls at a fixed cadence.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_interval", with = "humantime_serde")]
    pub max_interval: Duration,

    /// Hard limit on the observation window before rolling back.
    #[serde(default = "default_window", with = "humantime_serde")]
    pub window: Duration,

    /// Fraction of instances (0, 1] that must be healthy.
    #[serde(default = "default_min_healthy_fraction")]
    pub min_healthy_fraction: f64,

    /// Consecutive rounds with unhealthy reports tolerated before failing early.
    #[serde(default = "default_unhealthy_tolerance")]
    pub unhealthy_tolerance: u32,
}

fn default_consecutive_successes() -> u32 {
    3
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_max_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_window() -> Duration {
    Duration::from_secs(120)
}

fn default_min_healthy_fraction() -> f64 {
    1.0
}

fn default_unhealthy_tolerance() -> u32 {
    3
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            consecutive_successes: default_consecutive_successes(),
            interval: default_interval(),
            backoff_multiplier: default_backoff_multiplier(),
            max_interval: default_max_interval(),
            window: default_window(),
            min_healthy_fraction: default_min_healthy_fraction(),
            unhealthy_tolerance: default_unhealthy_tolerance(),
        }
    }
}

impl HealthPolicy {
    /// Polling schedule between health rounds.
    pub fn poll_backoff(&self) -> Backoff {
        Backoff {
            initial: self.interval,
            multiplier: self.backoff_multiplier,
            max: self.max_interval.max(self.interval),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.consecutive_successes == 0 {
            return Err("health.consecutive_successes must be at least 1".to_string());
        }
        if !(self.min_healthy_fraction > 0.0 && self.min_healthy_fraction <= 1.0) {
            return Err("health.min_healthy_fraction must be in (0, 1]".to_string());
        }
        if self.interval.is_zero() {
            return Err("health.interval must be greater than zero".to_string());
        }
        if self.window < self.interval {
            return Err("health.window must be at least one interval long".to_string());
        }
        Ok(())
    }
}
