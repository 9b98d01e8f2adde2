// ABOUTME: Backoff policy shared by push retries and health polling.
// ABOUTME: Pure delay computation; callers do the sleeping.

use serde::Deserialize;
use std::time::Duration;

/// Delay schedule between repeated calls to an external system.
///
/// With `multiplier = 1.0` the schedule is a fixed interval; larger values
/// grow the delay geometrically up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Backoff {
    #[serde(with = "humantime_serde")]
    pub initial: Duration,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max", with = "humantime_serde")]
    pub max: Duration,
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max() -> Duration {
    Duration::from_secs(30)
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: default_multiplier(),
            max: default_max(),
        }
    }
}

impl Backoff {
    /// Fixed interval between every call.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial: interval,
            multiplier: 1.0,
            max: interval,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let delay = self.initial.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max.as_secs_f64() {
            self.max.max(self.initial)
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_schedule_doubles_until_cap() {
        let backoff = Backoff {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(5),
        };
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
        assert_eq!(backoff.delay(4), Duration::from_secs(5));
        assert_eq!(backoff.delay(40), Duration::from_secs(5));
    }

    #[test]
    fn fixed_schedule_never_grows() {
        let backoff = Backoff::fixed(Duration::from_millis(250));
        for attempt in 1..10 {
            assert_eq!(backoff.delay(attempt), Duration::from_millis(250));
        }
    }

    #[test]
    fn multiplier_below_one_is_treated_as_fixed() {
        let backoff = Backoff {
            initial: Duration::from_secs(2),
            multiplier: 0.5,
            max: Duration::from_secs(10),
        };
        assert_eq!(backoff.delay(3), Duration::from_secs(2));
    }
}
