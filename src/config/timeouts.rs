// ABOUTME: Per-call timeouts for every external system the sequencer talks to.
// ABOUTME: A call that outlives its timeout is handled like an explicit failure of that stage.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_tests", with = "humantime_serde")]
    pub tests: Duration,

    #[serde(default = "default_build", with = "humantime_serde")]
    pub build: Duration,

    #[serde(default = "default_push", with = "humantime_serde")]
    pub push: Duration,

    /// Platform update request (not the rollout itself; that is the health window).
    #[serde(default = "default_deploy", with = "humantime_serde")]
    pub deploy: Duration,

    /// Read-only queries such as the currently running artifact.
    #[serde(default = "default_query", with = "humantime_serde")]
    pub query: Duration,

    /// One round of instance health probes.
    #[serde(default = "default_health_probe", with = "humantime_serde")]
    pub health_probe: Duration,
}

fn default_tests() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_build() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_push() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_deploy() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_query() -> Duration {
    Duration::from_secs(30)
}

fn default_health_probe() -> Duration {
    Duration::from_secs(10)
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            tests: default_tests(),
            build: default_build(),
            push: default_push(),
            deploy: default_deploy(),
            query: default_query(),
            health_probe: default_health_probe(),
        }
    }
}
