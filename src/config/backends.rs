// ABOUTME: Shell command configuration for the external collaborators.
// ABOUTME: Test runner, artifact builder, registry and orchestration platform.

use nonempty::NonEmpty;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TestsConfig {
    /// Exit status 0 means the suite passed.
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    /// The last non-empty stdout line is the artifact reference.
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Pushes `$RELEASE_ARTIFACT`; exit status 0 acknowledges storage.
    pub push: String,

    /// Prints the artifact currently promoted to `$RELEASE_ENVIRONMENT`, or nothing.
    #[serde(default)]
    pub current: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// Points `$RELEASE_ENVIRONMENT` at `$RELEASE_ARTIFACT`.
    pub update: String,

    /// Prints the artifact the platform is running, or nothing on first deploy.
    #[serde(default)]
    pub running: Option<String>,

    /// Prints one `healthy`/`unhealthy` line per running instance.
    #[serde(default)]
    pub health: Option<String>,

    /// HTTP health endpoints probed directly instead of `health`.
    #[serde(default)]
    pub health_endpoints: Option<NonEmpty<String>>,
}

impl PlatformConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.health.is_none() && self.health_endpoints.is_none() {
            return Err("platform needs either `health` or `health_endpoints`".to_string());
        }
        if let Some(endpoints) = &self.health_endpoints {
            validate_health_endpoints(endpoints)?;
        }
        Ok(())
    }
}

pub(super) fn validate_health_endpoints(endpoints: &NonEmpty<String>) -> Result<(), String> {
    match endpoints.iter().find(|e| !e.starts_with("http://")) {
        Some(bad) => Err(format!("health endpoint must be an http:// URL: {}", bad)),
        None => Ok(()),
    }
}
