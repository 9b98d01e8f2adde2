// ABOUTME: Configuration types and parsing for release.yml.
// ABOUTME: Handles YAML parsing, defaults, validation and per-environment merging.

mod backends;
mod env_value;
mod health;
mod init;
mod timeouts;

pub use backends::{BuildConfig, PlatformConfig, RegistryConfig, TestsConfig};
pub use env_value::{EnvValue, resolve_env_map};
pub use health::HealthPolicy;
pub use init::init_config;
pub use timeouts::Timeouts;

use crate::error::{Error, Result};
use crate::release::Backoff;
use crate::types::{EnvironmentName, ServiceName};
use nonempty::NonEmpty;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "release.yml";
pub const CONFIG_FILENAME_ALT: &str = "release.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".release/config.yml";

/// Environment variable overriding the configured state directory.
pub const STATE_DIR_ENV: &str = "RELEASE_STATE_DIR";

pub const DEFAULT_STATE_DIR: &str = ".release/state";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceName,

    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    pub tests: TestsConfig,

    pub build: BuildConfig,

    pub registry: RegistryConfig,

    pub platform: PlatformConfig,

    #[serde(default)]
    pub env: HashMap<String, EnvValue>,

    #[serde(default)]
    pub health: HealthPolicy,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub environments: HashMap<EnvironmentName, Environment>,
}

/// Per-environment overrides merged over the top-level settings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Environment {
    #[serde(default)]
    pub platform: Option<PlatformConfig>,

    #[serde(default)]
    pub env: HashMap<String, EnvValue>,

    #[serde(default)]
    pub health: Option<HealthPolicy>,

    #[serde(default)]
    pub health_endpoints: Option<NonEmpty<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetryPolicy {
    /// Total push attempts, including the first.
    #[serde(default = "default_push_attempts")]
    pub push_attempts: u32,

    /// Total tries of a timed-out running-artifact query, including the first.
    #[serde(default = "default_query_attempts")]
    pub query_attempts: u32,

    #[serde(default)]
    pub backoff: Backoff,
}

fn default_push_attempts() -> u32 {
    3
}

fn default_query_attempts() -> u32 {
    3
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            push_attempts: default_push_attempts(),
            query_attempts: default_query_attempts(),
            backoff: Backoff::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_stale_after", with = "humantime_serde")]
    pub stale_after: Duration,
}

fn default_stale_after() -> Duration {
    Duration::from_secs(60 * 60)
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after: default_stale_after(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    fn validate(&self) -> Result<()> {
        self.platform.validate().map_err(Error::InvalidConfig)?;
        self.health.validate().map_err(Error::InvalidConfig)?;
        if self.retry.push_attempts == 0 {
            return Err(Error::InvalidConfig(
                "retry.push_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.query_attempts == 0 {
            return Err(Error::InvalidConfig(
                "retry.query_attempts must be at least 1".to_string(),
            ));
        }
        for (name, environment) in &self.environments {
            if let Some(platform) = &environment.platform {
                platform
                    .validate()
                    .map_err(|e| Error::InvalidConfig(format!("environments.{}: {}", name, e)))?;
            }
            if let Some(endpoints) = &environment.health_endpoints {
                backends::validate_health_endpoints(endpoints)
                    .map_err(|e| Error::InvalidConfig(format!("environments.{}: {}", name, e)))?;
            }
            if let Some(health) = &environment.health {
                health
                    .validate()
                    .map_err(|e| Error::InvalidConfig(format!("environments.{}: {}", name, e)))?;
            }
        }
        Ok(())
    }

    /// Settings for one environment.
    ///
    /// When no environments are declared every name is accepted with the
    /// top-level settings; otherwise the name must be declared.
    pub fn for_environment(&self, name: &EnvironmentName) -> Result<Config> {
        if self.environments.is_empty() {
            return Ok(self.clone());
        }

        let environment = self
            .environments
            .get(name)
            .ok_or_else(|| Error::UnknownEnvironment(name.to_string()))?;

        let mut merged = self.clone();

        if let Some(ref platform) = environment.platform {
            merged.platform = platform.clone();
        }

        if let Some(ref endpoints) = environment.health_endpoints {
            merged.platform.health_endpoints = Some(endpoints.clone());
        }

        for (k, v) in &environment.env {
            merged.env.insert(k.clone(), v.clone());
        }

        if let Some(ref health) = environment.health {
            merged.health = health.clone();
        }

        Ok(merged)
    }

    /// Names of declared environments, sorted.
    pub fn environment_names(&self) -> Vec<&EnvironmentName> {
        let mut names: Vec<_> = self.environments.keys().collect();
        names.sort();
        names
    }

    pub fn template() -> Self {
        Config {
            service: ServiceName::new("my-app").expect("template service name is valid"),
            state_dir: default_state_dir(),
            tests: TestsConfig {
                command: "pytest".to_string(),
            },
            build: BuildConfig {
                command: "docker build -q -t \"my-app:$RELEASE_SOURCE_REF\" .".to_string(),
            },
            registry: RegistryConfig {
                push: "docker push \"$RELEASE_ARTIFACT\"".to_string(),
                current: None,
            },
            platform: PlatformConfig {
                update: "./deploy/update.sh \"$RELEASE_ENVIRONMENT\" \"$RELEASE_ARTIFACT\""
                    .to_string(),
                running: Some("./deploy/running.sh \"$RELEASE_ENVIRONMENT\"".to_string()),
                health: Some("./deploy/health.sh \"$RELEASE_ENVIRONMENT\"".to_string()),
                health_endpoints: None,
            },
            env: HashMap::new(),
            health: HealthPolicy::default(),
            retry: RetryPolicy::default(),
            timeouts: Timeouts::default(),
            lock: LockConfig::default(),
            environments: HashMap::new(),
        }
    }
}

/// Pick the state directory: explicit flag, then `RELEASE_STATE_DIR`, then
/// the config file, then the default.
pub fn resolve_state_dir(flag: Option<&Path>, config: Option<&Config>) -> PathBuf {
    if let Some(dir) = flag {
        return dir.to_path_buf();
    }
    if let Some(dir) = std::env::var_os(STATE_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    config
        .map(|c| c.state_dir.clone())
        .unwrap_or_else(default_state_dir)
}
