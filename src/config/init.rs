// ABOUTME: Config scaffolding for new projects.
// ABOUTME: Creates a release.yml template wired to placeholder deploy scripts.

use std::path::Path;

use crate::error::{Error, Result};
use crate::types::ServiceName;

use super::{CONFIG_FILENAME, Config};

pub fn init_config(dir: &Path, service: Option<&str>, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let mut config = Config::template();

    if let Some(s) = service {
        config.service = ServiceName::new(s).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    }

    let yaml = generate_template_yaml(&config);
    std::fs::write(&config_path, yaml)?;

    Ok(())
}

fn generate_template_yaml(config: &Config) -> String {
    let health = &config.health;
    format!(
        r#"service: {service}

# Every command runs under `sh -c` with RELEASE_ATTEMPT_ID, RELEASE_SOURCE_REF,
# RELEASE_ENVIRONMENT, RELEASE_SERVICE and (after the build) RELEASE_ARTIFACT set.
tests:
  command: {tests}

build:
  # The last line printed is the artifact reference (e.g. sha256:...)
  command: {build}

registry:
  push: {push}

platform:
  update: {update}
  running: {running}
  health: {health_cmd}
  # Probe the service's /health route directly instead:
  # health_endpoints:
  #   - http://10.0.0.10:8000/health

health:
  consecutive_successes: {consecutive}
  interval: {interval}s
  window: {window}s
  min_healthy_fraction: {fraction}
  unhealthy_tolerance: {tolerance}

retry:
  push_attempts: {push_attempts}
  query_attempts: {query_attempts}

environments:
  staging: {{}}
  production: {{}}
"#,
        service = config.service,
        tests = yaml_quote(&config.tests.command),
        build = yaml_quote(&config.build.command),
        push = yaml_quote(&config.registry.push),
        update = yaml_quote(&config.platform.update),
        running = yaml_quote(config.platform.running.as_deref().unwrap_or_default()),
        health_cmd = yaml_quote(config.platform.health.as_deref().unwrap_or_default()),
        consecutive = health.consecutive_successes,
        interval = health.interval.as_secs(),
        window = health.window.as_secs(),
        fraction = health.min_healthy_fraction,
        tolerance = health.unhealthy_tolerance,
        push_attempts = config.retry.push_attempts,
        query_attempts = config.retry.query_attempts,
    )
}

fn yaml_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
