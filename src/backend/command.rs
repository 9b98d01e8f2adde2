// ABOUTME: Shell-command implementation of every backend interface.
// ABOUTME: Each operation runs a configured `sh -c` command with RELEASE_* variables describing the attempt.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::config::{Config, resolve_env_map};
use crate::error::Result;
use crate::release::{InstanceHealth, ReleaseContext};
use crate::types::{ArtifactRef, EnvironmentName, ServiceName};

use super::http::HttpHealthProbe;
use super::{
    ArtifactBuilder, ArtifactRegistry, BackendError, OrchestrationPlatform, TestRunner, Verdict,
};

/// Variables set for every command.
pub const ENV_ATTEMPT_ID: &str = "RELEASE_ATTEMPT_ID";
pub const ENV_SOURCE_REF: &str = "RELEASE_SOURCE_REF";
pub const ENV_ENVIRONMENT: &str = "RELEASE_ENVIRONMENT";
pub const ENV_SERVICE: &str = "RELEASE_SERVICE";
pub const ENV_ARTIFACT: &str = "RELEASE_ARTIFACT";

/// Runs the commands from `release.yml`.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    service: ServiceName,
    workdir: PathBuf,
    env: HashMap<String, String>,
    tests: String,
    build: String,
    push: String,
    current: Option<String>,
    update: String,
    running: Option<String>,
    health: Option<String>,
    probe: Option<HttpHealthProbe>,
}

struct CommandOutput {
    success: bool,
    status: String,
    stdout: String,
    stderr: String,
}

impl CommandBackend {
    /// Build from a config already merged for one environment.
    pub fn from_config(config: &Config, workdir: &Path) -> Result<Self> {
        let probe = config
            .platform
            .health_endpoints
            .as_ref()
            .map(|endpoints| HttpHealthProbe::new(endpoints.clone(), config.timeouts.health_probe));

        Ok(Self {
            service: config.service.clone(),
            workdir: workdir.to_path_buf(),
            env: resolve_env_map(&config.env)?,
            tests: config.tests.command.clone(),
            build: config.build.command.clone(),
            push: config.registry.push.clone(),
            current: config.registry.current.clone(),
            update: config.platform.update.clone(),
            running: config.platform.running.clone(),
            health: config.platform.health.clone(),
            probe,
        })
    }

    fn context_vars(&self, ctx: &ReleaseContext) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            (ENV_ATTEMPT_ID, ctx.attempt_id.to_string()),
            (ENV_SOURCE_REF, ctx.source_ref.to_string()),
            (ENV_ENVIRONMENT, ctx.environment.to_string()),
            (ENV_SERVICE, self.service.to_string()),
        ];
        if let Some(artifact) = &ctx.artifact_ref {
            vars.push((ENV_ARTIFACT, artifact.to_string()));
        }
        vars
    }

    fn environment_vars(
        &self,
        environment: &EnvironmentName,
        artifact: Option<&ArtifactRef>,
    ) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            (ENV_ENVIRONMENT, environment.to_string()),
            (ENV_SERVICE, self.service.to_string()),
        ];
        if let Some(artifact) = artifact {
            vars.push((ENV_ARTIFACT, artifact.to_string()));
        }
        vars
    }

    async fn exec(
        &self,
        command: &str,
        vars: &[(&'static str, String)],
    ) -> std::result::Result<CommandOutput, BackendError> {
        tracing::debug!("Running `{}`", command);

        // The child is killed if the caller's timeout drops this future
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .envs(&self.env)
            .envs(vars.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| BackendError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let result = CommandOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success {
            tracing::debug!("`{}` failed with {}", command, result.status);
        }
        Ok(result)
    }

    /// Run a command that must succeed.
    async fn exec_checked(
        &self,
        command: &str,
        vars: &[(&'static str, String)],
    ) -> std::result::Result<String, BackendError> {
        let output = self.exec(command, vars).await?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(BackendError::CommandFailed {
                command: command.to_string(),
                status: output.status,
                stderr: last_line(&output.stderr).unwrap_or_default().to_string(),
            })
        }
    }

    /// Run an optional query command and read an artifact from its last line.
    async fn query_artifact(
        &self,
        command: Option<&str>,
        vars: &[(&'static str, String)],
    ) -> std::result::Result<Option<ArtifactRef>, BackendError> {
        let Some(command) = command else {
            return Ok(None);
        };
        let stdout = self.exec_checked(command, vars).await?;
        last_line(&stdout)
            .map(|line| {
                ArtifactRef::parse(line)
                    .map_err(|e| BackendError::InvalidOutput(format!("`{}`: {}", command, e)))
            })
            .transpose()
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rfind(|line| !line.is_empty())
}

#[async_trait]
impl TestRunner for CommandBackend {
    async fn run(&self, ctx: &ReleaseContext) -> std::result::Result<Verdict, BackendError> {
        let output = self.exec(&self.tests, &self.context_vars(ctx)).await?;
        if output.success {
            return Ok(Verdict::Pass);
        }
        let summary = last_line(&output.stderr)
            .or_else(|| last_line(&output.stdout))
            .map(|line| format!("{} ({})", line, output.status))
            .unwrap_or(output.status);
        Ok(Verdict::Fail(summary))
    }
}

#[async_trait]
impl ArtifactBuilder for CommandBackend {
    async fn build(&self, ctx: &ReleaseContext) -> std::result::Result<ArtifactRef, BackendError> {
        let stdout = self.exec_checked(&self.build, &self.context_vars(ctx)).await?;
        let line = last_line(&stdout)
            .ok_or_else(|| BackendError::InvalidOutput("build printed no artifact reference".into()))?;
        ArtifactRef::parse(line).map_err(|e| BackendError::InvalidOutput(e.to_string()))
    }
}

#[async_trait]
impl ArtifactRegistry for CommandBackend {
    async fn push(
        &self,
        ctx: &ReleaseContext,
        artifact: &ArtifactRef,
    ) -> std::result::Result<(), BackendError> {
        let mut vars = self.context_vars(ctx);
        vars.retain(|(k, _)| *k != ENV_ARTIFACT);
        vars.push((ENV_ARTIFACT, artifact.to_string()));
        self.exec_checked(&self.push, &vars).await.map(|_| ())
    }

    async fn current_production(
        &self,
        environment: &EnvironmentName,
    ) -> std::result::Result<Option<ArtifactRef>, BackendError> {
        self.query_artifact(
            self.current.as_deref(),
            &self.environment_vars(environment, None),
        )
        .await
    }
}

#[async_trait]
impl OrchestrationPlatform for CommandBackend {
    async fn update_to(
        &self,
        environment: &EnvironmentName,
        artifact: &ArtifactRef,
    ) -> std::result::Result<(), BackendError> {
        self.exec_checked(&self.update, &self.environment_vars(environment, Some(artifact)))
            .await
            .map(|_| ())
    }

    async fn instance_health(
        &self,
        environment: &EnvironmentName,
    ) -> std::result::Result<Vec<InstanceHealth>, BackendError> {
        if let Some(probe) = &self.probe {
            return Ok(probe.probe_all().await);
        }
        let Some(command) = self.health.as_deref() else {
            return Err(BackendError::Other(
                "no health command or endpoints configured".to_string(),
            ));
        };

        let stdout = self
            .exec_checked(command, &self.environment_vars(environment, None))
            .await?;
        stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| line.parse().map_err(BackendError::InvalidOutput))
            .collect()
    }

    async fn running_artifact(
        &self,
        environment: &EnvironmentName,
    ) -> std::result::Result<Option<ArtifactRef>, BackendError> {
        self.query_artifact(
            self.running.as_deref(),
            &self.environment_vars(environment, None),
        )
        .await
    }
}
