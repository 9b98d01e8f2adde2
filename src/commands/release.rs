// ABOUTME: Manual release trigger: runs one attempt in the foreground.
// ABOUTME: Wires the command backend, store and audit log into a sequencer and reports progress.

use super::Locations;
use release_sequencer::backend::CommandBackend;
use release_sequencer::config::Config;
use release_sequencer::error::{Error, Result};
use release_sequencer::output::Output;
use release_sequencer::release::{
    Collaborators, JsonlAuditLog, Sequencer, SequencerSettings, Stage, abort_channel,
};
use release_sequencer::types::{EnvironmentName, SourceRef};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const ABORT_POLL: Duration = Duration::from_millis(500);

/// Release `environment` and return the exit code.
pub async fn release(
    locations: &Locations,
    environment: &str,
    source: Option<String>,
    force: bool,
    mut output: Output,
) -> Result<i32> {
    let environment =
        EnvironmentName::new(environment).map_err(|e| Error::InvalidArgument(e.to_string()))?;
    let config = locations.load_config()?;
    let merged = config.for_environment(&environment)?;
    let store = locations.store(Some(&config));

    let backend = Arc::new(CommandBackend::from_config(&merged, &locations.cwd)?);
    let audit = Arc::new(JsonlAuditLog::new(store.audit_path()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sequencer = Sequencer::new(
        Collaborators::from_backend(backend),
        SequencerSettings::from_config(&merged, force),
        store.clone(),
        audit,
    )
    .with_progress(tx);

    let source = resolve_source(source, &locations.cwd).await?;
    let attempt = sequencer.trigger(source, environment.clone())?;

    output.start_timer();
    output.progress(&format!(
        "Releasing {} {} to {} (attempt {})",
        merged.service,
        attempt.source_ref(),
        environment,
        attempt.id()
    ));
    describe_environment(&merged, &environment, &output);

    let (handle, signal) = abort_channel();
    let on_signal = handle.abort_on_signal();
    let on_marker = handle.abort_on_marker(store, attempt.id(), ABORT_POLL);

    let run = sequencer.run(attempt, signal);
    tokio::pin!(run);
    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome?,
            Some(transition) = rx.recv() => output.transition(&transition),
        }
    };
    while let Ok(transition) = rx.try_recv() {
        output.transition(&transition);
    }
    on_signal.abort();
    on_marker.abort();

    for warning in outcome.diagnostics.warnings() {
        output.warning(&warning.message);
    }

    let attempt = &outcome.attempt;
    let reason = outcome
        .error
        .as_ref()
        .map(|e| e.to_string())
        .unwrap_or_default();
    match attempt.stage() {
        Stage::Succeeded => output.success(&format!(
            "Released {} to {}",
            attempt
                .artifact_ref()
                .map(|a| a.to_string())
                .unwrap_or_default(),
            environment
        )),
        Stage::RolledBack => match attempt.previous_artifact_ref() {
            Some(previous) => output.error(&format!(
                "Rolled back {} to {}: {}",
                environment, previous, reason
            )),
            None => output.error(&format!(
                "Stopped {} before any update was sent: {}",
                environment, reason
            )),
        },
        stage => output.error(&format!("Release {} {}: {}", attempt.id(), stage, reason)),
    }

    Ok(attempt.stage().exit_code())
}

fn describe_environment(config: &Config, environment: &EnvironmentName, output: &Output) {
    if let Some(endpoints) = &config.platform.health_endpoints {
        output.progress(&format!(
            "  health gate for {}: {} endpoint(s), {} consecutive pass(es), window {}s",
            environment,
            endpoints.len(),
            config.health.consecutive_successes,
            config.health.window.as_secs()
        ));
    }
}

/// Pick the revision to release: flag, then `$GITHUB_SHA`, then the checkout's HEAD.
async fn resolve_source(flag: Option<String>, cwd: &std::path::Path) -> Result<SourceRef> {
    let value = match flag.or_else(|| std::env::var("GITHUB_SHA").ok().filter(|s| !s.is_empty()))
    {
        Some(value) => value,
        None => git_head(cwd).await?,
    };
    SourceRef::new(&value).map_err(|e| Error::InvalidArgument(e.to_string()))
}

async fn git_head(cwd: &std::path::Path) -> Result<String> {
    let output = tokio::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| Error::InvalidArgument(format!("no --source given and git failed: {}", e)))?;
    if !output.status.success() {
        return Err(Error::InvalidArgument(
            "no --source given and not inside a git checkout".to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
