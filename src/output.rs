// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Normal, quiet (CI) and JSON-lines modes for progress, attempts and results.

use serde::Serialize;
use std::time::Instant;

use crate::release::{AuditRecord, ReleaseAttempt, Transition};

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    fn duration_secs(&self) -> Option<f64> {
        self.start_time.map(|t| t.elapsed().as_secs_f64())
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Report a stage change: a line in normal mode, an event in JSON mode.
    pub fn transition(&self, transition: &Transition) {
        match self.mode {
            OutputMode::Normal => println!("  {} -> {}", transition.from, transition.to),
            OutputMode::Quiet => {}
            OutputMode::Json => self.emit(
                &JsonEvent::new("transition", &format!("{} -> {}", transition.from, transition.to))
                    .with_stage(transition.to.as_str()),
                false,
            ),
        }
    }

    /// Print a success message with timing when available.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => match self.duration_secs() {
                Some(elapsed) => println!("{message} ({:.1}s)", elapsed),
                None => println!("{message}"),
            },
            OutputMode::Quiet => println!("{message}"),
            OutputMode::Json => self.emit(
                &JsonEvent::new("success", message).with_duration(self.duration_secs()),
                false,
            ),
        }
    }

    pub fn warning(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Warning: {message}"),
            OutputMode::Json => self.emit(&JsonEvent::new("warning", message), true),
        }
    }

    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Error: {message}"),
            OutputMode::Json => self.emit(
                &JsonEvent::new("error", message).with_duration(self.duration_secs()),
                true,
            ),
        }
    }

    /// Describe one attempt, as for `release status`.
    pub fn attempt(&self, attempt: &ReleaseAttempt) {
        match self.mode {
            OutputMode::Json => {
                if let Ok(json) = serde_json::to_string(attempt) {
                    println!("{json}");
                }
            }
            OutputMode::Quiet => println!("{}", attempt.stage()),
            OutputMode::Normal => {
                println!("Attempt:     {}", attempt.id());
                println!("Environment: {}", attempt.environment());
                println!("Source:      {}", attempt.source_ref());
                println!("Stage:       {}", attempt.stage());
                if let Some(artifact) = attempt.artifact_ref() {
                    println!("Artifact:    {}", artifact);
                }
                if let Some(previous) = attempt.previous_artifact_ref() {
                    println!("Previous:    {}", previous);
                }
                if attempt.push_attempts() > 1 {
                    println!("Pushes:      {}", attempt.push_attempts());
                }
                if let Some(failure) = attempt.failure() {
                    println!("Failure:     {}", failure.message);
                }
                println!("Started:     {}", attempt.created_at().to_rfc3339());
                if let Some(finished) = attempt.finished_at() {
                    println!("Finished:    {}", finished.to_rfc3339());
                }
            }
        }
    }

    /// One line per audit record, as for `release history`.
    pub fn history(&self, records: &[AuditRecord]) {
        for record in records {
            match self.mode {
                OutputMode::Json => {
                    if let Ok(json) = serde_json::to_string(record) {
                        println!("{json}");
                    }
                }
                OutputMode::Normal | OutputMode::Quiet => {
                    let artifact = record
                        .artifact_ref
                        .as_ref()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{}  {:<12} {:<11} {}  {}  {}",
                        record.started_at.format("%Y-%m-%d %H:%M:%S"),
                        record.environment.as_str(),
                        record.outcome.as_str(),
                        record.attempt_id,
                        record.source_ref,
                        artifact
                    );
                }
            }
        }
    }

    fn emit(&self, event: &JsonEvent<'_>, to_stderr: bool) {
        if let Ok(json) = serde_json::to_string(event) {
            if to_stderr {
                eprintln!("{json}");
            } else {
                println!("{json}");
            }
        }
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

impl<'a> JsonEvent<'a> {
    fn new(event: &'a str, message: &'a str) -> Self {
        Self {
            event,
            message,
            stage: None,
            duration_secs: None,
        }
    }

    fn with_stage(mut self, stage: &'a str) -> Self {
        self.stage = Some(stage);
        self
    }

    fn with_duration(mut self, duration_secs: Option<f64>) -> Self {
        self.duration_secs = duration_secs;
        self
    }
}
