// ABOUTME: Test support utilities.
// ABOUTME: Scriptable in-memory collaborators and sequencer setup for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use release_sequencer::backend::{
    ArtifactBuilder, ArtifactRegistry, BackendError, OrchestrationPlatform, TestRunner, Verdict,
};
use release_sequencer::config::{HealthPolicy, LockConfig, RetryPolicy, Timeouts};
use release_sequencer::release::{
    AttemptStore, Backoff, Collaborators, InstanceHealth, MemoryAuditSink, ReleaseContext,
    Sequencer, SequencerSettings,
};
use release_sequencer::types::{ArtifactRef, EnvironmentName, SourceRef};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::Notify;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("release_sequencer=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn artifact(s: &str) -> ArtifactRef {
    ArtifactRef::parse(s).unwrap()
}

pub fn env(name: &str) -> EnvironmentName {
    EnvironmentName::new(name).unwrap()
}

pub fn source(s: &str) -> SourceRef {
    SourceRef::new(s).unwrap()
}

/// Every collaborator call, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Test,
    Build,
    Push(String),
    CurrentProduction,
    RunningArtifact,
    UpdateTo(String),
    Health,
}

/// One scriptable fake standing in for all four external systems.
pub struct FakeBackend {
    calls: Mutex<Vec<Call>>,
    verdict: Mutex<Verdict>,
    build: Mutex<Result<String, String>>,
    push_failures: Mutex<u32>,
    running: Mutex<Option<ArtifactRef>>,
    platform_reports_running: Mutex<bool>,
    hanging_running_queries: Mutex<u32>,
    registry_current: Mutex<Option<ArtifactRef>>,
    health: Mutex<HashMap<String, Vec<InstanceHealth>>>,
    failing_updates: Mutex<Vec<String>>,
    hanging_updates: Mutex<Vec<String>>,
    update_gate: Mutex<Option<(String, Arc<Notify>)>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            verdict: Mutex::new(Verdict::Pass),
            build: Mutex::new(Ok("sha256:111".to_string())),
            push_failures: Mutex::new(0),
            running: Mutex::new(Some(artifact("sha256:000"))),
            platform_reports_running: Mutex::new(true),
            hanging_running_queries: Mutex::new(0),
            registry_current: Mutex::new(None),
            health: Mutex::new(HashMap::new()),
            failing_updates: Mutex::new(Vec::new()),
            hanging_updates: Mutex::new(Vec::new()),
            update_gate: Mutex::new(None),
        }
    }
}

impl FakeBackend {
    /// Tests pass, build yields sha256:111, sha256:000 is running and every
    /// artifact reports three healthy instances.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_tests(self, summary: &str) -> Self {
        *self.verdict.lock() = Verdict::Fail(summary.to_string());
        self
    }

    pub fn failing_build(self, message: &str) -> Self {
        *self.build.lock() = Err(message.to_string());
        self
    }

    pub fn builds(self, artifact: &str) -> Self {
        *self.build.lock() = Ok(artifact.to_string());
        self
    }

    /// Reject this many pushes before acknowledging.
    pub fn push_failures(self, count: u32) -> Self {
        *self.push_failures.lock() = count;
        self
    }

    pub fn running(self, running: Option<&str>) -> Self {
        *self.running.lock() = running.map(artifact);
        self
    }

    /// The platform answers "unknown" and the registry must be asked.
    pub fn platform_blind(self) -> Self {
        *self.platform_reports_running.lock() = false;
        self
    }

    /// The first `count` running-artifact queries never return.
    pub fn hanging_running_queries(self, count: u32) -> Self {
        *self.hanging_running_queries.lock() = count;
        self
    }

    pub fn registry_current(self, current: Option<&str>) -> Self {
        *self.registry_current.lock() = current.map(artifact);
        self
    }

    /// Health reported while `artifact` is running.
    pub fn health_for(self, artifact: &str, health: Vec<InstanceHealth>) -> Self {
        self.health.lock().insert(artifact.to_string(), health);
        self
    }

    pub fn failing_update_to(self, artifact: &str) -> Self {
        self.failing_updates.lock().push(artifact.to_string());
        self
    }

    /// Updates to `artifact` never return.
    pub fn hanging_update_to(self, artifact: &str) -> Self {
        self.hanging_updates.lock().push(artifact.to_string());
        self
    }

    /// Updates to `artifact` wait for `gate` to be notified.
    pub fn gated_update_to(self, artifact: &str, gate: Arc<Notify>) -> Self {
        *self.update_gate.lock() = Some((artifact.to_string(), gate));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn updates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::UpdateTo(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    pub fn current(&self) -> Option<ArtifactRef> {
        self.running.lock().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl TestRunner for FakeBackend {
    async fn run(&self, _ctx: &ReleaseContext) -> Result<Verdict, BackendError> {
        self.record(Call::Test);
        Ok(self.verdict.lock().clone())
    }
}

#[async_trait]
impl ArtifactBuilder for FakeBackend {
    async fn build(&self, _ctx: &ReleaseContext) -> Result<ArtifactRef, BackendError> {
        self.record(Call::Build);
        let result = self.build.lock().clone();
        match result {
            Ok(s) => ArtifactRef::parse(&s).map_err(|e| BackendError::InvalidOutput(e.to_string())),
            Err(message) => Err(BackendError::Other(message)),
        }
    }
}

#[async_trait]
impl ArtifactRegistry for FakeBackend {
    async fn push(&self, _ctx: &ReleaseContext, artifact: &ArtifactRef) -> Result<(), BackendError> {
        self.record(Call::Push(artifact.to_string()));
        let mut remaining = self.push_failures.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(BackendError::Other("registry unavailable".to_string()));
        }
        Ok(())
    }

    async fn current_production(
        &self,
        _environment: &EnvironmentName,
    ) -> Result<Option<ArtifactRef>, BackendError> {
        self.record(Call::CurrentProduction);
        Ok(self.registry_current.lock().clone())
    }
}

#[async_trait]
impl OrchestrationPlatform for FakeBackend {
    async fn update_to(
        &self,
        _environment: &EnvironmentName,
        artifact: &ArtifactRef,
    ) -> Result<(), BackendError> {
        let target = artifact.to_string();
        self.record(Call::UpdateTo(target.clone()));

        let gate = self
            .update_gate
            .lock()
            .as_ref()
            .filter(|(a, _)| *a == target)
            .map(|(_, gate)| gate.clone());
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let hangs = self.hanging_updates.lock().contains(&target);
        if hangs {
            std::future::pending::<()>().await;
        }
        let fails = self.failing_updates.lock().contains(&target);
        if fails {
            return Err(BackendError::Other(format!("platform rejected {}", target)));
        }

        *self.running.lock() = Some(artifact.clone());
        Ok(())
    }

    async fn instance_health(
        &self,
        _environment: &EnvironmentName,
    ) -> Result<Vec<InstanceHealth>, BackendError> {
        self.record(Call::Health);
        let running = self.running.lock().clone();
        let Some(running) = running else {
            return Ok(Vec::new());
        };
        Ok(self
            .health
            .lock()
            .get(&running.to_string())
            .cloned()
            .unwrap_or_else(|| vec![InstanceHealth::Healthy; 3]))
    }

    async fn running_artifact(
        &self,
        _environment: &EnvironmentName,
    ) -> Result<Option<ArtifactRef>, BackendError> {
        self.record(Call::RunningArtifact);
        let hangs = {
            let mut remaining = self.hanging_running_queries.lock();
            let hangs = *remaining > 0;
            if hangs {
                *remaining -= 1;
            }
            hangs
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        if *self.platform_reports_running.lock() {
            Ok(self.running.lock().clone())
        } else {
            Ok(None)
        }
    }
}

/// Millisecond-scale policies so scenarios finish quickly.
pub fn fast_settings() -> SequencerSettings {
    SequencerSettings {
        health: HealthPolicy {
            consecutive_successes: 3,
            interval: Duration::from_millis(5),
            backoff_multiplier: 1.0,
            max_interval: Duration::from_millis(5),
            window: Duration::from_millis(500),
            min_healthy_fraction: 1.0,
            unhealthy_tolerance: 3,
        },
        retry: RetryPolicy {
            push_attempts: 3,
            query_attempts: 3,
            backoff: Backoff::fixed(Duration::from_millis(1)),
        },
        timeouts: Timeouts {
            tests: Duration::from_secs(5),
            build: Duration::from_secs(5),
            push: Duration::from_secs(5),
            deploy: Duration::from_secs(5),
            query: Duration::from_secs(5),
            health_probe: Duration::from_secs(5),
        },
        lock: LockConfig::default(),
        force: false,
    }
}

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub audit: Arc<MemoryAuditSink>,
    pub sequencer: Arc<Sequencer>,
    pub store: AttemptStore,
}

pub fn harness(backend: FakeBackend, settings: SequencerSettings, state_dir: &Path) -> Harness {
    init_tracing();
    let backend = Arc::new(backend);
    let audit = Arc::new(MemoryAuditSink::new());
    let store = AttemptStore::new(state_dir);
    let sequencer = Sequencer::new(
        Collaborators::from_backend(backend.clone()),
        settings,
        store.clone(),
        audit.clone(),
    );
    Harness {
        backend,
        audit,
        sequencer: Arc::new(sequencer),
        store,
    }
}
