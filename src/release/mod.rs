// ABOUTME: Release attempts and the sequencer that drives them to a terminal stage.
// ABOUTME: Exports the attempt record, stage table, environment lock, store and health gate.

mod abort;
mod attempt;
mod audit;
mod backoff;
mod error;
mod health;
mod lock;
mod sequencer;
mod stage;
mod store;

pub use abort::{AbortHandle, AbortSignal, abort_channel};
pub use attempt::{HealthCheckResult, ReleaseAttempt, ReleaseContext, StageEntry};
pub use audit::{AuditRecord, AuditSink, JsonlAuditLog, MemoryAuditSink};
pub use backoff::Backoff;
pub use error::{FailureRecord, ReleaseError, ReleaseErrorKind};
pub use health::{GateProgress, HealthSummary, HealthTracker, InstanceHealth, await_healthy};
pub use lock::{EnvironmentLock, LockInfo};
pub use sequencer::{Collaborators, RunOutcome, Sequencer, SequencerSettings, Transition};
pub use stage::Stage;
pub use store::{AttemptStore, StoreError};
