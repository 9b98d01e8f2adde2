// ABOUTME: Diagnostics accumulator for problems that must not change a release outcome.
// ABOUTME: Bookkeeping failures (lock cleanup, audit, state snapshots) are collected and shown afterwards.

use serde::Serialize;

/// Collects non-fatal warnings raised while running an attempt.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{}", warning.message);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    /// The environment lock file may remain behind.
    pub fn lock_release(message: impl Into<String>) -> Self {
        Self::new(WarningKind::LockRelease, message)
    }

    /// The terminal record did not reach the audit sink.
    pub fn audit_write(message: impl Into<String>) -> Self {
        Self::new(WarningKind::AuditWrite, message)
    }

    /// `release status` may show a stale stage.
    pub fn state_persist(message: impl Into<String>) -> Self {
        Self::new(WarningKind::StatePersist, message)
    }

    fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    LockRelease,
    AuditWrite,
    StatePersist,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_starts_empty() {
        let diag = Diagnostics::default();
        assert!(!diag.has_warnings());
        assert!(diag.warnings().is_empty());
    }

    #[test]
    fn diagnostics_collects_warnings_in_order() {
        let mut diag = Diagnostics::default();

        diag.warn(Warning::state_persist("disk full"));
        diag.warn(Warning::audit_write("permission denied"));

        let kinds: Vec<_> = diag.warnings().iter().map(|w| w.kind).collect();
        assert_eq!(kinds, vec![WarningKind::StatePersist, WarningKind::AuditWrite]);
    }

    #[test]
    fn lock_release_warning_kind() {
        assert_eq!(Warning::lock_release("x").kind, WarningKind::LockRelease);
    }
}
