// ABOUTME: Environment lock preventing concurrent rollouts to the same environment.
// ABOUTME: Lock files live under <state>/locks/ and are published atomically with hard links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{AttemptId, EnvironmentName};

use super::ReleaseError;

/// Information about who holds an environment lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// Attempt rolling out to the environment.
    pub attempt_id: AttemptId,
    /// Environment being released.
    pub environment: String,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
}

impl LockInfo {
    /// Create new lock info for the current process.
    pub fn new(environment: &EnvironmentName, attempt_id: AttemptId) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            attempt_id,
            environment: environment.to_string(),
            started_at: Utc::now(),
        }
    }

    /// Check if this lock is older than `max_age`.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        let age = Utc::now() - self.started_at;
        age.to_std().map(|age| age >= max_age).unwrap_or(false)
    }

    /// Path to the lock file for an environment.
    pub fn lock_path(lock_dir: &Path, environment: &EnvironmentName) -> PathBuf {
        lock_dir.join(format!("{}.lock", environment))
    }
}

/// A held environment lock. Released explicitly or, as a fallback, on drop.
pub struct EnvironmentLock {
    path: PathBuf,
    attempt_id: AttemptId,
    environment: EnvironmentName,
    released: bool,
}

impl std::fmt::Debug for EnvironmentLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentLock")
            .field("environment", &self.environment)
            .field("attempt_id", &self.attempt_id)
            .finish()
    }
}

impl EnvironmentLock {
    /// Acquire the lock for `environment` on behalf of `attempt_id`.
    ///
    /// Fails with `ReleaseError::Conflict` if another attempt holds it.
    /// Stale (older than `stale_after`) and unreadable locks are broken with a
    /// warning; `force` breaks any lock.
    pub fn acquire(
        lock_dir: &Path,
        environment: &EnvironmentName,
        attempt_id: AttemptId,
        force: bool,
        stale_after: Duration,
    ) -> Result<Self, ReleaseError> {
        fs::create_dir_all(lock_dir).map_err(|e| {
            ReleaseError::lock_error(format!(
                "failed to create lock directory {}: {}",
                lock_dir.display(),
                e
            ))
        })?;

        let path = LockInfo::lock_path(lock_dir, environment);
        let info = LockInfo::new(environment, attempt_id);

        if Self::try_publish(&path, &info)? {
            return Ok(Self::held(path, environment, attempt_id));
        }

        if !Self::should_break(&path, force, stale_after)? {
            return match Self::read_info(&path) {
                Some(existing) => Err(ReleaseError::lock_held(existing)),
                None => Err(ReleaseError::lock_error(
                    "lock held by another process".to_string(),
                )),
            };
        }

        tracing::debug!("Removing stale/forced lock at {}", path.display());
        let _ = fs::remove_file(&path);

        if !Self::try_publish(&path, &info)? {
            return Err(ReleaseError::lock_error(
                "lock acquired by another process during break".to_string(),
            ));
        }

        Ok(Self::held(path, environment, attempt_id))
    }

    /// Fail with a conflict if the environment is currently held.
    ///
    /// Used at trigger time so that a concurrent push is rejected before any
    /// work is done for it.
    pub fn check_available(
        lock_dir: &Path,
        environment: &EnvironmentName,
        force: bool,
        stale_after: Duration,
    ) -> Result<(), ReleaseError> {
        let path = LockInfo::lock_path(lock_dir, environment);
        if force || !path.exists() {
            return Ok(());
        }
        match Self::read_info(&path) {
            Some(existing) if !existing.is_stale(stale_after) => {
                Err(ReleaseError::lock_held(existing))
            }
            _ => Ok(()),
        }
    }

    /// Current holder of the environment lock, if any.
    pub fn holder(lock_dir: &Path, environment: &EnvironmentName) -> Option<LockInfo> {
        Self::read_info(&LockInfo::lock_path(lock_dir, environment))
    }

    pub fn environment(&self) -> &EnvironmentName {
        &self.environment
    }

    /// Release the lock.
    ///
    /// The file is only removed while it still names our attempt; a lock
    /// broken and re-taken by someone else is left alone.
    pub fn release(mut self) -> Result<(), ReleaseError> {
        self.released = true;
        self.remove_if_owned()
    }

    fn held(path: PathBuf, environment: &EnvironmentName, attempt_id: AttemptId) -> Self {
        Self {
            path,
            attempt_id,
            environment: environment.clone(),
            released: false,
        }
    }

    fn remove_if_owned(&self) -> Result<(), ReleaseError> {
        match Self::read_info(&self.path) {
            Some(info) if info.attempt_id == self.attempt_id => {
                fs::remove_file(&self.path).map_err(|e| {
                    ReleaseError::lock_error(format!(
                        "failed to remove {}: {}",
                        self.path.display(),
                        e
                    ))
                })
            }
            _ => Ok(()),
        }
    }

    /// Write lock info to a private temp file, then hard-link it into place.
    /// The link fails if the lock exists, and readers never see a half-written file.
    fn try_publish(path: &Path, info: &LockInfo) -> Result<bool, ReleaseError> {
        let json = serde_json::to_string(info)
            .map_err(|e| ReleaseError::lock_error(format!("failed to serialize lock: {}", e)))?;

        let tmp = path.with_extension(format!("lock.{}.{}", info.pid, info.attempt_id));
        let write_tmp = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()
        };
        write_tmp().map_err(|e| {
            ReleaseError::lock_error(format!("failed to write {}: {}", tmp.display(), e))
        })?;

        let linked = fs::hard_link(&tmp, path);
        let _ = fs::remove_file(&tmp);

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(ReleaseError::lock_error(format!(
                "failed to acquire {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Check if an existing lock should be broken (stale, forced, or corrupted).
    fn should_break(path: &Path, force: bool, stale_after: Duration) -> Result<bool, ReleaseError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            // Released between our attempt and this read
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => {
                return Err(ReleaseError::lock_error(format!(
                    "failed to read lock info: {}",
                    e
                )));
            }
        };

        match serde_json::from_str::<LockInfo>(&content) {
            Ok(existing) => {
                if force {
                    tracing::warn!(
                        "Breaking lock held by attempt {} on {} (pid {}) since {}",
                        existing.attempt_id,
                        existing.holder,
                        existing.pid,
                        existing.started_at
                    );
                    Ok(true)
                } else if existing.is_stale(stale_after) {
                    tracing::warn!(
                        "Auto-breaking stale lock held by attempt {} on {} (pid {}) since {}",
                        existing.attempt_id,
                        existing.holder,
                        existing.pid,
                        existing.started_at
                    );
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Err(_) => {
                tracing::warn!("Lock info corrupted, breaking lock");
                Ok(true)
            }
        }
    }

    fn read_info(path: &Path) -> Option<LockInfo> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

impl Drop for EnvironmentLock {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.remove_if_owned()
        {
            tracing::warn!("Failed to release lock for {}: {}", self.environment, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> EnvironmentName {
        EnvironmentName::new(name).unwrap()
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn lock_info_creates_with_current_host_and_pid() {
        let info = LockInfo::new(&env("staging"), AttemptId::generate());

        assert_eq!(info.environment, "staging");
        assert_eq!(info.pid, std::process::id());
        assert!(!info.holder.is_empty());
    }

    #[test]
    fn lock_path_is_per_environment() {
        let path = LockInfo::lock_path(Path::new("/state/locks"), &env("production"));
        assert_eq!(path, PathBuf::from("/state/locks/production.lock"));
    }

    #[test]
    fn old_lock_is_stale() {
        let mut info = LockInfo::new(&env("test"), AttemptId::generate());
        assert!(!info.is_stale(HOUR));
        info.started_at = Utc::now() - chrono::Duration::hours(2);
        assert!(info.is_stale(HOUR));
    }

    #[test]
    fn second_acquire_conflicts_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let production = env("production");
        let first_id = AttemptId::generate();

        let lock = EnvironmentLock::acquire(dir.path(), &production, first_id, false, HOUR).unwrap();

        let err = EnvironmentLock::acquire(dir.path(), &production, AttemptId::generate(), false, HOUR)
            .unwrap_err();
        assert_eq!(err.lock_holder_info().map(|i| i.attempt_id), Some(first_id));

        lock.release().unwrap();
        EnvironmentLock::acquire(dir.path(), &production, AttemptId::generate(), false, HOUR)
            .unwrap();
    }

    #[test]
    fn environments_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let _staging =
            EnvironmentLock::acquire(dir.path(), &env("staging"), AttemptId::generate(), false, HOUR)
                .unwrap();
        EnvironmentLock::acquire(dir.path(), &env("production"), AttemptId::generate(), false, HOUR)
            .unwrap();
    }

    #[test]
    fn drop_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let staging = env("staging");
        {
            let _lock =
                EnvironmentLock::acquire(dir.path(), &staging, AttemptId::generate(), false, HOUR)
                    .unwrap();
            assert!(EnvironmentLock::holder(dir.path(), &staging).is_some());
        }
        assert!(EnvironmentLock::holder(dir.path(), &staging).is_none());
    }

    #[test]
    fn force_breaks_active_lock() {
        let dir = tempfile::tempdir().unwrap();
        let staging = env("staging");
        let first =
            EnvironmentLock::acquire(dir.path(), &staging, AttemptId::generate(), false, HOUR)
                .unwrap();

        let second_id = AttemptId::generate();
        let _second = EnvironmentLock::acquire(dir.path(), &staging, second_id, true, HOUR).unwrap();

        // The broken holder must not remove the new owner's file
        first.release().unwrap();
        assert_eq!(
            EnvironmentLock::holder(dir.path(), &staging).map(|i| i.attempt_id),
            Some(second_id)
        );
    }

    #[test]
    fn corrupted_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let staging = env("staging");
        fs::write(LockInfo::lock_path(dir.path(), &staging), "not json").unwrap();

        EnvironmentLock::acquire(dir.path(), &staging, AttemptId::generate(), false, HOUR).unwrap();
    }

    #[test]
    fn check_available_reports_holder() {
        let dir = tempfile::tempdir().unwrap();
        let staging = env("staging");
        assert!(EnvironmentLock::check_available(dir.path(), &staging, false, HOUR).is_ok());

        let _lock =
            EnvironmentLock::acquire(dir.path(), &staging, AttemptId::generate(), false, HOUR)
                .unwrap();
        let err = EnvironmentLock::check_available(dir.path(), &staging, false, HOUR).unwrap_err();
        assert!(matches!(err, ReleaseError::Conflict(_)));
        assert!(EnvironmentLock::check_available(dir.path(), &staging, true, HOUR).is_ok());
    }
}
