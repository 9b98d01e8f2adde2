// ABOUTME: On-disk store for release attempts, abort requests and lock files.
// ABOUTME: Attempts are JSON files written via temp-file + rename so readers never see partial state.

use snafu::{ResultExt, Snafu};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{AttemptId, EnvironmentName};

use super::attempt::ReleaseAttempt;

const ATTEMPTS_DIR: &str = "attempts";
const LOCKS_DIR: &str = "locks";
const ABORTS_DIR: &str = "aborts";
const AUDIT_FILE: &str = "audit.jsonl";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("failed to create {}: {source}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to write {}: {source}", path.display()))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to read {}: {source}", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("no release attempt with id {id}"))]
    NotFound { id: AttemptId },

    #[snafu(display("corrupt record in {}: {source}", path.display()))]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("failed to encode attempt {id}: {source}"))]
    Encode {
        id: AttemptId,
        source: serde_json::Error,
    },

    #[snafu(display("audit sink rejected record: {message}"))]
    Sink { message: String },
}

/// Directory-backed persistence for release attempts.
///
/// Layout under the root:
/// `attempts/<id>.json`, `locks/<env>.lock`, `aborts/<id>`, `audit.jsonl`.
#[derive(Debug, Clone)]
pub struct AttemptStore {
    root: PathBuf,
}

impl AttemptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.root.join(LOCKS_DIR)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.root.join(AUDIT_FILE)
    }

    fn attempt_path(&self, id: AttemptId) -> PathBuf {
        self.root.join(ATTEMPTS_DIR).join(format!("{}.json", id))
    }

    fn abort_path(&self, id: AttemptId) -> PathBuf {
        self.root.join(ABORTS_DIR).join(id.to_string())
    }

    /// Persist the attempt, replacing any earlier snapshot.
    pub fn save(&self, attempt: &ReleaseAttempt) -> Result<(), StoreError> {
        let path = self.attempt_path(attempt.id());
        let json = serde_json::to_vec_pretty(attempt).context(EncodeSnafu { id: attempt.id() })?;
        write_atomic(&path, &json)
    }

    pub fn load(&self, id: AttemptId) -> Result<ReleaseAttempt, StoreError> {
        let path = self.attempt_path(id);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return NotFoundSnafu { id }.fail();
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        serde_json::from_slice(&content).context(CorruptSnafu { path })
    }

    /// Every stored attempt, newest first. Unreadable files are skipped with a warning.
    pub fn list(&self) -> Result<Vec<ReleaseAttempt>, StoreError> {
        let dir = self.root.join(ATTEMPTS_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Read { path: dir, source }),
        };

        let mut attempts = Vec::new();
        for entry in entries {
            let entry = entry.context(ReadSnafu { path: dir.clone() })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|c| {
                    serde_json::from_slice::<ReleaseAttempt>(&c).map_err(|e| e.to_string())
                }) {
                Ok(attempt) => attempts.push(attempt),
                Err(e) => tracing::warn!("Skipping unreadable attempt {}: {}", path.display(), e),
            }
        }

        attempts.sort_by_key(|a| std::cmp::Reverse(a.created_at()));
        Ok(attempts)
    }

    /// Attempts for one environment, newest first.
    pub fn list_for(&self, environment: &EnvironmentName) -> Result<Vec<ReleaseAttempt>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|a| a.environment() == environment)
            .collect())
    }

    /// Leave an abort marker for a running attempt, possibly in another process.
    pub fn request_abort(&self, id: AttemptId) -> Result<(), StoreError> {
        write_atomic(&self.abort_path(id), b"")
    }

    pub fn abort_requested(&self, id: AttemptId) -> bool {
        self.abort_path(id).exists()
    }

    pub fn clear_abort(&self, id: AttemptId) -> Result<(), StoreError> {
        let path = self.abort_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Write { path, source }),
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context(CreateDirSnafu { path: parent })?;
    }
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    fs::write(&tmp, bytes).context(WriteSnafu { path: &tmp })?;
    fs::rename(&tmp, path).context(WriteSnafu { path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceRef;

    fn attempt(env: &str) -> ReleaseAttempt {
        ReleaseAttempt::new(
            SourceRef::new("abc123").unwrap(),
            EnvironmentName::new(env).unwrap(),
        )
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttemptStore::new(dir.path());
        let attempt = attempt("staging");

        store.save(&attempt).unwrap();
        assert_eq!(store.load(attempt.id()).unwrap(), attempt);
    }

    #[test]
    fn missing_attempt_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttemptStore::new(dir.path());

        let err = store.load(AttemptId::generate()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn corrupt_attempt_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttemptStore::new(dir.path());
        let id = AttemptId::generate();
        fs::create_dir_all(dir.path().join(ATTEMPTS_DIR)).unwrap();
        fs::write(store.attempt_path(id), "{").unwrap();

        assert!(matches!(store.load(id), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn list_filters_by_environment() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttemptStore::new(dir.path());
        store.save(&attempt("staging")).unwrap();
        store.save(&attempt("production")).unwrap();
        store.save(&attempt("production")).unwrap();

        assert_eq!(store.list().unwrap().len(), 3);
        let production = EnvironmentName::new("production").unwrap();
        assert_eq!(store.list_for(&production).unwrap().len(), 2);
    }

    #[test]
    fn abort_marker_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttemptStore::new(dir.path());
        let id = AttemptId::generate();

        assert!(!store.abort_requested(id));
        store.request_abort(id).unwrap();
        assert!(store.abort_requested(id));
        store.clear_abort(id).unwrap();
        assert!(!store.abort_requested(id));
        store.clear_abort(id).unwrap();
    }
}
