// ABOUTME: Command handlers for the release CLI.
// ABOUTME: Each handler returns the process exit code; shared config and state lookup lives here.

mod abort;
mod history;
mod release;
mod status;

pub use abort::abort;
pub use history::history;
pub use release::release;
pub use status::status;

use release_sequencer::config::{self, Config};
use release_sequencer::error::{Error, Result};
use release_sequencer::release::AttemptStore;
use release_sequencer::types::AttemptId;
use std::path::{Path, PathBuf};

/// Where to find configuration and state, as given on the command line.
pub struct Locations {
    pub cwd: PathBuf,
    pub config: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
}

impl Locations {
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => Config::load(path),
            None => Config::discover(&self.cwd),
        }
    }

    /// Config is optional for commands that only read state.
    pub fn try_load_config(&self) -> Result<Option<Config>> {
        match self.load_config() {
            Ok(config) => Ok(Some(config)),
            Err(Error::ConfigNotFound(_)) if self.config.is_none() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn store(&self, config: Option<&Config>) -> AttemptStore {
        let dir = config::resolve_state_dir(self.state_dir.as_deref(), config);
        AttemptStore::new(absolutize(&self.cwd, &dir))
    }
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

pub fn parse_attempt_id(input: &str) -> Result<AttemptId> {
    input
        .parse()
        .map_err(|e: release_sequencer::types::ParseAttemptIdError| {
            Error::InvalidArgument(e.to_string())
        })
}
