// ABOUTME: Status command: prints a stored attempt.
// ABOUTME: The exit code encodes the stage so CI can poll it.

use super::{Locations, parse_attempt_id};
use release_sequencer::error::Result;
use release_sequencer::output::Output;
use release_sequencer::release::EnvironmentLock;

pub fn status(locations: &Locations, attempt_id: &str, output: Output) -> Result<i32> {
    let id = parse_attempt_id(attempt_id)?;
    let config = locations.try_load_config()?;
    let store = locations.store(config.as_ref());

    let attempt = store.load(id)?;
    output.attempt(&attempt);

    if !attempt.stage().is_terminal()
        && let Some(holder) = EnvironmentLock::holder(&store.lock_dir(), attempt.environment())
        && holder.attempt_id != attempt.id()
    {
        output.warning(&format!(
            "{} is locked by attempt {}",
            attempt.environment(),
            holder.attempt_id
        ));
    }

    Ok(attempt.stage().exit_code())
}
