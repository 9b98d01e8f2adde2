// ABOUTME: Abort command: asks a running attempt, possibly in another process, to stop.
// ABOUTME: Leaves a marker in the state directory that the running sequencer polls for.

use super::{Locations, parse_attempt_id};
use release_sequencer::error::{Error, Result};
use release_sequencer::output::Output;

pub fn abort(locations: &Locations, attempt_id: &str, output: Output) -> Result<i32> {
    let id = parse_attempt_id(attempt_id)?;
    let config = locations.try_load_config()?;
    let store = locations.store(config.as_ref());

    let attempt = store.load(id)?;
    if attempt.stage().is_terminal() {
        return Err(Error::InvalidArgument(format!(
            "attempt {} already finished as {}",
            id,
            attempt.stage()
        )));
    }

    store.request_abort(id)?;
    if attempt.stage().touches_platform() {
        output.success(&format!(
            "Abort requested for {}; {} will be rolled back",
            id,
            attempt.environment()
        ));
    } else {
        output.success(&format!("Abort requested for {}", id));
    }
    Ok(0)
}
