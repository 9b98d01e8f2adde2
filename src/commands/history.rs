// ABOUTME: History command: lists finished attempts from the audit log.
// ABOUTME: Newest first, optionally filtered to one environment.

use super::Locations;
use release_sequencer::error::{Error, Result};
use release_sequencer::output::Output;
use release_sequencer::release::JsonlAuditLog;
use release_sequencer::types::EnvironmentName;

pub fn history(
    locations: &Locations,
    environment: Option<&str>,
    limit: usize,
    output: Output,
) -> Result<i32> {
    let environment = environment
        .map(EnvironmentName::new)
        .transpose()
        .map_err(|e| Error::InvalidArgument(e.to_string()))?;
    let config = locations.try_load_config()?;
    let store = locations.store(config.as_ref());

    let mut records = JsonlAuditLog::new(store.audit_path()).read_all()?;
    if let Some(environment) = &environment {
        records.retain(|r| &r.environment == environment);
    }
    records.reverse();
    records.truncate(limit);

    if records.is_empty() {
        output.progress("No finished releases");
    }
    output.history(&records);
    Ok(0)
}
