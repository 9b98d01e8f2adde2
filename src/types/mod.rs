// ABOUTME: Validated domain types shared across the sequencer.
// ABOUTME: Attempt IDs, artifact references, source refs and DNS-style names.

mod artifact_ref;
mod id;
mod name;
mod source_ref;

pub use artifact_ref::{ArtifactRef, ParseArtifactRefError};
pub use id::{AttemptId, ParseAttemptIdError};
pub use name::{EnvironmentName, NameError, ServiceName};
pub use source_ref::{SourceRef, SourceRefError};
