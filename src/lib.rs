// ABOUTME: Library root for the release sequencer - exposes public types for testing.
// ABOUTME: The `release` binary is in main.rs.

pub mod backend;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod output;
pub mod release;
pub mod types;
