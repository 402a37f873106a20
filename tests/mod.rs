//! Integration tests for panplay
//!
//! Tests are organized by component:
//! - drive_test: Drive API client (URL resolution, history, listing, tags)
//! - gateway_test: Local redirect gateway and its URL cache
//! - ipc_test: mpv JSON IPC control channel
//! - tracker_test: Position tracking across playlist switches
//! - session_test: Launch preparation and session teardown
//! - cli_test: Argument parsing, JSON output, and command handlers

// Note: Each test file is a separate integration test crate
// Tests are run individually by cargo, not via mod.rs
