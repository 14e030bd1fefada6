//! Stable exit codes for the backend CLI.

/// Command succeeded (or the server shut down cleanly).
pub const OK: i32 = 0;
/// Invalid config, unusable socket path or another startup error.
pub const INVALID: i32 = 1;
