//! Stable exit codes for baton CLI commands.

/// Session logged, or a read-only command found nothing wrong.
pub const OK: i32 = 0;
/// Any other failure (config, I/O, validation problems).
pub const FAILED: i32 = 1;
/// Another session holds the workspace lock.
pub const LOCKED: i32 = 2;
/// The model call failed or timed out; nothing was written.
pub const MODEL_FAILED: i32 = 3;
/// The agent output had no usable artifact where one was required.
pub const NO_ARTIFACT: i32 = 4;
/// The proposed ledger was rejected (unparsable, empty, or too many completions).
pub const LEDGER_REJECTED: i32 = 5;
