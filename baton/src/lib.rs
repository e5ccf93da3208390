//! Resumable agent-session coordinator.
//!
//! Each invocation runs one bounded session: gather bearings from durable
//! artifacts (progress log, feature ledger, git history), make one model call,
//! apply the agent's output, commit, and append one progress entry. Sessions
//! are stateless; everything the next one needs is on disk.
//!
//! - **[`core`]**: Pure, deterministic logic (artifact extraction, ledger merge,
//!   progress entry format). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (state store, git, processes, HTTP,
//!   locking) behind traits so sessions can be driven by fakes.
//!
//! Orchestration modules ([`bearings`], [`session`], [`validate`]) coordinate
//! core logic with I/O to implement CLI commands.

pub mod bearings;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
