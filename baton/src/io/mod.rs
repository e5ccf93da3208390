//! Side-effecting collaborators: filesystem, git, processes, HTTP, locking.

pub mod config;
pub mod git;
pub mod ledger;
pub mod lock;
pub mod paths;
pub mod process;
pub mod progress_log;
pub mod prompt;
pub mod provider;
pub mod store;
pub mod transcript;
pub mod verify;
