//! Optional independent verification of completion claims.
//!
//! When `verify.command` is configured, it runs in the workspace after the
//! agent's files are written. A failing run revokes that session's completion.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::types::Verification;
use crate::io::config::VerifyConfig;
use crate::io::process::run_command_with_timeout;

#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub workdir: PathBuf,
}

/// Outcome plus a short excerpt for the session transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub verification: Verification,
    pub log: String,
}

impl VerifyReport {
    pub fn skipped() -> Self {
        Self {
            verification: Verification::Skipped,
            log: String::new(),
        }
    }
}

pub trait Verifier {
    fn run(&self, request: &VerifyRequest) -> Result<VerifyReport>;
}

/// Runs the configured command; an empty command always skips.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandVerifier {
    pub fn from_config(config: &VerifyConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.command.is_empty()
    }
}

impl Verifier for CommandVerifier {
    #[instrument(skip_all, fields(command = %self.command.join(" ")))]
    fn run(&self, request: &VerifyRequest) -> Result<VerifyReport> {
        let Some((program, args)) = self.command.split_first() else {
            return Ok(VerifyReport::skipped());
        };
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);
        let output = run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes)?;

        let log = render_log(&output.stdout_lossy(), &output.stderr_lossy());
        if output.success() {
            info!("verification passed");
            return Ok(VerifyReport {
                verification: Verification::Passed,
                log,
            });
        }
        warn!(reason = %output.describe_failure(), "verification failed");
        Ok(VerifyReport {
            verification: Verification::Failed,
            log,
        })
    }
}

/// Only verify when the session actually claimed a completion.
pub fn verify_if_claimed<V: Verifier + ?Sized>(
    claimed: bool,
    verifier: &V,
    workdir: &Path,
) -> Result<VerifyReport> {
    if !claimed {
        return Ok(VerifyReport::skipped());
    }
    verifier.run(&VerifyRequest {
        workdir: workdir.to_path_buf(),
    })
}

fn render_log(stdout: &str, stderr: &str) -> String {
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(stdout);
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(stderr);
    buf
}
