//! Coordinator configuration stored under `.baton/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::extract::ExtractLimits;
use crate::io::store::write_atomic;

/// Coordinator configuration (TOML).
///
/// Every field is optional in the file; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatonConfig {
    /// Commit summaries included in bearings.
    pub git_log_limit: usize,

    /// Trailing progress-log lines included in bearings.
    pub progress_tail: usize,

    /// Upper bound on the rendered user directive, in bytes.
    pub prompt_budget_bytes: usize,

    pub model: ModelConfig,
    pub extract: ExtractConfig,
    pub push: PushConfig,
    pub verify: VerifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Wall-clock bound on the whole model round trip.
    pub timeout_secs: u64,
    /// Responses longer than this are truncated before extraction.
    pub max_response_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExtractConfig {
    pub max_artifacts: usize,
    pub max_artifact_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PushConfig {
    pub enabled: bool,
    pub remote: String,
    pub branch: String,
}

/// Optional independent check run before a completion claim is recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifyConfig {
    /// Command and arguments, run in the workspace. Empty disables verification.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "MiniMax-M2.1".to_string(),
            base_url: "https://api.minimax.chat".to_string(),
            max_tokens: 8192,
            temperature: 0.7,
            timeout_secs: 5 * 60,
            max_response_bytes: 2_000_000,
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        let limits = ExtractLimits::default();
        Self {
            max_artifacts: limits.max_artifacts,
            max_artifact_bytes: limits.max_artifact_bytes,
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            remote: "origin".to_string(),
            branch: "main".to_string(),
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for BatonConfig {
    fn default() -> Self {
        Self {
            git_log_limit: 10,
            progress_tail: 5,
            prompt_budget_bytes: 40_000,
            model: ModelConfig::default(),
            extract: ExtractConfig::default(),
            push: PushConfig::default(),
            verify: VerifyConfig::default(),
        }
    }
}

impl BatonConfig {
    pub fn validate(&self) -> Result<()> {
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.model.name.trim().is_empty() {
            return Err(anyhow!("model.name must not be empty"));
        }
        if !(self.model.base_url.starts_with("http://")
            || self.model.base_url.starts_with("https://"))
        {
            return Err(anyhow!(
                "model.base_url must be an http(s) URL (got '{}')",
                self.model.base_url
            ));
        }
        if self.model.max_tokens == 0 {
            return Err(anyhow!("model.max_tokens must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(anyhow!("model.temperature must be within 0.0..=2.0"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.model.max_response_bytes == 0 {
            return Err(anyhow!("model.max_response_bytes must be > 0"));
        }
        if self.extract.max_artifacts == 0 || self.extract.max_artifact_bytes == 0 {
            return Err(anyhow!("extract limits must be > 0"));
        }
        if self.push.enabled
            && (self.push.remote.trim().is_empty() || self.push.branch.trim().is_empty())
        {
            return Err(anyhow!("push.remote and push.branch must be set when push is enabled"));
        }
        if !self.verify.command.is_empty() && self.verify.command[0].trim().is_empty() {
            return Err(anyhow!("verify.command must start with a program name"));
        }
        if self.verify.timeout_secs == 0 || self.verify.output_limit_bytes == 0 {
            return Err(anyhow!("verify limits must be > 0"));
        }
        Ok(())
    }

    pub fn extract_limits(&self) -> ExtractLimits {
        ExtractLimits {
            max_artifacts: self.extract.max_artifacts,
            max_artifact_bytes: self.extract.max_artifact_bytes,
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BatonConfig::default()`.
pub fn load_config(path: &Path) -> Result<BatonConfig> {
    if !path.exists() {
        let cfg = BatonConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BatonConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &BatonConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
