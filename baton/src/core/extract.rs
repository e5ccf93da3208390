//! Artifact extraction from free-form agent responses.
//!
//! The agent names every file it wants written with a fenced block whose
//! opening fence carries a `file=` token:
//!
//! ````text
//! ```json file=feature_list.json
//! [...]
//! ```
//! ````
//!
//! Fences without `file=` are treated as prose and skipped. Paths are
//! relative and may not escape the project.

use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Ledger file name, relative to the project root.
pub const LEDGER_FILE: &str = "feature_list.json";
/// Startup script name, relative to the project root.
pub const STARTUP_SCRIPT_FILE: &str = "init.sh";
/// Progress log name; blocks targeting it become the session's progress note.
pub const PROGRESS_FILE: &str = "claude-progress.txt";

static OPEN_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}(?P<fence>`{3,})(?P<info>[^`]*)$").unwrap());
static FILE_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|\s)file=(?:"(?P<dq>[^"]+)"|'(?P<sq>[^']+)'|(?P<bare>\S+))"#).unwrap()
});

/// Bounds applied while extracting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractLimits {
    pub max_artifacts: usize,
    pub max_artifact_bytes: usize,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_artifacts: 64,
            max_artifact_bytes: 1024 * 1024,
        }
    }
}

/// A file the agent asked to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: String,
    pub contents: String,
}

/// Agent response sorted by where each artifact lands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOutput {
    /// Proposed `feature_list.json` contents (unparsed).
    pub ledger: Option<String>,
    pub startup_script: Option<String>,
    /// Text the agent meant for the progress log.
    pub progress_note: Option<String>,
    /// Files destined for the version-controlled workspace.
    pub workspace_files: Vec<Artifact>,
}

impl AgentOutput {
    pub fn is_empty(&self) -> bool {
        self.ledger.is_none()
            && self.startup_script.is_none()
            && self.progress_note.is_none()
            && self.workspace_files.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("unsafe artifact path '{path}' (must be relative and stay inside the project)")]
    UnsafePath { path: String },
    #[error("unterminated fenced block for '{path}' opened on line {line}")]
    Unterminated { path: String, line: usize },
    #[error("agent response names more than {limit} artifacts")]
    TooManyArtifacts { limit: usize },
    #[error("artifact '{path}' is {bytes} bytes (limit {limit})")]
    ArtifactTooLarge {
        path: String,
        bytes: usize,
        limit: usize,
    },
}

/// Extract every `file=` fenced block from `response`, in order.
///
/// A later block for the same path replaces the earlier one in place.
pub fn extract_artifacts(
    response: &str,
    limits: ExtractLimits,
) -> Result<Vec<Artifact>, ExtractError> {
    let lines: Vec<&str> = response.lines().collect();
    let mut artifacts: Vec<Artifact> = Vec::new();
    let mut idx = 0usize;

    while idx < lines.len() {
        let Some(caps) = OPEN_FENCE_RE.captures(lines[idx]) else {
            idx += 1;
            continue;
        };
        let fence_len = caps["fence"].len();
        let target = file_token(&caps["info"]);
        let open_line = idx + 1;

        let close = (idx + 1..lines.len()).find(|&j| is_closing_fence(lines[j], fence_len));
        let Some(path) = target else {
            // Prose fence: skip its body so nested file tokens are not picked up.
            idx = close.map_or(lines.len(), |j| j + 1);
            continue;
        };
        let Some(close) = close else {
            return Err(ExtractError::Unterminated {
                path,
                line: open_line,
            });
        };

        validate_relative_path(&path)?;
        let mut contents = lines[idx + 1..close].join("\n");
        contents.push('\n');
        if contents.len() > limits.max_artifact_bytes {
            return Err(ExtractError::ArtifactTooLarge {
                path,
                bytes: contents.len(),
                limit: limits.max_artifact_bytes,
            });
        }

        match artifacts.iter_mut().find(|a| a.path == path) {
            Some(existing) => existing.contents = contents,
            None => {
                if artifacts.len() >= limits.max_artifacts {
                    return Err(ExtractError::TooManyArtifacts {
                        limit: limits.max_artifacts,
                    });
                }
                artifacts.push(Artifact { path, contents });
            }
        }
        idx = close + 1;
    }

    Ok(artifacts)
}

/// Extract artifacts and route the reserved names.
pub fn parse_agent_output(
    response: &str,
    limits: ExtractLimits,
) -> Result<AgentOutput, ExtractError> {
    let mut output = AgentOutput::default();
    for artifact in extract_artifacts(response, limits)? {
        match artifact.path.as_str() {
            LEDGER_FILE => output.ledger = Some(artifact.contents),
            STARTUP_SCRIPT_FILE => output.startup_script = Some(artifact.contents),
            PROGRESS_FILE => output.progress_note = Some(artifact.contents),
            _ => output.workspace_files.push(artifact),
        }
    }
    Ok(output)
}

/// Reject absolute paths, `..`, `.git`, and anything that is not a plain relative path.
pub fn validate_relative_path(path: &str) -> Result<(), ExtractError> {
    let unsafe_path = || ExtractError::UnsafePath {
        path: path.to_string(),
    };
    if path.trim().is_empty() || path.contains('\\') {
        return Err(unsafe_path());
    }
    let mut components = 0usize;
    for component in Path::new(path).components() {
        match component {
            Component::Normal(name) if name == ".git" => return Err(unsafe_path()),
            Component::Normal(_) => components += 1,
            Component::CurDir => {}
            _ => return Err(unsafe_path()),
        }
    }
    if components == 0 {
        return Err(unsafe_path());
    }
    Ok(())
}

fn file_token(info: &str) -> Option<String> {
    let caps = FILE_TOKEN_RE.captures(info)?;
    let value = caps
        .name("dq")
        .or_else(|| caps.name("sq"))
        .or_else(|| caps.name("bare"))?
        .as_str();
    let value = value.strip_prefix("./").unwrap_or(value);
    Some(value.to_string())
}

fn is_closing_fence(line: &str, open_len: usize) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= open_len && trimmed.chars().all(|c| c == '`')
}
