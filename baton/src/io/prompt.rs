//! Directive builder: renders the system and user prompts for one session.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::extract::{LEDGER_FILE, PROGRESS_FILE, STARTUP_SCRIPT_FILE};
use crate::core::types::{Bearings, LedgerStatus, SessionKind};
use crate::io::paths::WORKSPACE_DIR;

const INITIALIZER_SYSTEM: &str = include_str!("prompts/initializer_system.md");
const CODING_SYSTEM: &str = include_str!("prompts/coding_system.md");
const INITIALIZER_TEMPLATE: &str = include_str!("prompts/initializer.md");
const CODING_TEMPLATE: &str = include_str!("prompts/coding.md");

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 5] = ["files", "completed", "history", "progress", "pending"];

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
});

/// The two role messages sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub system: String,
    pub user: String,
}

impl Directive {
    /// Both roles as one markdown document, for the session transcript.
    pub fn to_markdown(&self) -> String {
        format!(
            "# System\n\n{}\n\n# User\n\n{}\n",
            self.system.trim_end(),
            self.user.trim_end()
        )
    }
}

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("initializer", INITIALIZER_TEMPLATE)
            .context("load initializer template")?;
        env.add_template("coding", CODING_TEMPLATE)
            .context("load coding template")?;
        Ok(Self { env })
    }

    fn render(&self, kind: &SessionKind, bearings: &Bearings) -> Result<String> {
        let rendered = match kind {
            SessionKind::Initialize { task } => {
                let template = self.env.get_template("initializer")?;
                template.render(context! {
                    task => task.trim(),
                    files => &bearings.files,
                    ledger_file => LEDGER_FILE,
                    startup_script_file => STARTUP_SCRIPT_FILE,
                    progress_file => PROGRESS_FILE,
                    workspace_dir => WORKSPACE_DIR,
                })?
            }
            SessionKind::Coding { instruction } => {
                let template = self.env.get_template("coding")?;
                template.render(context! {
                    instruction => instruction.as_deref().map(str::trim).filter(|s| !s.is_empty()),
                    next_feature => bearings.features_pending.first(),
                    ledger_status => ledger_status_str(bearings.ledger_status),
                    pending => &bearings.features_pending,
                    completed => &bearings.features_completed,
                    progress => &bearings.progress_history,
                    git_log => &bearings.git_log,
                    files => &bearings.files,
                    ledger_file => LEDGER_FILE,
                    progress_file => PROGRESS_FILE,
                    workspace_dir => WORKSPACE_DIR,
                })?
            }
        };
        Ok(rendered)
    }
}

fn ledger_status_str(status: LedgerStatus) -> &'static str {
    match status {
        LedgerStatus::Missing => "missing",
        LedgerStatus::Ok => "ok",
        LedgerStatus::Malformed => "malformed",
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

/// Drop droppable sections in [`DROP_ORDER`] until the total fits, then
/// truncate the last section if it still does not.
fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let over = total(sections);
    if over <= budget {
        return;
    }
    let Some(last) = sections.last_mut() else {
        return;
    };
    let other = over - last.content.len();
    let allowed = budget.saturating_sub(other);
    let before_len = last.content.len();
    let marker = "\n[truncated]";
    let mut cut = allowed.saturating_sub(marker.len());
    while !last.content.is_char_boundary(cut) {
        cut -= 1;
    }
    last.content.truncate(cut);
    if allowed > marker.len() {
        last.content.push_str(marker);
    }
    debug!(
        section = %last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds directives within a byte budget for the user message.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, kind: &SessionKind, bearings: &Bearings) -> Result<Directive> {
        let engine = PromptEngine::new()?;
        let rendered = engine
            .render(kind, bearings)
            .with_context(|| format!("render {} directive", kind.as_str()))?;

        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);

        let system = match kind {
            SessionKind::Initialize { .. } => INITIALIZER_SYSTEM,
            SessionKind::Coding { .. } => CODING_SYSTEM,
        };
        Ok(Directive {
            system: system.trim().to_string(),
            user: render_sections(&sections),
        })
    }
}
