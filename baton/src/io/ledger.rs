//! Load and rewrite `feature_list.json` with schema validation.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::types::FeatureRecord;
use crate::io::store::StateStore;

/// JSON Schema every ledger document must satisfy.
pub const LEDGER_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/feature_list.schema.json"
));

/// What was found on disk when loading the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerLoad {
    Missing,
    Loaded(Vec<FeatureRecord>),
    /// Present but unparseable; `raw` is kept so a rewrite can preserve it.
    Malformed { raw: String, error: String },
}

impl LedgerLoad {
    /// Records to treat as current (empty unless the ledger loaded cleanly).
    pub fn records(&self) -> &[FeatureRecord] {
        match self {
            LedgerLoad::Loaded(records) => records,
            LedgerLoad::Missing | LedgerLoad::Malformed { .. } => &[],
        }
    }
}

/// Parse and validate a ledger document.
pub fn parse_ledger(raw: &str) -> Result<Vec<FeatureRecord>> {
    let value: Value = serde_json::from_str(raw).context("parse ledger json")?;
    validate_schema(&value)?;
    let records: Vec<FeatureRecord> =
        serde_json::from_value(value).context("deserialize ledger records")?;
    Ok(records)
}

/// Load the ledger through `store`. Only I/O failures are errors.
///
/// Bytes that are not UTF-8 count as a malformed ledger; `raw` then holds a
/// lossy decoding.
pub fn load_ledger(store: &dyn StateStore, rel: &Path) -> Result<LedgerLoad> {
    let Some(bytes) = store.read_bytes(rel)? else {
        debug!(path = %rel.display(), "ledger missing");
        return Ok(LedgerLoad::Missing);
    };
    let parsed = match String::from_utf8(bytes) {
        Ok(raw) => parse_ledger(&raw).map_err(|err| (raw, format!("{err:#}"))),
        Err(err) => {
            let raw = String::from_utf8_lossy(err.as_bytes()).into_owned();
            Err((raw, format!("ledger is not valid UTF-8: {}", err.utf8_error())))
        }
    };
    match parsed {
        Ok(records) => {
            debug!(path = %rel.display(), records = records.len(), "ledger loaded");
            Ok(LedgerLoad::Loaded(records))
        }
        Err((raw, error)) => {
            warn!(
                path = %rel.display(),
                err = %error,
                "ledger is malformed, treating as empty"
            );
            Ok(LedgerLoad::Malformed { raw, error })
        }
    }
}

/// Render records as the canonical document (pretty JSON, trailing newline).
pub fn render_ledger(records: &[FeatureRecord]) -> Result<String> {
    let value = serde_json::to_value(records).context("serialize ledger")?;
    validate_schema(&value)?;
    let mut buf = serde_json::to_string_pretty(&value).context("serialize ledger")?;
    buf.push('\n');
    Ok(buf)
}

/// Atomically replace the ledger with `records`.
pub fn write_ledger(store: &dyn StateStore, rel: &Path, records: &[FeatureRecord]) -> Result<()> {
    let buf = render_ledger(records)?;
    store
        .replace(rel, &buf)
        .with_context(|| format!("replace ledger {}", rel.display()))?;
    debug!(path = %rel.display(), records = records.len(), "ledger written");
    Ok(())
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(LEDGER_SCHEMA).context("parse ledger schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "ledger schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}
