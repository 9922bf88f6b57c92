//! Error types for the hostaudit pipeline

use std::time::Duration;
use thiserror::Error;

use crate::item::ItemError;

/// Why a single probe invocation failed. Always recoverable at run level.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error("command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("result rejected: {0}")]
    Malformed(#[from] ItemError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// A probe returned ids outside the range it was handed. Fatal to the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("probe `{probe}` broke the id contract at item {position}: expected id {expected}, found {found}")]
pub struct ContractViolation {
    pub probe: String,
    pub position: usize,
    pub expected: u64,
    pub found: u64,
}

/// No id is left to allocate: `next_id` would pass `u64::MAX`. Fatal to the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("id space exhausted: {requested} id(s) requested at {next_id}")]
pub struct IdSpaceExhausted {
    pub next_id: u64,
    pub requested: u64,
}

/// Outcome of a rejected merge.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error(transparent)]
    Contract(#[from] ContractViolation),

    #[error(transparent)]
    Exhausted(#[from] IdSpaceExhausted),

    #[error("result attributed to `{found}` instead of `{probe}`")]
    Misattributed { probe: String, found: String },

    #[error("probe `{probe}` returned a malformed result: {error}")]
    Malformed { probe: String, error: ItemError },
}

/// Why a run stopped before every probe was invoked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunAbort {
    #[error(transparent)]
    Contract(#[from] ContractViolation),

    #[error(transparent)]
    Exhausted(#[from] IdSpaceExhausted),
}

impl RunAbort {
    pub fn violation(&self) -> Option<&ContractViolation> {
        match self {
            RunAbort::Contract(v) => Some(v),
            RunAbort::Exhausted(_) => None,
        }
    }
}

/// Fatal merge errors become a [`RunAbort`]; the rest are handed back.
impl TryFrom<MergeError> for RunAbort {
    type Error = MergeError;

    fn try_from(err: MergeError) -> Result<Self, Self::Error> {
        match err {
            MergeError::Contract(v) => Ok(RunAbort::Contract(v)),
            MergeError::Exhausted(e) => Ok(RunAbort::Exhausted(e)),
            other => Err(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum ObfuscationError {
    #[error("invalid redaction pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("failed to read protected terms: {0}")]
    Terms(#[from] std::io::Error),

    #[error("obfuscation changed the report shape: {0}")]
    ShapeChanged(String),
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(#[from] handlebars::TemplateError),

    #[error("render error: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to write configuration: {0}")]
    Write(String),
}

/// Run-level errors surfaced to the binary.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("run aborted: {0}")]
    Aborted(#[from] RunAbort),

    #[error("obfuscation failed: {0}")]
    Obfuscation(#[from] ObfuscationError),

    #[error("rendering {format} failed: {error}")]
    Render { format: String, error: RenderError },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Selection(String),
}
