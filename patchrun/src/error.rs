//! Stage model and stage-tagged error taxonomy.
//!
//! Every failure the engine can report maps to exactly one [`RunError`]
//! variant and one originating [`Stage`]. The orchestrator downcasts
//! `anyhow::Error` chains back to `RunError` to tag events and pick exit
//! codes; plumbing errors that are not part of the taxonomy fall back to the
//! stage that was active when they surfaced.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Stages of the overall run state machine, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Init,
    WorkspaceSetup,
    PatchApply,
    ScopeCheck,
    Gates,
    DryRunStop,
    Promotion,
    Publish,
    Archive,
    Audit,
    Success,
    Fail,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "INIT",
            Stage::WorkspaceSetup => "WORKSPACE_SETUP",
            Stage::PatchApply => "PATCH_APPLY",
            Stage::ScopeCheck => "SCOPE_CHECK",
            Stage::Gates => "GATES",
            Stage::DryRunStop => "DRY_RUN_STOP",
            Stage::Promotion => "PROMOTION",
            Stage::Publish => "PUBLISH",
            Stage::Archive => "ARCHIVE",
            Stage::Audit => "AUDIT",
            Stage::Success => "SUCCESS",
            Stage::Fail => "FAIL",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which publisher operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStep {
    Stage,
    Commit,
    Push,
}

impl fmt::Display for PublishStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PublishStep::Stage => "stage",
            PublishStep::Commit => "commit",
            PublishStep::Push => "push",
        };
        f.write_str(s)
    }
}

/// The engine's failure taxonomy. Messages are deterministic (sorted path
/// lists) and name the concrete condition, never a backtrace.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("patch source error: {0}")]
    PatchSource(String),

    #[error("undeclared touched paths: {}", .paths.join(", "))]
    UndeclaredTouched { paths: Vec<String> },

    #[error("declared but untouched paths: {}", .paths.join(", "))]
    DeclaredNotTouched { paths: Vec<String> },

    #[error("change produced no effective file differences against base (noop)")]
    Noop,

    #[error("gate '{gate}' failed")]
    GateFailure { gate: String },

    #[error("live branch changed since base {base}: {}", .paths.join(", "))]
    LiveChanged { base: String, paths: Vec<String> },

    #[error("publish {step} failed: {message}")]
    Publish { step: PublishStep, message: String },

    #[error("audit command failed: {0}")]
    AuditFailure(String),
}

impl RunError {
    /// The stage this error originates from.
    pub fn stage(&self) -> Stage {
        match self {
            RunError::PatchSource(_) => Stage::PatchApply,
            RunError::UndeclaredTouched { .. }
            | RunError::DeclaredNotTouched { .. }
            | RunError::Noop => Stage::ScopeCheck,
            RunError::GateFailure { .. } => Stage::Gates,
            RunError::LiveChanged { .. } => Stage::Promotion,
            RunError::Publish { .. } => Stage::Publish,
            RunError::AuditFailure(_) => Stage::Audit,
        }
    }
}

/// Stage attribution for an arbitrary error chain: the taxonomy wins,
/// otherwise the caller's notion of the current stage.
pub fn stage_of(err: &anyhow::Error, fallback: Stage) -> Stage {
    err.downcast_ref::<RunError>()
        .map_or(fallback, RunError::stage)
}
