//! Request types describing one engine run.
//!
//! A [`ChangeRequest`] is assembled once by the CLI (or a test harness) and is
//! immutable for the duration of the run.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Execution mode, selected by mutually exclusive CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Apply the patch source, run gates, promote the touched set.
    Normal,
    /// Like `Normal`, but staging commits the entire live working tree.
    PromoteLive,
    /// Reuse the existing workspace as-is; no patch application.
    PromoteWorkspace,
    /// Recreate the workspace and replay the last recorded patch source.
    ReapplyLatest,
    /// Stop after gates. No promotion, no archives, workspace always removed.
    DryRun,
}

impl RunMode {
    pub fn is_dry_run(self) -> bool {
        self == RunMode::DryRun
    }

    /// Whether this mode loads and applies a patch source.
    pub fn applies_patch(self) -> bool {
        self != RunMode::PromoteWorkspace
    }

    /// Whether this mode reuses an existing workspace instead of recreating it.
    pub fn reuses_workspace(self) -> bool {
        self == RunMode::PromoteWorkspace
    }
}

/// Policy for promoted paths the live branch changed since the base commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Abort promotion. Never silently merge.
    #[default]
    Fail,
    /// Overwrite the live version with the workspace version.
    OverwriteLive,
    /// Keep the live version and record the skip.
    OverwriteWorkspace,
}

/// Explicit trust escalations. Default posture is fail-closed everywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub allow_noop: bool,
    pub allow_untouched_declared: bool,
    pub allow_undeclared_touch: bool,
    pub live_policy: ConflictPolicy,
    pub allow_gate_failure: bool,
    pub no_promote: bool,
    pub allow_non_main: bool,
    pub soft_reset: bool,
    pub keep_workspace: bool,
}

/// One proposed change, immutable once a run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    /// Stable key identifying one workspace/run lineage (e.g. an issue number).
    pub change_id: String,
    pub mode: RunMode,
    pub message: String,
    /// Path to a generator script, a unified diff, or a zip bundle.
    pub source: Option<PathBuf>,
    pub overrides: Overrides,
    /// Extra build-gate exclusion pattern from the CLI, merged with config.
    pub build_exclude: Option<String>,
}

impl ChangeRequest {
    pub fn validate(&self) -> Result<()> {
        validate_change_id(&self.change_id)?;
        if self.message.trim().is_empty() {
            return Err(anyhow!("commit message must not be empty"));
        }
        match self.mode {
            RunMode::PromoteWorkspace | RunMode::ReapplyLatest => {
                if self.source.is_some() {
                    return Err(anyhow!(
                        "patch source must not be given in {:?} mode",
                        self.mode
                    ));
                }
            }
            _ => {
                if self.source.is_none() {
                    return Err(anyhow!("patch source is required in {:?} mode", self.mode));
                }
            }
        }
        Ok(())
    }
}

/// Change ids become directory and lock file names, so keep them narrow.
pub fn validate_change_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 100 {
        return Err(anyhow!("change id must be 1-100 characters"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(anyhow!(
            "change id '{id}' contains characters outside [A-Za-z0-9._-]"
        ));
    }
    if id.starts_with('.') {
        return Err(anyhow!("change id must not start with '.'"));
    }
    Ok(())
}
