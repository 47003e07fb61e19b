//! Post-success audit hook.
//!
//! Runs exactly once, only after a successful commit and push. A failing hook
//! flips the terminal stage (distinct exit code) but never rolls anything
//! back: the promoted commit stands.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::tokenizer::tokenize_command;
use crate::error::RunError;
use crate::io::config::AuditConfig;
use crate::io::process::run_command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    /// No audit command configured.
    Skipped,
    Passed,
}

/// Run the configured audit command, if any.
///
/// The command inherits the environment plus `PATCHRUN_CHANGE_ID` and
/// `PATCHRUN_COMMIT`; its working directory defaults to the live root.
#[instrument(skip_all, fields(change_id))]
pub fn run_audit(
    cfg: &AuditConfig,
    live_root: &Path,
    change_id: &str,
    commit: &str,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
) -> Result<AuditOutcome> {
    if cfg.command.is_empty() {
        debug!("no audit command configured");
        return Ok(AuditOutcome::Skipped);
    }

    let tokens = tokenize_command(&cfg.command).context("audit.command")?;
    let workdir = cfg.workdir.as_deref().unwrap_or(live_root);
    let mut cmd = Command::new(&tokens[0]);
    cmd.args(&tokens[1..])
        .current_dir(workdir)
        .env("PATCHRUN_CHANGE_ID", change_id)
        .env("PATCHRUN_COMMIT", commit);

    let out = run_command(cmd, None, timeout, output_limit_bytes).context("run audit command")?;
    if !out.success() {
        return Err(RunError::AuditFailure(format!(
            "audit command failed (exit {:?}):\n{}",
            out.exit_code(),
            out.combined_log()
        ))
        .into());
    }
    info!("audit passed");
    Ok(AuditOutcome::Passed)
}
