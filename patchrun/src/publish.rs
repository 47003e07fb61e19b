//! Committing and pushing promoted content on the live branch.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::request::RunMode;
use crate::error::{PublishStep, RunError};
use crate::io::config::PublishConfig;
use crate::io::git::Git;

/// Refuse to publish from a branch outside the configured main set, unless
/// explicitly overridden.
pub fn check_branch_policy(
    branch: &str,
    cfg: &PublishConfig,
    allow_non_main: bool,
) -> Result<()> {
    if cfg.main_branches.iter().any(|b| b == branch) {
        return Ok(());
    }
    if allow_non_main {
        warn!(branch, "publishing from non-main branch (override)");
        return Ok(());
    }
    Err(RunError::Publish {
        step: PublishStep::Stage,
        message: format!(
            "live branch '{branch}' is not in the allowed set [{}]",
            cfg.main_branches.join(", ")
        ),
    }
    .into())
}

/// Stage and commit the promoted content, returning the new commit hash.
///
/// Promote-live stages the entire live tree; every other mode stages only the
/// promotion set. An empty staging area is a publish failure, not a silent
/// success.
#[instrument(skip_all, fields(mode = ?mode, paths = paths.len()))]
pub fn stage_and_commit(
    live: &Git,
    mode: RunMode,
    message: &str,
    paths: &[String],
    cfg: &PublishConfig,
    allow_non_main: bool,
) -> Result<String> {
    let branch = live
        .current_branch()
        .map_err(|e| RunError::Publish {
            step: PublishStep::Stage,
            message: format!("{e:#}"),
        })?;
    check_branch_policy(&branch, cfg, allow_non_main)?;

    if mode == RunMode::PromoteLive {
        live.add_all().map_err(|e| RunError::Publish {
            step: PublishStep::Stage,
            message: format!("{e:#}"),
        })?;
    } else {
        live.add_paths(paths).map_err(|e| RunError::Publish {
            step: PublishStep::Stage,
            message: format!("{e:#}"),
        })?;
    }

    let committed = live.commit_staged(message).map_err(|e| RunError::Publish {
        step: PublishStep::Commit,
        message: format!("{e:#}"),
    })?;
    if !committed {
        return Err(RunError::Publish {
            step: PublishStep::Commit,
            message: "nothing to commit".to_string(),
        }
        .into());
    }

    let commit = live.rev_parse("HEAD").map_err(|e| RunError::Publish {
        step: PublishStep::Commit,
        message: format!("{e:#}"),
    })?;
    info!(commit = %commit, "committed");
    Ok(commit)
}

/// Push the live branch. A failed push is reported but the commit is never
/// rolled back.
#[instrument(skip_all)]
pub fn push(live: &Git, cfg: &PublishConfig) -> Result<()> {
    let branch = live.current_branch().map_err(|e| RunError::Publish {
        step: PublishStep::Push,
        message: format!("{e:#}"),
    })?;
    live.push(&cfg.remote, &branch).map_err(|e| RunError::Publish {
        step: PublishStep::Push,
        message: format!("{e:#}"),
    })?;
    info!(branch, remote = %cfg.remote, "pushed");
    Ok(())
}
