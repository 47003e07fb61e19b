//! Promotion: resolving live-branch divergence and copying the winning
//! content from the workspace into the live tree.
//!
//! Divergence is computed per promotion path immediately before staging,
//! never from a cached snapshot: a path diverged when the live branch changed
//! it between the workspace's base commit and live HEAD.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::request::ConflictPolicy;
use crate::error::RunError;
use crate::io::git::Git;

/// What promotion actually did, per path category.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PromotionOutcome {
    /// Paths copied (or deleted) into the live tree.
    pub promoted: Vec<String>,
    /// Diverged paths left at their live content (overwrite-workspace).
    pub skipped: Vec<String>,
    /// All paths where the live branch moved since the base commit.
    pub diverged: Vec<String>,
}

/// Paths in `paths` that the live branch changed between `base` and HEAD.
#[instrument(skip(live, paths), fields(base))]
pub fn detect_divergence(live: &Git, base: &str, paths: &[String]) -> Result<Vec<String>> {
    let head = live.rev_parse("HEAD")?;
    if head == base {
        debug!("live HEAD still at base, no divergence possible");
        return Ok(Vec::new());
    }
    let mut diverged = Vec::new();
    for path in paths {
        if live.path_changed_between(base, &head, path)? {
            diverged.push(path.clone());
        }
    }
    diverged.sort();
    Ok(diverged)
}

fn copy_into_live(workspace_root: &Path, live_root: &Path, path: &str) -> Result<()> {
    let src = workspace_root.join(path);
    let dst = live_root.join(path);
    if src.exists() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::copy(&src, &dst)
            .with_context(|| format!("copy {} -> {}", src.display(), dst.display()))?;
    } else if dst.exists() {
        // Deleted in the workspace: propagate the deletion.
        fs::remove_file(&dst).with_context(|| format!("remove {}", dst.display()))?;
    }
    Ok(())
}

/// Resolve divergence under the given policy and copy the promotion set from
/// the workspace into the live tree.
#[instrument(skip_all, fields(paths = paths.len(), ?policy))]
pub fn resolve_and_copy(
    live: &Git,
    workspace_root: &Path,
    base: &str,
    paths: &[String],
    policy: ConflictPolicy,
) -> Result<PromotionOutcome> {
    let diverged = detect_divergence(live, base, paths)?;

    if !diverged.is_empty() {
        match policy {
            ConflictPolicy::Fail => {
                return Err(RunError::LiveChanged {
                    base: base.to_string(),
                    paths: diverged,
                }
                .into());
            }
            ConflictPolicy::OverwriteLive => {
                warn!(count = diverged.len(), "overwriting diverged live paths");
            }
            ConflictPolicy::OverwriteWorkspace => {
                warn!(count = diverged.len(), "keeping diverged live paths");
            }
        }
    }

    let mut outcome = PromotionOutcome {
        diverged: diverged.clone(),
        ..Default::default()
    };
    for path in paths {
        let keep_live =
            policy == ConflictPolicy::OverwriteWorkspace && diverged.contains(path);
        if keep_live {
            outcome.skipped.push(path.clone());
            continue;
        }
        copy_into_live(workspace_root, live.workdir(), path)?;
        outcome.promoted.push(path.clone());
    }
    outcome.promoted.sort();
    outcome.skipped.sort();
    info!(
        promoted = outcome.promoted.len(),
        skipped = outcome.skipped.len(),
        "promotion copy complete"
    );
    Ok(outcome)
}
