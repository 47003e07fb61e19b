//! Isolated per-change workspaces.
//!
//! A workspace is a full local clone of the live repository under
//! `<workspaces>/<change_id>/`, pinned to the live tip at creation time (its
//! base commit). A sidecar meta file `<workspaces>/<change_id>.meta.json`
//! records the base, branch, last applied source and declared scope; the
//! sidecar outlives the workspace directory so a later run can re-apply the
//! same source or promote from history.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::io::git::Git;

/// Durable record of a workspace, kept next to (and outliving) its directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceMeta {
    pub change_id: String,
    /// Live tip the workspace was cloned at.
    pub base_commit: String,
    /// Branch the live repository was on at creation.
    pub branch: String,
    /// Last patch source applied into this workspace, if any.
    #[serde(default)]
    pub last_source: Option<PathBuf>,
    /// Declared scope paths from the last applied source.
    #[serde(default)]
    pub declared: Vec<String>,
}

/// An open workspace clone.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub change_id: String,
    pub root: PathBuf,
    pub base_commit: String,
    pub branch: String,
}

impl Workspace {
    pub fn git(&self) -> Git {
        Git::new(&self.root)
    }
}

/// Creates, reopens and destroys workspaces under one workspaces directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    live_root: PathBuf,
    workspaces_dir: PathBuf,
}

impl WorkspaceManager {
    pub fn new(live_root: impl Into<PathBuf>, workspaces_dir: impl Into<PathBuf>) -> Self {
        Self {
            live_root: live_root.into(),
            workspaces_dir: workspaces_dir.into(),
        }
    }

    pub fn workspace_root(&self, change_id: &str) -> PathBuf {
        self.workspaces_dir.join(change_id)
    }

    fn meta_path(&self, change_id: &str) -> PathBuf {
        self.workspaces_dir.join(format!("{change_id}.meta.json"))
    }

    /// Create a fresh workspace clone at the current live tip.
    ///
    /// An existing workspace directory for the same change is discarded and
    /// recreated, but only when it is clean; a dirty one is refused unless
    /// `soft_reset` is set. Source history in the sidecar survives recreation.
    #[instrument(skip(self), fields(change_id))]
    pub fn create(&self, change_id: &str, soft_reset: bool) -> Result<Workspace> {
        fs::create_dir_all(&self.workspaces_dir).with_context(|| {
            format!("create workspaces dir {}", self.workspaces_dir.display())
        })?;

        let root = self.workspace_root(change_id);
        if root.exists() {
            let existing = Git::new(&root);
            if !existing.is_clean()? && !soft_reset {
                return Err(anyhow!(
                    "workspace for '{change_id}' has uncommitted changes; pass --soft-reset to discard them"
                ));
            }
            warn!(root = %root.display(), "recreating existing workspace");
            fs::remove_dir_all(&root)
                .with_context(|| format!("remove old workspace {}", root.display()))?;
        }

        let live = Git::new(&self.live_root);
        let branch = live.current_branch()?;
        let base_commit = live.rev_parse("HEAD")?;
        Git::clone_local(&self.live_root, &root)?;
        info!(base = %base_commit, "workspace created");

        // Carry source history forward across recreation.
        let (last_source, declared) = match self.meta(change_id)? {
            Some(old) => (old.last_source, old.declared),
            None => (None, Vec::new()),
        };
        self.write_meta(&WorkspaceMeta {
            change_id: change_id.to_string(),
            base_commit: base_commit.clone(),
            branch: branch.clone(),
            last_source,
            declared,
        })?;

        Ok(Workspace {
            change_id: change_id.to_string(),
            root,
            base_commit,
            branch,
        })
    }

    /// Reopen an existing workspace from its sidecar meta.
    pub fn open(&self, change_id: &str) -> Result<Workspace> {
        let root = self.workspace_root(change_id);
        if !root.exists() {
            return Err(anyhow!("no workspace exists for change '{change_id}'"));
        }
        let meta = self
            .meta(change_id)?
            .ok_or_else(|| anyhow!("workspace for '{change_id}' has no meta record"))?;
        Ok(Workspace {
            change_id: change_id.to_string(),
            root,
            base_commit: meta.base_commit,
            branch: meta.branch,
        })
    }

    /// Remove the workspace directory. The meta sidecar is kept so a later
    /// run can replay the last source.
    #[instrument(skip(self), fields(change_id))]
    pub fn destroy(&self, change_id: &str) -> Result<()> {
        let root = self.workspace_root(change_id);
        if root.exists() {
            fs::remove_dir_all(&root)
                .with_context(|| format!("remove workspace {}", root.display()))?;
            debug!("workspace destroyed");
        }
        Ok(())
    }

    /// Read the sidecar meta, if any.
    pub fn meta(&self, change_id: &str) -> Result<Option<WorkspaceMeta>> {
        let path = self.meta_path(change_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let meta = serde_json::from_str(&contents)
            .with_context(|| format!("parse {}", path.display()))?;
        Ok(Some(meta))
    }

    /// Record the source and declared scope applied into the workspace.
    pub fn record_source(
        &self,
        change_id: &str,
        source: &Path,
        declared: &[String],
    ) -> Result<()> {
        let mut meta = self
            .meta(change_id)?
            .ok_or_else(|| anyhow!("workspace for '{change_id}' has no meta record"))?;
        meta.last_source = Some(source.to_path_buf());
        meta.declared = declared.to_vec();
        self.write_meta(&meta)
    }

    fn write_meta(&self, meta: &WorkspaceMeta) -> Result<()> {
        let path = self.meta_path(&meta.change_id);
        let json = serde_json::to_string_pretty(meta).context("serialize workspace meta")?;
        // Atomic replace via temp file in the same directory.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn create_clones_at_live_tip() {
        let repo = TestRepo::new();
        let manager = WorkspaceManager::new(repo.live_root(), repo.workspaces_dir());
        let ws = manager.create("chg-1", false).expect("create");

        assert!(ws.root.join(".git").exists());
        assert_eq!(ws.base_commit, repo.head());
        assert_eq!(ws.branch, "main");
        assert!(manager.meta("chg-1").expect("meta").is_some());
    }

    #[test]
    fn dirty_workspace_refused_without_soft_reset() {
        let repo = TestRepo::new();
        let manager = WorkspaceManager::new(repo.live_root(), repo.workspaces_dir());
        let ws = manager.create("chg-1", false).expect("create");
        fs::write(ws.root.join("dirty.txt"), "x").expect("write");

        let err = manager.create("chg-1", false).expect_err("should refuse");
        assert!(err.to_string().contains("uncommitted changes"));

        manager.create("chg-1", true).expect("soft reset recreates");
    }

    #[test]
    fn destroy_keeps_meta_sidecar() {
        let repo = TestRepo::new();
        let manager = WorkspaceManager::new(repo.live_root(), repo.workspaces_dir());
        let ws = manager.create("chg-1", false).expect("create");
        manager
            .record_source(
                "chg-1",
                Path::new("/store/fix.patch"),
                &["src/a.rs".to_string()],
            )
            .expect("record");
        manager.destroy("chg-1").expect("destroy");

        assert!(!ws.root.exists());
        let meta = manager.meta("chg-1").expect("meta").expect("sidecar kept");
        assert_eq!(meta.last_source, Some(PathBuf::from("/store/fix.patch")));
        assert_eq!(meta.declared, vec!["src/a.rs"]);
    }

    #[test]
    fn recreation_carries_source_history_forward() {
        let repo = TestRepo::new();
        let manager = WorkspaceManager::new(repo.live_root(), repo.workspaces_dir());
        manager.create("chg-1", false).expect("create");
        manager
            .record_source("chg-1", Path::new("/store/fix.patch"), &[])
            .expect("record");

        manager.create("chg-1", false).expect("recreate");
        let meta = manager.meta("chg-1").expect("meta").expect("present");
        assert_eq!(meta.last_source, Some(PathBuf::from("/store/fix.patch")));
    }

    #[test]
    fn open_missing_workspace_fails() {
        let repo = TestRepo::new();
        let manager = WorkspaceManager::new(repo.live_root(), repo.workspaces_dir());
        assert!(manager.open("nope").is_err());
    }
}
