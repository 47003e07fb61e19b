//! The run state machine.
//!
//! `INIT → WORKSPACE_SETUP → PATCH_APPLY → SCOPE_CHECK → GATES →
//! (DRY_RUN_STOP | PROMOTION → PUBLISH → ARCHIVE → AUDIT)` with stage-tagged
//! short-circuits. Every stage transition and outcome is emitted to the event
//! sink; this module never prints.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::audit::{self, AuditOutcome};
use crate::core::declaration::parse_declaration;
use crate::core::request::{ChangeRequest, RunMode};
use crate::core::scope::{self, ScopeVerdict};
use crate::error::{RunError, Stage, stage_of};
use crate::gates::{self, GateContext};
use crate::io::archive;
use crate::io::config::{Config, resolve_path};
use crate::io::events::EventSink;
use crate::io::git::Git;
use crate::io::lock::ChangeLock;
use crate::io::patch::{self, ApplyContext};
use crate::io::workspace::{Workspace, WorkspaceManager};
use crate::promote;
use crate::publish;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Success,
    /// Dry-run stop; exits 0 whether or not a failure was observed.
    DryRun,
    Fail,
    /// Promotion succeeded but the audit hook failed.
    Audit,
}

/// Result of one complete run.
#[derive(Debug)]
pub struct RunOutcome {
    pub terminal: Terminal,
    /// Stage the failure originated from, when one was observed.
    pub failed_stage: Option<Stage>,
    pub failure: Option<String>,
    pub commit: Option<String>,
    pub archive: Option<PathBuf>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self.terminal {
            Terminal::Success | Terminal::DryRun => crate::exit_codes::OK,
            Terminal::Fail => crate::exit_codes::FAILED,
            Terminal::Audit => crate::exit_codes::AUDIT,
        }
    }
}

/// Run one change request end to end.
///
/// Returns `Ok` for every run that reached a terminal stage (including
/// failures, reported in the outcome); `Err` only when the request itself is
/// invalid or the event sink breaks.
#[instrument(skip_all, fields(change_id = %req.change_id, mode = ?req.mode))]
pub fn execute(
    req: &ChangeRequest,
    cfg: &Config,
    live_root: &Path,
    sink: &mut dyn EventSink,
) -> Result<RunOutcome> {
    req.validate()?;

    let workspaces_dir = resolve_path(live_root, &cfg.paths.workspaces_dir);
    let mut engine = Engine {
        req,
        cfg,
        live_root: live_root.to_path_buf(),
        sink,
        stage: Stage::Init,
        manager: WorkspaceManager::new(live_root, &workspaces_dir),
        workspaces_dir,
        _lock: None,
        workspace: None,
        commit: None,
        archive: None,
    };

    match engine.drive() {
        Ok(outcome) => Ok(outcome),
        Err(err) => engine.fail(err),
    }
}

struct Engine<'a> {
    req: &'a ChangeRequest,
    cfg: &'a Config,
    live_root: PathBuf,
    sink: &'a mut dyn EventSink,
    stage: Stage,
    manager: WorkspaceManager,
    workspaces_dir: PathBuf,
    // Held for the whole run, released on drop.
    _lock: Option<ChangeLock>,
    workspace: Option<Workspace>,
    commit: Option<String>,
    archive: Option<PathBuf>,
}

impl Engine<'_> {
    fn enter(&mut self, stage: Stage) -> Result<()> {
        self.stage = stage;
        self.sink.emit(stage, "enter", json!({}))
    }

    fn timeout(&self) -> Option<Duration> {
        match self.cfg.limits.gate_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    fn workspace(&self) -> &Workspace {
        self.workspace
            .as_ref()
            .expect("workspace is set after WORKSPACE_SETUP")
    }

    fn drive(&mut self) -> Result<RunOutcome> {
        self.init()?;
        self.workspace_setup()?;
        let declared = self.patch_apply()?;
        let promotion_set = self.scope_check(&declared)?;
        let gate_failure = self.gates(&promotion_set)?;

        if self.req.mode.is_dry_run() {
            return self.dry_run_stop(gate_failure);
        }

        if self.req.overrides.no_promote {
            self.enter(Stage::Promotion)?;
            self.sink
                .emit(Stage::Promotion, "skip", json!({"reason": "no_promote"}))?;
            self.destroy_workspace(self.req.overrides.keep_workspace)?;
            return self.success();
        }

        let promoted_paths = self.promotion(&promotion_set)?;
        let promoted = !promoted_paths.is_empty();
        if promoted {
            self.publish(&promoted_paths)?;
            self.archive()?;
        }
        self.destroy_workspace(self.req.overrides.keep_workspace)?;
        if promoted {
            self.audit()?;
        }
        self.success()
    }

    fn init(&mut self) -> Result<()> {
        self.enter(Stage::Init)?;
        self.ensure_state_dir_excluded()?;
        self.sink.emit(
            Stage::Init,
            "info",
            json!({
                "mode": self.req.mode,
                "message": self.req.message,
                "source": self.req.source,
            }),
        )
    }

    /// Keep the engine's state directories out of version control, so staging
    /// the whole live tree never commits workspaces, locks, events or
    /// archives. Uses `.git/info/exclude` rather than touching the tracked
    /// tree. The configured directories are excluded individually; the
    /// default `.patchrun/` entry also covers the config file itself.
    fn ensure_state_dir_excluded(&self) -> Result<()> {
        if !self.live_root.join(".git").is_dir() {
            // Not a repository layout we can exclude in; workspace setup will
            // fail with a clearer error.
            return Ok(());
        }
        let mut wanted = vec![".patchrun/".to_string()];
        for dir in [
            &self.cfg.paths.workspaces_dir,
            &self.cfg.paths.events_dir,
            &self.cfg.paths.archives_dir,
        ] {
            let resolved = resolve_path(&self.live_root, dir);
            if let Ok(rel) = resolved.strip_prefix(&self.live_root)
                && !rel.as_os_str().is_empty()
            {
                wanted.push(format!("/{}/", rel.display()));
            }
        }

        let info = self.live_root.join(".git/info");
        fs::create_dir_all(&info).context("create .git/info")?;
        let exclude = info.join("exclude");
        let mut contents = fs::read_to_string(&exclude).unwrap_or_default();
        let mut changed = false;
        for line in &wanted {
            if contents.lines().any(|l| l.trim() == line) {
                continue;
            }
            if !contents.is_empty() && !contents.ends_with('\n') {
                contents.push('\n');
            }
            contents.push_str(line);
            contents.push('\n');
            changed = true;
        }
        if changed {
            fs::write(&exclude, contents)
                .with_context(|| format!("update {}", exclude.display()))?;
        }
        Ok(())
    }

    fn workspace_setup(&mut self) -> Result<()> {
        self.enter(Stage::WorkspaceSetup)?;
        self._lock = Some(ChangeLock::acquire(
            &self.workspaces_dir,
            &self.req.change_id,
        )?);

        let ws = if self.req.mode.reuses_workspace() {
            self.manager.open(&self.req.change_id)?
        } else {
            let ws = self
                .manager
                .create(&self.req.change_id, self.req.overrides.soft_reset)?;
            self.sink.emit(
                Stage::WorkspaceSetup,
                "create",
                json!({"base_commit": ws.base_commit, "branch": ws.branch}),
            )?;
            ws
        };
        info!(base = %ws.base_commit, "workspace ready");
        self.workspace = Some(ws);
        Ok(())
    }

    /// Apply the patch source (if the mode has one) and return the declared
    /// scope set.
    fn patch_apply(&mut self) -> Result<BTreeSet<String>> {
        if !self.req.mode.applies_patch() {
            // Promote-workspace reuses the declaration recorded when the
            // source was last applied.
            let meta = self
                .manager
                .meta(&self.req.change_id)?
                .ok_or_else(|| anyhow!("no recorded state for '{}'", self.req.change_id))?;
            return Ok(meta.declared.into_iter().collect());
        }

        self.enter(Stage::PatchApply)?;
        let source = match (&self.req.source, self.req.mode) {
            (Some(source), _) => source.clone(),
            (None, RunMode::ReapplyLatest) => self
                .manager
                .meta(&self.req.change_id)?
                .and_then(|m| m.last_source)
                .ok_or_else(|| {
                    RunError::PatchSource(format!(
                        "no previously applied source recorded for '{}'",
                        self.req.change_id
                    ))
                })?,
            (None, _) => unreachable!("validated: source required"),
        };

        let storage_roots: Vec<PathBuf> = self
            .cfg
            .paths
            .storage_roots
            .iter()
            .map(|p| resolve_path(&self.live_root, p))
            .collect();
        let change = patch::load_source(&source, &storage_roots)?;
        let declared = parse_declaration(&change.metadata);
        self.manager.record_source(
            &self.req.change_id,
            &source,
            &declared.iter().cloned().collect::<Vec<_>>(),
        )?;

        let ctx = ApplyContext {
            workspace_root: self.workspace().root.clone(),
            script_runner: self.cfg.patch.script_runner.clone(),
            timeout: self.timeout(),
            output_limit_bytes: self.cfg.limits.output_limit_bytes,
        };
        for op in &change.ops {
            patch::apply(op, &ctx)?;
            self.sink
                .emit(Stage::PatchApply, "op", json!({"name": op.name()}))?;
        }
        Ok(declared)
    }

    /// Enforce the scope contract and compute the promotion set.
    ///
    /// The promotion set is the full touched set including blessed paths:
    /// blessed output is exempt from declaration, not from promotion.
    fn scope_check(&mut self, declared: &BTreeSet<String>) -> Result<Vec<String>> {
        self.enter(Stage::ScopeCheck)?;
        let ws = self.workspace().clone();
        let git = ws.git();

        let mut touched: BTreeSet<String> =
            git.diff_name_only(&ws.base_commit)?.into_iter().collect();
        touched.extend(git.untracked()?);

        let report = scope::evaluate(declared, &touched, &self.cfg.scope.blessed);
        self.sink
            .emit(Stage::ScopeCheck, "report", serde_json::to_value(&report)?)?;

        let o = &self.req.overrides;
        match report.verdict() {
            ScopeVerdict::Ok => {}
            ScopeVerdict::UndeclaredTouched if !o.allow_undeclared_touch => {
                return Err(RunError::UndeclaredTouched {
                    paths: report.undeclared,
                }
                .into());
            }
            ScopeVerdict::DeclaredNotTouched if !o.allow_untouched_declared => {
                return Err(RunError::DeclaredNotTouched {
                    paths: report.untouched,
                }
                .into());
            }
            ScopeVerdict::Noop if !o.allow_noop => {
                return Err(RunError::Noop.into());
            }
            verdict => {
                warn!(?verdict, "scope violation overridden");
                self.sink.emit(
                    Stage::ScopeCheck,
                    "override",
                    json!({"verdict": verdict}),
                )?;
            }
        }
        // Remaining unoverridden violations still fail, in fixed order.
        if !report.untouched.is_empty() && !o.allow_untouched_declared {
            return Err(RunError::DeclaredNotTouched {
                paths: report.untouched,
            }
            .into());
        }
        if report.noop && !o.allow_noop {
            return Err(RunError::Noop.into());
        }

        Ok(touched.into_iter().collect())
    }

    /// Run the gate pipeline. Returns the first failing gate's name when
    /// `allow_gate_failure` let the run continue past it.
    fn gates(&mut self, touched: &[String]) -> Result<Option<String>> {
        self.enter(Stage::Gates)?;
        let pipeline = gates::build_pipeline(
            self.cfg,
            self.req.build_exclude.as_deref(),
            touched,
            &self.live_root,
            &self.workspaces_dir,
            &self.req.change_id,
        )?;
        let ctx = GateContext {
            workdir: self.workspace().root.clone(),
            timeout: self.timeout(),
            output_limit_bytes: self.cfg.limits.output_limit_bytes,
        };
        let fail_soft = self.req.overrides.allow_gate_failure;
        let (results, first_failed) = gates::run_pipeline(&pipeline, &ctx, fail_soft)?;

        for result in &results {
            self.sink
                .emit(Stage::Gates, "result", serde_json::to_value(result)?)?;
        }

        if let Some(gate) = &first_failed
            && !fail_soft
        {
            return Err(RunError::GateFailure { gate: gate.clone() }.into());
        }
        if let Some(gate) = &first_failed {
            warn!(gate, "gate failure allowed by override");
        }
        Ok(first_failed)
    }

    fn dry_run_stop(&mut self, gate_failure: Option<String>) -> Result<RunOutcome> {
        self.enter(Stage::DryRunStop)?;
        self.sink.emit(
            Stage::DryRunStop,
            "terminal",
            json!({"gate_failure": gate_failure}),
        )?;
        // Dry-run always cleans up, keep-workspace included.
        self.destroy_workspace(false)?;
        Ok(RunOutcome {
            terminal: Terminal::DryRun,
            failed_stage: gate_failure.as_ref().map(|_| Stage::Gates),
            failure: gate_failure.map(|gate| RunError::GateFailure { gate }.to_string()),
            commit: None,
            archive: None,
        })
    }

    /// Resolve divergence and copy into the live tree. Returns the paths that
    /// actually landed in the live tree; empty when there was nothing to
    /// promote (overridden noop, or every path skipped by policy).
    fn promotion(&mut self, promotion_set: &[String]) -> Result<Vec<String>> {
        self.enter(Stage::Promotion)?;
        if promotion_set.is_empty() {
            self.sink.emit(
                Stage::Promotion,
                "skip",
                json!({"reason": "empty promotion set"}),
            )?;
            return Ok(Vec::new());
        }

        let ws = self.workspace().clone();
        let live = Git::new(&self.live_root);
        let outcome = promote::resolve_and_copy(
            &live,
            &ws.root,
            &ws.base_commit,
            promotion_set,
            self.req.overrides.live_policy,
        )?;
        self.sink
            .emit(Stage::Promotion, "resolved", serde_json::to_value(&outcome)?)?;
        if outcome.promoted.is_empty() {
            self.sink.emit(
                Stage::Promotion,
                "skip",
                json!({"reason": "all paths skipped by live-change policy"}),
            )?;
        }
        Ok(outcome.promoted)
    }

    fn publish(&mut self, promoted: &[String]) -> Result<()> {
        self.enter(Stage::Publish)?;
        let live = Git::new(&self.live_root);
        let commit = publish::stage_and_commit(
            &live,
            self.req.mode,
            &self.req.message,
            promoted,
            &self.cfg.publish,
            self.req.overrides.allow_non_main,
        )?;
        self.sink.emit(
            Stage::Publish,
            "commit",
            json!({"commit": commit, "staged": promoted}),
        )?;
        self.commit = Some(commit);

        publish::push(&live, &self.cfg.publish)?;
        self.sink.emit(Stage::Publish, "push", json!({}))?;
        Ok(())
    }

    fn archive(&mut self) -> Result<()> {
        self.enter(Stage::Archive)?;
        let commit = self
            .commit
            .as_deref()
            .expect("archive runs after a successful commit");
        let name = archive::success_bundle_name(
            &self.cfg.archive.success_name,
            &self.req.change_id,
            commit,
        );
        let out = resolve_path(&self.live_root, &self.cfg.paths.archives_dir).join(name);
        let live = Git::new(&self.live_root);
        let path = archive::success_bundle(&live, &out)?;
        self.sink.emit(
            Stage::Archive,
            "success_bundle",
            json!({"path": path.display().to_string()}),
        )?;
        self.archive = Some(path);
        Ok(())
    }

    fn audit(&mut self) -> Result<()> {
        self.enter(Stage::Audit)?;
        let commit = self
            .commit
            .as_deref()
            .expect("audit runs after a successful commit");
        let outcome = audit::run_audit(
            &self.cfg.audit,
            &self.live_root,
            &self.req.change_id,
            commit,
            self.timeout(),
            self.cfg.limits.output_limit_bytes,
        )?;
        let kind = match outcome {
            AuditOutcome::Skipped => "skip",
            AuditOutcome::Passed => "ok",
        };
        self.sink.emit(Stage::Audit, kind, json!({}))?;
        Ok(())
    }

    fn success(&mut self) -> Result<RunOutcome> {
        self.stage = Stage::Success;
        self.sink
            .emit(Stage::Success, "terminal", json!({"commit": self.commit}))?;
        Ok(RunOutcome {
            terminal: Terminal::Success,
            failed_stage: None,
            failure: None,
            commit: self.commit.clone(),
            archive: self.archive.clone(),
        })
    }

    fn destroy_workspace(&mut self, keep: bool) -> Result<()> {
        if self.workspace.is_none() {
            return Ok(());
        }
        if keep {
            self.sink
                .emit(Stage::WorkspaceSetup, "keep", json!({}))?;
            return Ok(());
        }
        self.manager.destroy(&self.req.change_id)?;
        self.sink.emit(Stage::WorkspaceSetup, "destroy", json!({}))?;
        self.workspace = None;
        Ok(())
    }

    /// Convert a stage error into a terminal outcome: emit the failure,
    /// archive the workspace for inspection, clean up.
    fn fail(&mut self, err: anyhow::Error) -> Result<RunOutcome> {
        let stage = stage_of(&err, self.stage);
        let message = format!("{err:#}");
        self.sink
            .emit(stage, "fail", json!({"error": message}))?;

        // A failed audit is still a promoted change: distinct terminal, no
        // rollback, no failure bundle.
        if stage == Stage::Audit {
            self.sink.emit(Stage::Audit, "terminal", json!({}))?;
            return Ok(RunOutcome {
                terminal: Terminal::Audit,
                failed_stage: Some(stage),
                failure: Some(message),
                commit: self.commit.clone(),
                archive: self.archive.clone(),
            });
        }

        if self.req.mode.is_dry_run() {
            self.sink.emit(
                Stage::DryRunStop,
                "terminal",
                json!({"failed_stage": stage}),
            )?;
            self.destroy_workspace(false)?;
            return Ok(RunOutcome {
                terminal: Terminal::DryRun,
                failed_stage: Some(stage),
                failure: Some(message),
                commit: None,
                archive: None,
            });
        }

        if let Some(ws) = self.workspace.clone() {
            let out = resolve_path(&self.live_root, &self.cfg.paths.archives_dir)
                .join(format!("{}-failure.tar.gz", self.req.change_id));
            match archive::failure_bundle(&ws.root, &self.cfg.archive.failure_excludes, &out) {
                Ok(path) => {
                    self.sink.emit(
                        Stage::Archive,
                        "failure_bundle",
                        json!({"path": path.display().to_string()}),
                    )?;
                    self.archive = Some(path);
                }
                Err(bundle_err) => {
                    warn!(err = %format!("{bundle_err:#}"), "failure bundle not written");
                }
            }
        }
        self.destroy_workspace(self.req.overrides.keep_workspace)
            .context("clean up workspace after failure")?;

        self.sink
            .emit(Stage::Fail, "terminal", json!({"failed_stage": stage}))?;
        Ok(RunOutcome {
            terminal: Terminal::Fail,
            failed_stage: Some(stage),
            failure: Some(message),
            commit: self.commit.clone(),
            archive: self.archive.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::request::Overrides;
    use crate::io::events::MemoryEventSink;
    use crate::test_support::TestRepo;

    fn request(change_id: &str, mode: RunMode, source: Option<PathBuf>) -> ChangeRequest {
        ChangeRequest {
            change_id: change_id.to_string(),
            mode,
            message: format!("{change_id}: test change"),
            source,
            overrides: Overrides::default(),
            build_exclude: None,
        }
    }

    #[test]
    fn normal_run_promotes_commits_and_pushes() {
        let repo = TestRepo::new();
        let patch = repo.make_diff("chg", &[("x.txt", "patched content\n")]);
        let req = request("chg", RunMode::Normal, Some(patch));
        let mut sink = MemoryEventSink::new("chg");

        let outcome =
            execute(&req, &repo.config(), repo.live_root(), &mut sink).expect("execute");
        assert_eq!(outcome.terminal, Terminal::Success);
        assert_eq!(outcome.exit_code(), crate::exit_codes::OK);

        let commit = outcome.commit.expect("commit recorded");
        assert_eq!(repo.origin_head(), commit);
        let content =
            std::fs::read_to_string(repo.live_root().join("x.txt")).expect("read live");
        assert_eq!(content, "patched content\n");

        // Workspace is gone, archive exists, success terminal emitted.
        assert!(!repo.workspaces_dir().join("chg").exists());
        assert!(outcome.archive.expect("archive").exists());
        assert!(sink.has(Stage::Success, "terminal"));
    }

    #[test]
    fn undeclared_touch_fails_closed_with_exit_one() {
        let repo = TestRepo::new();
        // Diff touches x.txt but declares nothing.
        let patch = repo.make_undeclared_diff("chg", &[("x.txt", "sneaky\n")]);
        let req = request("chg", RunMode::Normal, Some(patch));
        let mut sink = MemoryEventSink::new("chg");

        let outcome =
            execute(&req, &repo.config(), repo.live_root(), &mut sink).expect("execute");
        assert_eq!(outcome.terminal, Terminal::Fail);
        assert_eq!(outcome.exit_code(), crate::exit_codes::FAILED);
        assert_eq!(outcome.failed_stage, Some(Stage::ScopeCheck));
        assert!(outcome.failure.expect("failure").contains("undeclared"));

        // The live tree was never modified.
        let live = Git::new(repo.live_root());
        assert!(live.is_clean().expect("status"));
        assert!(sink.has(Stage::Fail, "terminal"));
    }

    #[test]
    fn dry_run_exits_zero_and_removes_workspace_even_on_failure() {
        let repo = TestRepo::new();
        let patch = repo.make_undeclared_diff("chg", &[("x.txt", "sneaky\n")]);
        let req = request("chg", RunMode::DryRun, Some(patch));
        let mut sink = MemoryEventSink::new("chg");

        let outcome =
            execute(&req, &repo.config(), repo.live_root(), &mut sink).expect("execute");
        assert_eq!(outcome.terminal, Terminal::DryRun);
        assert_eq!(outcome.exit_code(), crate::exit_codes::OK);
        assert!(outcome.failure.is_some());
        assert!(!repo.workspaces_dir().join("chg").exists());
        assert!(sink.has(Stage::DryRunStop, "terminal"));
    }

    #[test]
    fn failed_run_leaves_a_failure_bundle() {
        let repo = TestRepo::new();
        let patch = repo.make_undeclared_diff("chg", &[("x.txt", "sneaky\n")]);
        let req = request("chg", RunMode::Normal, Some(patch));
        let mut sink = MemoryEventSink::new("chg");

        let outcome =
            execute(&req, &repo.config(), repo.live_root(), &mut sink).expect("execute");
        assert_eq!(outcome.terminal, Terminal::Fail);
        let bundle = outcome.archive.expect("failure bundle");
        assert!(bundle.ends_with("chg-failure.tar.gz"));
        assert!(bundle.exists());
    }

    #[test]
    fn no_promote_stops_before_publish() {
        let repo = TestRepo::new();
        let origin_before = repo.origin_head();
        let patch = repo.make_diff("chg", &[("x.txt", "patched\n")]);
        let mut req = request("chg", RunMode::Normal, Some(patch));
        req.overrides.no_promote = true;
        let mut sink = MemoryEventSink::new("chg");

        let outcome =
            execute(&req, &repo.config(), repo.live_root(), &mut sink).expect("execute");
        assert_eq!(outcome.terminal, Terminal::Success);
        assert!(outcome.commit.is_none());
        assert!(outcome.archive.is_none());
        assert_eq!(repo.origin_head(), origin_before);
        assert!(sink.has(Stage::Promotion, "skip"));
    }

    #[test]
    fn reapply_latest_replays_the_recorded_source() {
        let repo = TestRepo::new();
        let patch = repo.make_diff("chg", &[("x.txt", "patched\n")]);

        let mut req = request("chg", RunMode::Normal, Some(patch));
        req.overrides.no_promote = true;
        let mut sink = MemoryEventSink::new("chg");
        execute(&req, &repo.config(), repo.live_root(), &mut sink).expect("first run");

        let req = request("chg", RunMode::ReapplyLatest, None);
        let mut sink = MemoryEventSink::new("chg");
        let outcome =
            execute(&req, &repo.config(), repo.live_root(), &mut sink).expect("replay");
        assert_eq!(outcome.terminal, Terminal::Success);
        assert!(outcome.commit.is_some());
    }

    #[test]
    fn gate_failure_is_stage_tagged_and_overridable() {
        let repo = TestRepo::new();
        let mut cfg = repo.config();
        cfg.gates.test = "sh -c 'exit 1'".to_string();

        let patch = repo.make_diff("chg", &[("x.txt", "patched\n")]);
        let req = request("chg", RunMode::Normal, Some(patch.clone()));
        let mut sink = MemoryEventSink::new("chg");
        let outcome = execute(&req, &cfg, repo.live_root(), &mut sink).expect("execute");
        assert_eq!(outcome.terminal, Terminal::Fail);
        assert_eq!(outcome.failed_stage, Some(Stage::Gates));

        let mut req = request("chg", RunMode::Normal, Some(patch));
        req.overrides.allow_gate_failure = true;
        let mut sink = MemoryEventSink::new("chg");
        let outcome = execute(&req, &cfg, repo.live_root(), &mut sink).expect("execute");
        assert_eq!(outcome.terminal, Terminal::Success);
    }

    #[test]
    fn audit_failure_keeps_the_commit_and_flips_the_terminal() {
        let repo = TestRepo::new();
        let mut cfg = repo.config();
        cfg.audit.command = "sh -c 'exit 1'".to_string();

        let patch = repo.make_diff("chg", &[("x.txt", "patched\n")]);
        let req = request("chg", RunMode::Normal, Some(patch));
        let mut sink = MemoryEventSink::new("chg");
        let outcome = execute(&req, &cfg, repo.live_root(), &mut sink).expect("execute");

        assert_eq!(outcome.terminal, Terminal::Audit);
        assert_eq!(outcome.exit_code(), crate::exit_codes::AUDIT);
        let commit = outcome.commit.expect("commit kept");
        assert_eq!(repo.origin_head(), commit);
    }
}
