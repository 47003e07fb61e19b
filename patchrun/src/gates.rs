//! Quality gate pipeline.
//!
//! Fixed default order: build/syntax, lint, tests, type-check, then an
//! optional self-protection regression gate. Configuration selects inclusion
//! (an empty command string disables a gate); ordering never depends on
//! string comparisons at call sites.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::scope::is_blessed;
use crate::core::tokenizer::tokenize_command;
use crate::io::config::{Config, SelfProtectMode};
use crate::io::git::Git;
use crate::io::process::run_command;

/// Environment variable carrying the merged build exclusion regex.
pub const BUILD_EXCLUDE_ENV: &str = "BUILD_EXCLUDE_RE";

/// Execution settings shared by all gates in one run.
#[derive(Debug, Clone)]
pub struct GateContext {
    /// Workspace root the gate commands run in.
    pub workdir: PathBuf,
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
}

/// Outcome of one gate, recorded append-only and emitted as an event.
#[derive(Debug, Clone, Serialize)]
pub struct GateResult {
    pub name: String,
    pub ordinal: usize,
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Combined stdout/stderr, truncated to the configured limit.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
}

pub trait Gate {
    fn name(&self) -> &str;
    fn ordinal(&self) -> usize;
    fn run(&self, ctx: &GateContext) -> Result<GateResult>;
}

fn run_gate_command(
    name: &str,
    ordinal: usize,
    command: &str,
    env: &[(String, String)],
    workdir: &Path,
    ctx: &GateContext,
) -> Result<GateResult> {
    let tokens = tokenize_command(command).with_context(|| format!("gate '{name}' command"))?;
    let mut cmd = Command::new(&tokens[0]);
    cmd.args(&tokens[1..]).current_dir(workdir);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let out = run_command(cmd, None, ctx.timeout, ctx.output_limit_bytes)
        .with_context(|| format!("run gate '{name}'"))?;
    let passed = out.success();
    if passed {
        debug!(gate = name, "gate passed");
    } else {
        warn!(gate = name, exit_code = ?out.exit_code(), timed_out = out.timed_out, "gate failed");
    }
    Ok(GateResult {
        name: name.to_string(),
        ordinal,
        passed,
        exit_code: out.exit_code(),
        timed_out: out.timed_out,
        output: out.combined_log(),
    })
}

/// Build/syntax validation, with the merged exclusion regex exported to the
/// child process.
pub struct BuildCheck {
    command: String,
    exclude: Option<String>,
}

impl Gate for BuildCheck {
    fn name(&self) -> &str {
        "build"
    }

    fn ordinal(&self) -> usize {
        0
    }

    fn run(&self, ctx: &GateContext) -> Result<GateResult> {
        let mut env = Vec::new();
        if let Some(exclude) = &self.exclude {
            env.push((BUILD_EXCLUDE_ENV.to_string(), exclude.clone()));
        }
        run_gate_command(self.name(), self.ordinal(), &self.command, &env, &ctx.workdir, ctx)
    }
}

pub struct LintCheck {
    command: String,
}

impl Gate for LintCheck {
    fn name(&self) -> &str {
        "lint"
    }

    fn ordinal(&self) -> usize {
        1
    }

    fn run(&self, ctx: &GateContext) -> Result<GateResult> {
        run_gate_command(self.name(), self.ordinal(), &self.command, &[], &ctx.workdir, ctx)
    }
}

pub struct TestCheck {
    command: String,
}

impl Gate for TestCheck {
    fn name(&self) -> &str {
        "test"
    }

    fn ordinal(&self) -> usize {
        2
    }

    fn run(&self, ctx: &GateContext) -> Result<GateResult> {
        run_gate_command(self.name(), self.ordinal(), &self.command, &[], &ctx.workdir, ctx)
    }
}

pub struct TypeCheck {
    command: String,
}

impl Gate for TypeCheck {
    fn name(&self) -> &str {
        "typecheck"
    }

    fn ordinal(&self) -> usize {
        3
    }

    fn run(&self, ctx: &GateContext) -> Result<GateResult> {
        run_gate_command(self.name(), self.ordinal(), &self.command, &[], &ctx.workdir, ctx)
    }
}

/// Regression gate protecting the engine's own implementation.
///
/// Never runs inside the candidate workspace: it uses the live root when that
/// root is itself a workspace clone (a sidecar meta file marks those), and a
/// disposable clone of the live repo otherwise, so a held change lock is
/// never re-entered.
pub struct SelfProtectionCheck {
    command: String,
    live_root: PathBuf,
    workspaces_dir: PathBuf,
    change_id: String,
}

impl SelfProtectionCheck {
    fn live_root_is_workspace_clone(&self) -> bool {
        let Some(parent) = self.live_root.parent() else {
            return false;
        };
        let Some(name) = self.live_root.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        parent.join(format!("{name}.meta.json")).exists()
    }
}

impl Gate for SelfProtectionCheck {
    fn name(&self) -> &str {
        "self_protection"
    }

    fn ordinal(&self) -> usize {
        4
    }

    #[instrument(skip_all)]
    fn run(&self, ctx: &GateContext) -> Result<GateResult> {
        if self.live_root_is_workspace_clone() {
            debug!("running self-protection in live root (already a workspace clone)");
            return run_gate_command(
                self.name(),
                self.ordinal(),
                &self.command,
                &[],
                &self.live_root,
                ctx,
            );
        }

        let clone_dir = self
            .workspaces_dir
            .join(format!("{}.selfcheck", self.change_id));
        if clone_dir.exists() {
            fs::remove_dir_all(&clone_dir)
                .with_context(|| format!("remove stale clone {}", clone_dir.display()))?;
        }
        fs::create_dir_all(&self.workspaces_dir).context("create workspaces dir")?;
        Git::clone_local(&self.live_root, &clone_dir)?;
        info!(clone = %clone_dir.display(), "running self-protection in disposable clone");

        let result = run_gate_command(
            self.name(),
            self.ordinal(),
            &self.command,
            &[],
            &clone_dir,
            ctx,
        );
        let _ = fs::remove_dir_all(&clone_dir);
        result
    }
}

/// Merge the configured and CLI exclusion patterns into one validated regex.
fn merged_exclude(config: &str, cli: Option<&str>) -> Result<Option<String>> {
    let mut parts: Vec<&str> = Vec::new();
    if !config.is_empty() {
        parts.push(config);
    }
    if let Some(cli) = cli
        && !cli.is_empty()
    {
        parts.push(cli);
    }
    if parts.is_empty() {
        return Ok(None);
    }
    let pattern = if parts.len() == 1 {
        parts[0].to_string()
    } else {
        parts
            .iter()
            .map(|p| format!("(?:{p})"))
            .collect::<Vec<_>>()
            .join("|")
    };
    Regex::new(&pattern)
        .map_err(|e| anyhow!("invalid build exclude pattern '{pattern}': {e}"))?;
    Ok(Some(pattern))
}

/// Assemble the gate list for one run from configuration and the touched set.
pub fn build_pipeline(
    cfg: &Config,
    cli_exclude: Option<&str>,
    touched: &[String],
    live_root: &Path,
    workspaces_dir: &Path,
    change_id: &str,
) -> Result<Vec<Box<dyn Gate>>> {
    let mut gates: Vec<Box<dyn Gate>> = Vec::new();

    if !cfg.gates.build.is_empty() {
        gates.push(Box::new(BuildCheck {
            command: cfg.gates.build.clone(),
            exclude: merged_exclude(&cfg.gates.build_exclude, cli_exclude)?,
        }));
    }
    if !cfg.gates.lint.is_empty() {
        gates.push(Box::new(LintCheck {
            command: cfg.gates.lint.clone(),
        }));
    }
    if !cfg.gates.test.is_empty() {
        gates.push(Box::new(TestCheck {
            command: cfg.gates.test.clone(),
        }));
    }
    if !cfg.gates.typecheck.is_empty() {
        gates.push(Box::new(TypeCheck {
            command: cfg.gates.typecheck.clone(),
        }));
    }

    let include_self = !cfg.gates.self_protect_command.is_empty()
        && match cfg.gates.self_protect {
            SelfProtectMode::Never => false,
            SelfProtectMode::Always => true,
            SelfProtectMode::Auto => touched
                .iter()
                .any(|path| is_blessed(path, &cfg.gates.self_protect_paths)),
        };
    if include_self {
        gates.push(Box::new(SelfProtectionCheck {
            command: cfg.gates.self_protect_command.clone(),
            live_root: live_root.to_path_buf(),
            workspaces_dir: workspaces_dir.to_path_buf(),
            change_id: change_id.to_string(),
        }));
    }

    Ok(gates)
}

/// Run the pipeline. Fail-fast by default; with `fail_soft` every gate runs
/// and all results are recorded. Returns the results plus the first failing
/// gate's name, if any.
pub fn run_pipeline(
    gates: &[Box<dyn Gate>],
    ctx: &GateContext,
    fail_soft: bool,
) -> Result<(Vec<GateResult>, Option<String>)> {
    let mut results = Vec::new();
    let mut first_failed: Option<String> = None;

    for gate in gates {
        let result = gate.run(ctx)?;
        let passed = result.passed;
        if !passed && first_failed.is_none() {
            first_failed = Some(result.name.clone());
        }
        results.push(result);
        if !passed && !fail_soft {
            break;
        }
    }

    Ok((results, first_failed))
}
