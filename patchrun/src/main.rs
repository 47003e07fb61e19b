use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, ValueEnum};
use tracing::error;

use patchrun::core::request::{ChangeRequest, ConflictPolicy, Overrides, RunMode};
use patchrun::error::Stage;
use patchrun::io::config::{load_config, resolve_path};
use patchrun::io::events::FileEventSink;
use patchrun::run::{self, RunOutcome, Terminal};
use patchrun::{exit_codes, logging};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LiveChangeArg {
    /// Abort promotion when the live branch moved a promoted path.
    Fail,
    /// Overwrite the live version with the workspace version.
    OverwriteLive,
    /// Keep the live version and record the skip.
    OverwriteWorkspace,
}

impl From<LiveChangeArg> for ConflictPolicy {
    fn from(arg: LiveChangeArg) -> Self {
        match arg {
            LiveChangeArg::Fail => ConflictPolicy::Fail,
            LiveChangeArg::OverwriteLive => ConflictPolicy::OverwriteLive,
            LiveChangeArg::OverwriteWorkspace => ConflictPolicy::OverwriteWorkspace,
        }
    }
}

/// Apply a patch in an isolated workspace, gate it, and promote it onto the
/// live branch.
#[derive(Debug, Parser)]
#[command(version, about)]
#[command(group(ArgGroup::new("mode").args(
    ["dry_run", "promote_live", "promote_workspace", "reapply_latest"]
)))]
struct Cli {
    /// Stable change identifier (e.g. an issue number).
    change_id: String,

    /// Commit message for the promoted change.
    commit_message: String,

    /// Patch source: unified diff, generator script, or zip bundle. Required
    /// except with --promote-workspace / --reapply-latest.
    patch_source: Option<PathBuf>,

    /// Stop after gates; never promote, always clean up, always exit 0.
    #[arg(long)]
    dry_run: bool,

    /// Commit the entire live working tree instead of just the promotion set.
    #[arg(long)]
    promote_live: bool,

    /// Reuse the existing workspace as-is, without applying a patch.
    #[arg(long)]
    promote_workspace: bool,

    /// Recreate the workspace and replay the last recorded patch source.
    #[arg(long)]
    reapply_latest: bool,

    /// Accept a change with no effective file differences.
    #[arg(long)]
    allow_noop: bool,

    /// Accept declared paths that were not actually touched.
    #[arg(long)]
    allow_untouched_declared: bool,

    /// Accept (and promote) touched paths missing from the declaration.
    #[arg(long)]
    allow_undeclared_touch: bool,

    /// Policy for promoted paths the live branch changed since the base.
    #[arg(long, value_enum, default_value = "fail")]
    on_live_change: LiveChangeArg,

    /// Run every gate and continue even when one fails.
    #[arg(long)]
    allow_gate_failure: bool,

    /// Run gates but skip promotion, publish, archive and audit.
    #[arg(long)]
    no_promote: bool,

    /// Publish from a branch outside the configured main set.
    #[arg(long)]
    allow_non_main: bool,

    /// Discard uncommitted workspace changes instead of refusing to recreate.
    #[arg(long)]
    soft_reset: bool,

    /// Keep the workspace directory after the run finishes.
    #[arg(long)]
    keep_workspace: bool,

    /// Extra build-gate exclusion regex, merged with the configured one.
    #[arg(long, value_name = "REGEX")]
    build_exclude: Option<String>,

    /// Config file (default: <repo>/.patchrun/config.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Live repository root.
    #[arg(long, value_name = "PATH", default_value = ".")]
    repo: PathBuf,
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.dry_run {
            RunMode::DryRun
        } else if self.promote_live {
            RunMode::PromoteLive
        } else if self.promote_workspace {
            RunMode::PromoteWorkspace
        } else if self.reapply_latest {
            RunMode::ReapplyLatest
        } else {
            RunMode::Normal
        }
    }

    fn into_request(self) -> ChangeRequest {
        let mode = self.mode();
        ChangeRequest {
            change_id: self.change_id,
            mode,
            message: self.commit_message,
            source: self.patch_source,
            overrides: Overrides {
                allow_noop: self.allow_noop,
                allow_untouched_declared: self.allow_untouched_declared,
                allow_undeclared_touch: self.allow_undeclared_touch,
                live_policy: self.on_live_change.into(),
                allow_gate_failure: self.allow_gate_failure,
                no_promote: self.no_promote,
                allow_non_main: self.allow_non_main,
                soft_reset: self.soft_reset,
                keep_workspace: self.keep_workspace,
            },
            build_exclude: self.build_exclude,
        }
    }
}

fn run(cli: Cli) -> Result<RunOutcome> {
    let live_root = cli
        .repo
        .canonicalize()
        .with_context(|| format!("repository root {}", cli.repo.display()))?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| live_root.join(".patchrun/config.toml"));
    let cfg = load_config(&config_path)?;

    let events_dir = resolve_path(&live_root, &cfg.paths.events_dir);
    let req = cli.into_request();
    let mut sink = FileEventSink::open(&events_dir, &req.change_id)?;
    run::execute(&req, &cfg, &live_root, &mut sink)
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(outcome) => {
            if let Some(failure) = &outcome.failure {
                let stage = outcome.failed_stage.unwrap_or(Stage::Fail);
                eprintln!("[{stage}] {failure}");
            }
            if outcome.terminal == Terminal::Success
                && let Some(commit) = &outcome.commit
            {
                println!("{commit}");
            }
            ExitCode::from(outcome.exit_code() as u8)
        }
        Err(err) => {
            error!(err = %format!("{err:#}"), "run aborted");
            eprintln!("[{}] {err:#}", Stage::Init);
            ExitCode::from(exit_codes::FAILED as u8)
        }
    }
}
