//! Patch source loading and application.
//!
//! A source is a single unified diff, a generator script, or a zip bundle of
//! either. Bundles containing diffs apply the diffs in lexicographic entry
//! order and ignore any scripts; a bundle without diffs runs its first script
//! (sorted order). Scope declarations travel in `FILES:` preambles of diffs
//! or in a standalone `FILES` entry.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};
use zip::ZipArchive;

use crate::core::tokenizer::tokenize_command;
use crate::error::RunError;
use crate::io::git::Git;
use crate::io::process::run_command;

/// One applicable operation extracted from a patch source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOp {
    /// Unified diff, applied to the workspace worktree.
    ApplyDiff { name: String, bytes: Vec<u8> },
    /// Generator script, executed with the workspace as working directory.
    RunScript { name: String, bytes: Vec<u8> },
}

impl PatchOp {
    pub fn name(&self) -> &str {
        match self {
            PatchOp::ApplyDiff { name, .. } | PatchOp::RunScript { name, .. } => name,
        }
    }
}

/// A fully loaded patch source: ordered operations plus the concatenated
/// declaration text (diff preambles and any standalone `FILES` entries).
#[derive(Debug, Clone)]
pub struct LoadedChange {
    pub ops: Vec<PatchOp>,
    pub metadata: String,
}

/// Settings needed to apply operations into a workspace.
#[derive(Debug, Clone)]
pub struct ApplyContext {
    pub workspace_root: PathBuf,
    pub script_runner: String,
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
}

fn is_diff_name(name: &str) -> bool {
    name.ends_with(".patch") || name.ends_with(".diff")
}

fn is_script_name(name: &str) -> bool {
    name.ends_with(".sh") || name.ends_with(".py")
}

fn is_declaration_name(name: &str) -> bool {
    let base = name.rsplit('/').next().unwrap_or(name);
    base == "FILES" || base == "FILES.txt"
}

/// Text preceding the first diff header. This is where `FILES:` declarations
/// live; `git apply` skips it on its own.
fn diff_preamble(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let mut preamble = String::new();
    for line in text.lines() {
        if line.starts_with("diff --git")
            || line.starts_with("--- ")
            || line.starts_with("Index: ")
        {
            break;
        }
        preamble.push_str(line);
        preamble.push('\n');
    }
    preamble
}

/// Resolve and load a patch source from disk.
///
/// When `storage_roots` is non-empty the canonicalized source must live under
/// one of them; anything else is refused before any file content is read.
#[instrument(skip(storage_roots), fields(source = %source.display()))]
pub fn load_source(source: &Path, storage_roots: &[PathBuf]) -> Result<LoadedChange> {
    let canonical = source.canonicalize().map_err(|e| {
        RunError::PatchSource(format!("source {} not readable: {e}", source.display()))
    })?;

    if !storage_roots.is_empty() {
        let allowed = storage_roots.iter().any(|root| {
            root.canonicalize()
                .is_ok_and(|root| canonical.starts_with(root))
        });
        if !allowed {
            return Err(RunError::PatchSource(format!(
                "source {} is outside the allowed storage roots",
                source.display()
            ))
            .into());
        }
    }

    let name = canonical
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RunError::PatchSource("source has no usable file name".to_string()))?
        .to_string();

    if name.ends_with(".zip") {
        return load_bundle(&canonical);
    }

    let bytes = fs::read(&canonical)
        .map_err(|e| RunError::PatchSource(format!("read {}: {e}", canonical.display())))?;
    if is_diff_name(&name) {
        let metadata = diff_preamble(&bytes);
        Ok(LoadedChange {
            ops: vec![PatchOp::ApplyDiff { name, bytes }],
            metadata,
        })
    } else {
        // Anything that is not a diff or a bundle is treated as a script.
        Ok(LoadedChange {
            ops: vec![PatchOp::RunScript { name, bytes }],
            metadata: String::new(),
        })
    }
}

fn load_bundle(path: &Path) -> Result<LoadedChange> {
    let file = File::open(path)
        .map_err(|e| RunError::PatchSource(format!("open {}: {e}", path.display())))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| RunError::PatchSource(format!("read bundle {}: {e}", path.display())))?;

    let mut diffs: Vec<(String, Vec<u8>)> = Vec::new();
    let mut scripts: Vec<(String, Vec<u8>)> = Vec::new();
    let mut metadata = String::new();

    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();

    for name in &names {
        let mut entry = archive
            .by_name(name)
            .map_err(|e| RunError::PatchSource(format!("bundle entry {name}: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        let mut bytes = Vec::new();
        std::io::copy(&mut entry, &mut bytes)
            .map_err(|e| RunError::PatchSource(format!("extract bundle entry {name}: {e}")))?;

        if is_declaration_name(name) {
            metadata.push_str(&String::from_utf8_lossy(&bytes));
            metadata.push('\n');
        } else if is_diff_name(name) {
            metadata.push_str(&diff_preamble(&bytes));
            diffs.push((name.clone(), bytes));
        } else if is_script_name(name) {
            scripts.push((name.clone(), bytes));
        }
        // Other entries (readmes, fixtures) are inert.
    }

    // Diffs take precedence: a bundle carrying both is treated as a diff
    // bundle and its scripts are ignored.
    let ops: Vec<PatchOp> = if !diffs.is_empty() {
        diffs
            .into_iter()
            .map(|(name, bytes)| PatchOp::ApplyDiff { name, bytes })
            .collect()
    } else if let Some((name, bytes)) = scripts.into_iter().next() {
        vec![PatchOp::RunScript { name, bytes }]
    } else {
        return Err(
            RunError::PatchSource(format!("bundle {} contains no operations", path.display()))
                .into(),
        );
    };

    info!(ops = ops.len(), "bundle loaded");
    Ok(LoadedChange { ops, metadata })
}

/// Apply one operation into the workspace.
#[instrument(skip_all, fields(op = op.name()))]
pub fn apply(op: &PatchOp, ctx: &ApplyContext) -> Result<()> {
    match op {
        PatchOp::ApplyDiff { name, bytes } => {
            let git = Git::new(&ctx.workspace_root);
            git.apply_patch(bytes)
                .with_context(|| format!("apply diff '{name}'"))?;
            debug!("diff applied");
            Ok(())
        }
        PatchOp::RunScript { name, bytes } => {
            let script_path = std::env::temp_dir().join(format!(
                "patchrun-{}-{}",
                std::process::id(),
                name.replace('/', "_")
            ));
            fs::write(&script_path, bytes)
                .with_context(|| format!("write script {}", script_path.display()))?;

            let result = run_script(&script_path, ctx, name);
            let _ = fs::remove_file(&script_path);
            result
        }
    }
}

fn run_script(script_path: &Path, ctx: &ApplyContext, name: &str) -> Result<()> {
    let runner = tokenize_command(&ctx.script_runner).context("patch.script_runner")?;
    let mut cmd = Command::new(&runner[0]);
    cmd.args(&runner[1..])
        .arg(script_path)
        .current_dir(&ctx.workspace_root);

    let out = run_command(cmd, None, ctx.timeout, ctx.output_limit_bytes)
        .with_context(|| format!("run script '{name}'"))?;
    if !out.success() {
        return Err(anyhow!(
            "script '{name}' failed (exit {:?}):\n{}",
            out.exit_code(),
            out.combined_log()
        ));
    }
    debug!("script finished");
    Ok(())
}
