//! Engine configuration stored under `.patchrun/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::tokenizer::tokenize_command;

/// Engine configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values; relative paths are
/// resolved against the live repository root.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub scope: ScopeConfig,
    pub gates: GatesConfig,
    pub publish: PublishConfig,
    pub archive: ArchiveConfig,
    pub audit: AuditConfig,
    pub limits: LimitsConfig,
    pub patch: PatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    /// Where per-change workspaces and their locks live.
    pub workspaces_dir: PathBuf,
    /// Where the per-change event streams are appended.
    pub events_dir: PathBuf,
    /// Where failure and success bundles are written.
    pub archives_dir: PathBuf,
    /// Patch sources must resolve under one of these roots. Empty list means
    /// unrestricted (regression fixtures set it explicitly).
    pub storage_roots: Vec<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            workspaces_dir: PathBuf::from(".patchrun/workspaces"),
            events_dir: PathBuf::from(".patchrun/events"),
            archives_dir: PathBuf::from(".patchrun/archives"),
            storage_roots: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScopeConfig {
    /// Generated-output path prefixes exempt from scope declaration checks.
    pub blessed: Vec<String>,
}

/// When the self-protection regression gate is included.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SelfProtectMode {
    /// Only when the change touches the engine's own implementation paths.
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatesConfig {
    /// Build/syntax validation command. Empty string disables the gate.
    pub build: String,
    /// Style/lint command.
    pub lint: String,
    /// Automated test suite command.
    pub test: String,
    /// Static type-check command.
    pub typecheck: String,
    /// Exclusion regex for the build gate, merged with any CLI override and
    /// exported to the child as `BUILD_EXCLUDE_RE`.
    pub build_exclude: String,
    pub self_protect: SelfProtectMode,
    /// Self-protection regression command.
    pub self_protect_command: String,
    /// Path prefixes counting as the engine's own implementation.
    pub self_protect_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublishConfig {
    /// Branches the publisher accepts without `--allow-non-main`.
    pub main_branches: Vec<String>,
    pub remote: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            main_branches: vec!["main".to_string(), "master".to_string()],
            remote: "origin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Success bundle name template; `{change_id}` and `{commit}` expand.
    pub success_name: String,
    /// Directory/path names excluded from failure bundles.
    pub failure_excludes: Vec<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            success_name: "{change_id}-{commit}.tar.gz".to_string(),
            failure_excludes: vec![
                ".git".to_string(),
                "target".to_string(),
                "node_modules".to_string(),
                "__pycache__".to_string(),
                ".cache".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuditConfig {
    /// Post-success audit command. Empty string disables the hook.
    pub command: String,
    /// Working directory for the hook; defaults to the live repository root.
    pub workdir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Per-gate (and audit) wall-clock limit in seconds. 0 means no timeout:
    /// callers needing bounded latency wrap the engine externally.
    pub gate_timeout_secs: u64,
    /// Truncate captured gate/audit output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            gate_timeout_secs: 0,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PatchConfig {
    /// Command prefix for executing generator scripts (tokenized shell-style).
    pub script_runner: String,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            script_runner: "sh".to_string(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.limits.output_limit_bytes == 0 {
            return Err(anyhow!("limits.output_limit_bytes must be > 0"));
        }
        if !self.archive.success_name.contains("{change_id}") {
            return Err(anyhow!(
                "archive.success_name must contain the {{change_id}} placeholder"
            ));
        }
        if self.publish.main_branches.is_empty() {
            return Err(anyhow!("publish.main_branches must not be empty"));
        }
        tokenize_command(&self.patch.script_runner).context("patch.script_runner")?;
        // Empty command = gate disabled; a non-empty command that tokenizes to
        // nothing is a configuration error, not a silent no-op.
        for (name, command) in [
            ("gates.build", &self.gates.build),
            ("gates.lint", &self.gates.lint),
            ("gates.test", &self.gates.test),
            ("gates.typecheck", &self.gates.typecheck),
            ("gates.self_protect_command", &self.gates.self_protect_command),
            ("audit.command", &self.audit.command),
        ] {
            if !command.is_empty() {
                tokenize_command(command).context(name)?;
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `Config::default()`.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let cfg = Config::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Resolve a configured path against the live repository root.
pub fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
