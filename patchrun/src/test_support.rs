//! Shared fixtures for unit and integration tests.
//!
//! [`TestRepo`] builds a bare origin plus a live clone wired to it, so the
//! full promote/commit/push path runs against real git. Patch sources are
//! generated with git itself and dropped into a storage directory that the
//! fixture's config lists as the only allowed root.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use zip::write::FileOptions;

use crate::io::config::Config;

/// One temporary origin + live repository pair.
pub struct TestRepo {
    #[allow(dead_code)]
    temp: TempDir,
    origin: PathBuf,
    live: PathBuf,
    sources: PathBuf,
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("spawn git {args:?}: {e}"));
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

impl TestRepo {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("tempdir");
        let origin = temp.path().join("origin.git");
        let live = temp.path().join("live");
        let sources = temp.path().join("sources");
        fs::create_dir_all(&origin).expect("mkdir origin");
        fs::create_dir_all(&live).expect("mkdir live");
        fs::create_dir_all(&sources).expect("mkdir sources");

        git(&origin, &["init", "--bare", "--quiet"]);
        git(&origin, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        git(&live, &["init", "--quiet", "-b", "main"]);
        git(&live, &["config", "user.name", "fixture"]);
        git(&live, &["config", "user.email", "fixture@test"]);
        fs::write(live.join("seed.txt"), "seed\n").expect("write seed");
        git(&live, &["add", "-A"]);
        git(&live, &["commit", "--quiet", "-m", "initial"]);
        git(&live, &["remote", "add", "origin", origin.to_str().expect("utf8 path")]);
        git(&live, &["push", "--quiet", "-u", "origin", "main"]);

        Self {
            temp,
            origin,
            live,
            sources,
        }
    }

    pub fn live_root(&self) -> &Path {
        &self.live
    }

    pub fn sources_dir(&self) -> &Path {
        &self.sources
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.live.join(".patchrun/workspaces")
    }

    /// Fixture config: no gates, sources restricted to the storage dir.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.paths.storage_roots = vec![self.sources.clone()];
        cfg
    }

    pub fn head(&self) -> String {
        git(&self.live, &["rev-parse", "HEAD"])
    }

    pub fn origin_head(&self) -> String {
        git(&self.origin, &["rev-parse", "refs/heads/main"])
    }

    pub fn write_live(&self, rel: &str, content: &str) {
        let path = self.live.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, content).expect("write live file");
    }

    pub fn commit_live(&self, message: &str) {
        git(&self.live, &["add", "-A"]);
        git(&self.live, &["commit", "--quiet", "-m", message]);
    }

    /// Generate a unified diff against the current live tip, declaring every
    /// touched path in a `FILES:` preamble.
    pub fn make_diff(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        self.diff_with_preamble(name, files, true)
    }

    /// Same diff, but with no scope declaration at all.
    pub fn make_undeclared_diff(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        self.diff_with_preamble(name, files, false)
    }

    fn diff_with_preamble(&self, name: &str, files: &[(&str, &str)], declare: bool) -> PathBuf {
        let scratch = self.temp.path().join(format!("scratch-{name}"));
        if scratch.exists() {
            fs::remove_dir_all(&scratch).expect("remove scratch");
        }
        git(
            self.temp.path(),
            &[
                "clone",
                "--quiet",
                self.live.to_str().expect("utf8 path"),
                scratch.to_str().expect("utf8 path"),
            ],
        );
        for (rel, content) in files {
            let path = scratch.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("mkdir");
            }
            fs::write(path, content).expect("write scratch file");
        }
        git(&scratch, &["add", "-A"]);
        let diff = git_diff_cached(&scratch);

        let mut text = String::new();
        if declare {
            text.push_str("FILES:\n");
            for (rel, _) in files {
                text.push_str(&format!("- {rel}\n"));
            }
            text.push('\n');
        }
        text.push_str(&diff);

        let out = self.sources.join(format!("{name}.patch"));
        fs::write(&out, text).expect("write patch");
        out
    }

    /// Write a zip bundle into the storage dir.
    pub fn make_bundle(&self, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
        let out = self.sources.join(format!("{name}.zip"));
        let file = fs::File::create(&out).expect("create bundle");
        let mut writer = zip::ZipWriter::new(file);
        for (entry_name, bytes) in entries {
            writer
                .start_file(*entry_name, FileOptions::default())
                .expect("start entry");
            writer.write_all(bytes).expect("write entry");
        }
        writer.finish().expect("finish bundle");
        out
    }

    /// Write a generator script into the storage dir.
    pub fn make_script(&self, name: &str, body: &str) -> PathBuf {
        let out = self.sources.join(name);
        fs::write(&out, body).expect("write script");
        out
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

fn git_diff_cached(dir: &Path) -> String {
    let output = Command::new("git")
        .args(["diff", "--cached", "--binary"])
        .current_dir(dir)
        .output()
        .expect("spawn git diff");
    assert!(output.status.success(), "git diff --cached failed");
    String::from_utf8_lossy(&output.stdout).to_string()
}
