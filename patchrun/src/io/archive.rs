//! Evidence bundles.
//!
//! Failure bundles snapshot the workspace worktree so a failed run can be
//! inspected after the workspace is destroyed. Success bundles snapshot the
//! tracked files of the live repository at the promoted commit. Both are
//! deterministic: entries are added in sorted path order with zeroed
//! timestamps, so re-archiving identical trees yields identical archives.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::io::git::Git;

fn tar_builder(out: &Path) -> Result<tar::Builder<GzEncoder<BufWriter<File>>>> {
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create archive dir {}", parent.display()))?;
    }
    let file = File::create(out).with_context(|| format!("create {}", out.display()))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    Ok(tar::Builder::new(encoder))
}

fn append_file(
    builder: &mut tar::Builder<GzEncoder<BufWriter<File>>>,
    disk_path: &Path,
    archive_path: &Path,
) -> Result<()> {
    let bytes =
        fs::read(disk_path).with_context(|| format!("read {}", disk_path.display()))?;
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder
        .append_data(&mut header, archive_path, bytes.as_slice())
        .with_context(|| format!("append {}", archive_path.display()))?;
    Ok(())
}

fn finish(builder: tar::Builder<GzEncoder<BufWriter<File>>>) -> Result<()> {
    let mut writer = builder
        .into_inner()
        .context("finish archive")?
        .finish()
        .context("flush gzip")?;
    writer.flush().context("flush archive")?;
    Ok(())
}

fn is_excluded(rel: &Path, excludes: &[String]) -> bool {
    rel.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        excludes.iter().any(|e| e == name.as_ref())
    })
}

/// Archive the workspace worktree for post-mortem inspection.
///
/// Paths containing an excluded component (`.git`, build output caches) are
/// skipped entirely.
#[instrument(skip(excludes), fields(out = %out.display()))]
pub fn failure_bundle(workspace_root: &Path, excludes: &[String], out: &Path) -> Result<PathBuf> {
    let mut builder = tar_builder(out)?;

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(workspace_root).follow_links(false) {
        let entry = entry.context("walk workspace")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(workspace_root)
            .context("relativize workspace path")?;
        if is_excluded(rel, excludes) {
            continue;
        }
        files.push(rel.to_path_buf());
    }
    files.sort();

    for rel in &files {
        append_file(&mut builder, &workspace_root.join(rel), rel)?;
    }
    finish(builder)?;
    debug!(files = files.len(), "failure bundle written");
    Ok(out.to_path_buf())
}

/// Archive the tracked files of the live repository at its current state.
///
/// `git ls-files` also lists symlinks and submodule gitlinks; the bundle
/// carries regular file content only, so those entries are skipped.
#[instrument(skip(live), fields(out = %out.display()))]
pub fn success_bundle(live: &Git, out: &Path) -> Result<PathBuf> {
    let mut builder = tar_builder(out)?;
    let files = live.ls_files()?;
    let mut written = 0usize;
    for rel in &files {
        let disk = live.workdir().join(rel);
        let regular = fs::symlink_metadata(&disk).is_ok_and(|m| m.is_file());
        if !regular {
            debug!(path = %rel, "skipping non-regular entry");
            continue;
        }
        append_file(&mut builder, &disk, Path::new(rel))?;
        written += 1;
    }
    finish(builder)?;
    debug!(files = written, "success bundle written");
    Ok(out.to_path_buf())
}

/// Expand the success bundle name template.
pub fn success_bundle_name(template: &str, change_id: &str, commit: &str) -> String {
    template
        .replace("{change_id}", change_id)
        .replace("{commit}", commit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    fn entry_names(path: &Path) -> Vec<String> {
        let file = File::open(path).expect("open archive");
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive
            .entries()
            .expect("entries")
            .map(|e| {
                e.expect("entry")
                    .path()
                    .expect("path")
                    .to_string_lossy()
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn failure_bundle_skips_excluded_components() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = temp.path().join("ws");
        fs::create_dir_all(ws.join(".git")).expect("mkdir");
        fs::create_dir_all(ws.join("src")).expect("mkdir");
        fs::write(ws.join(".git/HEAD"), "ref").expect("write");
        fs::write(ws.join("src/main.rs"), "fn main() {}").expect("write");
        fs::write(ws.join("README.md"), "hi").expect("write");

        let out = temp.path().join("fail.tar.gz");
        failure_bundle(&ws, &[".git".to_string()], &out).expect("bundle");

        let names = entry_names(&out);
        assert_eq!(names, vec!["README.md", "src/main.rs"]);
    }

    #[test]
    fn failure_bundle_is_deterministic() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = temp.path().join("ws");
        fs::create_dir_all(ws.join("b")).expect("mkdir");
        fs::write(ws.join("b/x.txt"), "x").expect("write");
        fs::write(ws.join("a.txt"), "a").expect("write");

        let first = temp.path().join("one.tar.gz");
        let second = temp.path().join("two.tar.gz");
        failure_bundle(&ws, &[], &first).expect("bundle");
        failure_bundle(&ws, &[], &second).expect("bundle");

        assert_eq!(
            fs::read(&first).expect("read"),
            fs::read(&second).expect("read")
        );
    }

    #[cfg(unix)]
    #[test]
    fn success_bundle_skips_non_regular_entries() {
        use crate::test_support::TestRepo;

        let repo = TestRepo::new();
        let live = repo.live_root();
        fs::create_dir_all(live.join("d")).expect("mkdir");
        fs::write(live.join("d/f.txt"), "f").expect("write");
        // A tracked symlink resolving to a directory must not break the
        // bundle.
        std::os::unix::fs::symlink("d", live.join("link")).expect("symlink");
        repo.commit_live("add dir and symlink");

        let temp = tempfile::tempdir().expect("tempdir");
        let out = temp.path().join("ok.tar.gz");
        success_bundle(&Git::new(live), &out).expect("bundle");

        let names = entry_names(&out);
        assert!(names.contains(&"d/f.txt".to_string()));
        assert!(!names.iter().any(|n| n == "link"), "names: {names:?}");
    }

    #[test]
    fn expands_name_template() {
        assert_eq!(
            success_bundle_name("{change_id}-{commit}.tar.gz", "chg-1", "abc123"),
            "chg-1-abc123.tar.gz"
        );
    }
}
