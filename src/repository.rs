//! Repository acquisition: produce the [`FileSet`] the indexer consumes.
//!
//! Workflow:
//! 1. A local directory URL is scanned in place. Anything else is cloned
//!    into `cache_dir/<hash of url>` (shallow if configured), or fetched and
//!    hard-reset when a clone already exists.
//! 2. Walk the checkout, skipping excluded directories, files without an
//!    indexable extension, and files over `max_file_bytes`.
//! 3. Read last-change revision data per file from `git log`.
//! 4. Build a browsable GitHub/GitLab URL as each file's locator.
//!
//! Everything here blocks on the filesystem and the `git` CLI; async
//! callers should go through `spawn_blocking`.

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use repo_qa_core::models::{FileSet, Revision, SourceDocument};

use crate::config::RepositoryConfig;

/// Fetch or update the configured repository and read its files.
pub fn acquire_repository(repo: &RepositoryConfig) -> Result<FileSet> {
    let url = repo
        .url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("repository.url is not configured"))?;

    let local = Path::new(url);
    if local.is_dir() {
        info!(path = %local.display(), "scanning local repository");
        return scan_checkout(local, repo);
    }

    let checkout = repo.cache_dir.join(short_hash(url));
    if checkout.join(".git").exists() {
        info!(url, branch = %repo.branch, "updating cached clone");
        git_pull(&checkout, &repo.branch)?;
    } else {
        info!(url, branch = %repo.branch, shallow = repo.shallow, "cloning repository");
        git_clone(url, &repo.branch, repo.shallow, &checkout)?;
    }
    scan_checkout(&checkout, repo)
}

/// Walk `root` and read every indexable file.
pub fn scan_checkout(root: &Path, repo: &RepositoryConfig) -> Result<FileSet> {
    let include_set = build_globset(
        &repo
            .include_extensions
            .iter()
            .map(|ext| format!("**/*.{}", ext.trim_start_matches('.')))
            .collect::<Vec<_>>(),
    )?;
    let exclude_set = build_globset(
        &repo
            .exclude_dirs
            .iter()
            .flat_map(|d| [format!("{d}/**"), format!("**/{d}/**")])
            .collect::<Vec<_>>(),
    )?;
    let is_git = root.join(".git").exists();
    let url = repo.url.clone().unwrap_or_default();

    let mut files = FileSet::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > repo.max_file_bytes {
            debug!(path = %rel_str, size, "skipping oversized file");
            continue;
        }

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %rel_str, error = %e, "skipping unreadable file");
                continue;
            }
        };
        let content = String::from_utf8_lossy(&bytes).into_owned();

        let locator = build_web_url(&url, &repo.branch, &rel_str, root);
        let mut doc = SourceDocument::new(rel_str, content, locator);
        if is_git {
            if let Some(revision) = git_file_revision(root, relative) {
                doc = doc.with_revision(revision);
            }
        }
        files.insert(doc);
    }

    info!(files = files.len(), root = %root.display(), "repository scanned");
    Ok(files)
}

fn git_clone(url: &str, branch: &str, shallow: bool, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create cache directory: {}", parent.display()))?;
    }

    let mut cmd = Command::new("git");
    cmd.args(["clone", "--branch", branch, "--single-branch"]);
    if shallow {
        cmd.args(["--depth", "1"]);
    }
    cmd.arg(url);
    cmd.arg(dest);

    let output = cmd
        .output()
        .context("Failed to execute 'git clone'. Is git installed?")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git clone failed: {}", stderr.trim());
    }
    Ok(())
}

fn git_pull(repo_dir: &Path, branch: &str) -> Result<()> {
    run_git(repo_dir, &["fetch", "origin", branch]).context("git fetch failed")?;
    let remote_ref = format!("origin/{}", branch);
    run_git(repo_dir, &["reset", "--hard", &remote_ref]).context("git reset failed")?;
    Ok(())
}

fn run_git(repo_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .with_context(|| format!("Failed to execute 'git {}'", args.join(" ")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{}", stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Last commit time, author, hash and subject touching `file`.
fn git_file_revision(repo_dir: &Path, file: &Path) -> Option<Revision> {
    let file = file.to_string_lossy();
    let out = run_git(
        repo_dir,
        &["log", "-1", "--format=%ct%x1f%an%x1f%H%x1f%s", "--", &file],
    )
    .ok()?;
    parse_revision(out.trim())
}

fn parse_revision(line: &str) -> Option<Revision> {
    if line.is_empty() {
        return None;
    }
    let mut fields = line.splitn(4, '\u{1f}');
    let non_empty = |s: Option<&str>| s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    let ts = fields.next().and_then(|s| s.trim().parse::<i64>().ok());
    Some(Revision {
        last_modified: ts.and_then(|t| Utc.timestamp_opt(t, 0).single()),
        author: non_empty(fields.next()),
        commit: non_empty(fields.next()),
        message: non_empty(fields.next()),
    })
}

/// Browsable URL for `relative_path`; `file://` for local checkouts.
fn build_web_url(repo_url: &str, branch: &str, relative_path: &str, root: &Path) -> String {
    if let Some(rest) = repo_url.strip_prefix("git@github.com:") {
        let repo = rest.trim_end_matches(".git");
        return format!("https://github.com/{}/blob/{}/{}", repo, branch, relative_path);
    }
    if let Some(rest) = repo_url.strip_prefix("git@gitlab.com:") {
        let repo = rest.trim_end_matches(".git");
        return format!("https://gitlab.com/{}/-/blob/{}/{}", repo, branch, relative_path);
    }
    if repo_url.starts_with("https://") || repo_url.starts_with("http://") {
        let base = repo_url.trim_end_matches('/').trim_end_matches(".git");
        if base.contains("gitlab") {
            return format!("{}/-/blob/{}/{}", base, branch, relative_path);
        }
        return format!("{}/blob/{}/{}", base, branch, relative_path);
    }
    let abs: PathBuf = root
        .canonicalize()
        .unwrap_or_else(|_| root.to_path_buf())
        .join(relative_path);
    format!("file://{}", abs.display())
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
