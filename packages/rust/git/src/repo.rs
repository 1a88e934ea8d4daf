//! Thin wrapper over the `git` executable for one working tree.

use std::path::{Path, PathBuf};

use rtools_shared::process::{CommandOutput, run_captured};
use rtools_shared::{Result, RtoolsError};

/// A git working tree rooted at `root`.
#[derive(Debug, Clone)]
pub struct Repo {
    root: PathBuf,
}

impl Repo {
    /// Open `root`, failing unless it is inside a git work tree.
    pub fn open(root: &Path) -> Result<Self> {
        let repo = Self {
            root: root.to_path_buf(),
        };
        let out = repo.git(["rev-parse", "--is-inside-work-tree"]).map_err(|e| {
            RtoolsError::validation(format!("not a git repository: {} ({e})", root.display()))
        })?;
        if !out.success() || !out.output.contains("true") {
            return Err(RtoolsError::validation(format!(
                "not a git repository: {}",
                root.display()
            )));
        }
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run `git <args>` in the work tree.
    pub fn git<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        run_captured("git", args, &self.root)
    }

    /// Output of `git <args>`, whatever the exit code.
    pub fn text<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        self.git(args).map(|o| o.output)
    }

    /// Current branch name, or empty when it cannot be determined.
    /// Branch HEAD points at, including an unborn one. `HEAD` when
    /// detached, empty outside a repository.
    pub fn current_branch(&self) -> String {
        if let Ok(out) = self.git(["symbolic-ref", "--short", "-q", "HEAD"]) {
            if out.success() && !out.output.trim().is_empty() {
                return out.output.trim().to_string();
            }
        }
        match self.git(["rev-parse", "--abbrev-ref", "HEAD"]) {
            Ok(out) if out.success() => out.output.trim().to_string(),
            _ => String::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(
            self.git(["status", "--porcelain"]),
            Ok(out) if out.success() && out.output.trim().is_empty()
        )
    }

    pub fn branches(&self) -> Result<Vec<String>> {
        self.lines(["branch", "--format", "%(refname:short)"])
    }

    pub fn remotes(&self) -> Result<Vec<String>> {
        self.lines(["remote"])
    }

    /// URL of `remote`, if configured.
    pub fn remote_url(&self, remote: &str) -> Option<String> {
        let out = self.git(["remote", "get-url", remote]).ok()?;
        let url = out.output.trim();
        (out.success() && !url.is_empty()).then(|| url.to_string())
    }

    /// Files with unresolved merge conflicts.
    pub fn conflicted_files(&self) -> Result<Vec<String>> {
        self.lines(["diff", "--name-only", "--diff-filter=U"])
    }

    fn lines<const N: usize>(&self, args: [&str; N]) -> Result<Vec<String>> {
        let out = self.git(args)?;
        if !out.success() {
            return Ok(Vec::new());
        }
        Ok(out
            .output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

/// List local branches of the repo at `root`.
pub fn list_branches(root: &Path) -> Result<Vec<String>> {
    Repo::open(root)?.branches()
}

pub fn list_remotes(root: &Path) -> Result<Vec<String>> {
    Repo::open(root)?.remotes()
}

pub fn current_branch(root: &Path) -> Result<String> {
    Ok(Repo::open(root)?.current_branch())
}
