//! Git integration through the `git` executable.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

const INDEX_LOCK_POLL: Duration = Duration::from_millis(500);
const INDEX_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum GitError {
    #[error("failed to run git: {0}")]
    Io(#[from] std::io::Error),
    #[error("git {args} failed: {stderr}")]
    Command { args: String, stderr: String },
    #[error("another git process holds {0} (waited {1:?})")]
    IndexLocked(PathBuf, Duration),
    #[error("{0} is not a git repository")]
    NotARepository(PathBuf),
}

/// One line of `git status --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedPath {
    pub status: String,
    pub path: String,
}

impl ChangedPath {
    pub fn is_unmerged(&self) -> bool {
        matches!(self.status.as_str(), "DD" | "AU" | "UD" | "UA" | "DU" | "AA" | "UU")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub date: String,
    pub message: String,
}

/// Commits ahead of and behind the upstream branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteStatus {
    pub ahead: usize,
    pub behind: usize,
}

#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
}

impl GitRepo {
    /// Opens an existing repository.
    pub fn open(path: &Path) -> Result<Self, GitError> {
        if !path.join(".git").exists() {
            return Err(GitError::NotARepository(path.to_path_buf()));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn init(path: &Path) -> Result<Self, GitError> {
        std::fs::create_dir_all(path)?;
        let repo = Self {
            path: path.to_path_buf(),
        };
        repo.run(&["init", "--quiet"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run(&self, args: &[&str]) -> Result<String, GitError> {
        debug!("git {}", args.join(" "));
        let output = Command::new("git").arg("-C").arg(&self.path).args(args).output()?;
        if !output.status.success() {
            return Err(GitError::Command {
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub fn config(&self, key: &str, value: &str) -> Result<(), GitError> {
        self.run(&["config", key, value]).map(|_| ())
    }

    pub fn config_get(&self, key: &str) -> Option<String> {
        self.run(&["config", "--get", key])
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Waits until no other git process holds `.git/index.lock`.
    pub fn wait_for_index_lock(&self) -> Result<(), GitError> {
        self.wait_for_index_lock_with(INDEX_LOCK_TIMEOUT)
    }

    pub fn wait_for_index_lock_with(&self, timeout: Duration) -> Result<(), GitError> {
        let lock = self.path.join(".git").join("index.lock");
        let started = Instant::now();
        let mut announced = false;
        while lock.exists() {
            if started.elapsed() >= timeout {
                return Err(GitError::IndexLocked(lock, timeout));
            }
            if !announced {
                info!("waiting for {} to be released", lock.display());
                announced = true;
            }
            std::thread::sleep(INDEX_LOCK_POLL);
        }
        Ok(())
    }

    pub fn changed_paths(&self) -> Result<Vec<ChangedPath>, GitError> {
        let out = self.run(&["status", "--porcelain", "--untracked-files=all"])?;
        Ok(out
            .lines()
            .filter(|line| line.len() > 3)
            .map(|line| ChangedPath {
                status: line[..2].to_string(),
                path: line[3..]
                    .rsplit(" -> ")
                    .next()
                    .unwrap_or_default()
                    .trim_matches('"')
                    .to_string(),
            })
            .collect())
    }

    pub fn unmerged_paths(&self) -> Result<Vec<String>, GitError> {
        Ok(self
            .changed_paths()?
            .into_iter()
            .filter(ChangedPath::is_unmerged)
            .map(|c| c.path)
            .collect())
    }

    pub fn is_dirty(&self) -> Result<bool, GitError> {
        Ok(!self.changed_paths()?.is_empty())
    }

    pub fn add(&self, paths: &[&Path]) -> Result<(), GitError> {
        if paths.is_empty() {
            return Ok(());
        }
        self.wait_for_index_lock()?;
        let mut args = vec!["add".to_string(), "--".to_string()];
        args.extend(paths.iter().map(|p| p.to_string_lossy().into_owned()));
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&refs).map(|_| ())
    }

    pub fn add_all(&self) -> Result<(), GitError> {
        self.wait_for_index_lock()?;
        self.run(&["add", "--all"]).map(|_| ())
    }

    pub fn has_staged_changes(&self) -> Result<bool, GitError> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!out.trim().is_empty())
    }

    /// Commits the index. Returns `None` when nothing was staged.
    pub fn commit(&self, message: &str) -> Result<Option<String>, GitError> {
        if !self.has_staged_changes()? {
            return Ok(None);
        }
        self.wait_for_index_lock()?;
        self.run(&["commit", "--quiet", "--no-verify", "-m", message])?;
        self.head_sha().map(Some)
    }

    pub fn head_sha(&self) -> Result<String, GitError> {
        Ok(self.run(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    pub fn has_commits(&self) -> bool {
        self.run(&["rev-parse", "--verify", "--quiet", "HEAD"]).is_ok()
    }

    /// Commits that touched `path`, newest first.
    pub fn log_for_path(&self, path: &str) -> Result<Vec<CommitInfo>, GitError> {
        if !self.has_commits() {
            return Ok(Vec::new());
        }
        let out = self.run(&["log", "--format=%H%x1f%cI%x1f%s", "--", path])?;
        Ok(out
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(3, '\u{1f}');
                Some(CommitInfo {
                    sha: parts.next()?.to_string(),
                    date: parts.next()?.to_string(),
                    message: parts.next().unwrap_or("").to_string(),
                })
            })
            .collect())
    }

    /// Content of `path` at `revision`, or `None` if the file did not exist there.
    pub fn show_file(&self, revision: &str, path: &str) -> Result<Option<String>, GitError> {
        match self.run(&["show", &format!("{revision}:{path}")]) {
            Ok(content) => Ok(Some(content)),
            Err(GitError::Command { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Paths changed by a commit relative to its parent.
    pub fn changed_in_commit(&self, revision: &str) -> Result<Vec<String>, GitError> {
        let out = self.run(&["show", "--name-only", "--format=", revision])?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(String::from).collect())
    }

    pub fn has_remote(&self) -> bool {
        self.run(&["remote"]).is_ok_and(|out| !out.trim().is_empty())
    }

    pub fn remote_url(&self) -> Option<String> {
        self.config_get("remote.origin.url")
    }

    pub fn fetch(&self) -> Result<(), GitError> {
        self.run(&["fetch", "--quiet"]).map(|_| ())
    }

    /// Ahead/behind counts against the upstream branch (without fetching).
    pub fn remote_status(&self) -> Result<Option<RemoteStatus>, GitError> {
        if !self.has_remote() {
            return Ok(None);
        }
        let Ok(out) = self.run(&["rev-list", "--left-right", "--count", "HEAD...@{upstream}"]) else {
            return Ok(None);
        };
        let mut counts = out.split_whitespace().filter_map(|n| n.parse::<usize>().ok());
        Ok(Some(RemoteStatus {
            ahead: counts.next().unwrap_or(0),
            behind: counts.next().unwrap_or(0),
        }))
    }

    pub fn pull(&self) -> Result<(), GitError> {
        self.wait_for_index_lock()?;
        self.run(&["pull", "--quiet"]).map(|_| ())
    }

    pub fn push(&self) -> Result<(), GitError> {
        self.run(&["push", "--quiet"]).map(|_| ())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::tempdir;

    pub(crate) fn init_test_repo(path: &Path) -> GitRepo {
        let repo = GitRepo::init(path).unwrap();
        repo.config("user.name", "Tester").unwrap();
        repo.config("user.email", "tester@example.org").unwrap();
        repo.config("commit.gpgsign", "false").unwrap();
        repo
    }

    #[test]
    fn commit_and_history() {
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path());
        assert!(repo.log_for_path("a.txt").unwrap().is_empty());

        std::fs::write(dir.path().join("a.txt"), "one").unwrap();
        assert!(repo.is_dirty().unwrap());
        repo.add(&[Path::new("a.txt")]).unwrap();
        let first = repo.commit("first").unwrap().unwrap();

        std::fs::write(dir.path().join("a.txt"), "two").unwrap();
        repo.add_all().unwrap();
        repo.commit("second").unwrap();
        assert!(repo.commit("nothing").unwrap().is_none());

        let log = repo.log_for_path("a.txt").unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].message, "second");
        assert_eq!(repo.show_file(&first, "a.txt").unwrap().as_deref(), Some("one"));
        assert_eq!(repo.show_file(&first, "missing.txt").unwrap(), None);
        assert!(!repo.is_dirty().unwrap());
    }

    #[test]
    fn stale_index_lock_times_out() {
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path());
        std::fs::write(dir.path().join(".git/index.lock"), "").unwrap();
        let err = repo
            .wait_for_index_lock_with(Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, GitError::IndexLocked(..)));
    }

    #[test]
    fn open_requires_repository() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            GitRepo::open(dir.path()),
            Err(GitError::NotARepository(_))
        ));
    }
}
