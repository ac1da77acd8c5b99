//! Env: the local index and the registry of projects on this machine.

use futures::{stream, StreamExt};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::status::StatusStats;
use crate::dataset::git::{GitRepo, RemoteStatus};
use crate::dataset::ProjectPaths;
use crate::environment::registry::RegisteredRepo;
use crate::environment::Environment;
use crate::error::{ColrevError, Result};
use crate::local_index::IndexSummary;

const STATUS_CONCURRENCY: usize = 50;

/// Re-indexes every registered project. Registry entries whose directory
/// is gone are dropped first.
pub fn index(environment: &Environment) -> Result<IndexSummary> {
    let mut registry = environment.registry()?;
    for removed in registry.prune_missing()? {
        warn!("{} no longer exists: removed from the registry", removed.repo_source_path.display());
    }
    let summary = environment.local_index().index_repositories(&registry);
    info!(
        "local index: {} inserted, {} amended, {} skipped",
        summary.inserted, summary.amended, summary.skipped
    );
    Ok(summary)
}

pub fn register(environment: &Environment, path: &Path) -> Result<PathBuf> {
    let path = std::fs::canonicalize(path)?;
    if !ProjectPaths::new(&path).settings_file().is_file() {
        return Err(ColrevError::RepoSetup(format!(
            "{} is not a review project",
            path.display()
        )));
    }
    let url = GitRepo::open(&path)?.remote_url();
    environment.register_repo(&path, url)?;
    Ok(path)
}

/// State of one registered project.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoStatus {
    pub name: String,
    pub path: PathBuf,
    pub progress: Option<f64>,
    pub dirty: bool,
    pub remote: Option<RemoteStatus>,
    pub error: Option<String>,
}

fn repo_status(repo: RegisteredRepo) -> RepoStatus {
    let mut status = RepoStatus {
        name: repo.repo_name,
        path: repo.repo_source_path,
        progress: None,
        dirty: false,
        remote: None,
        error: None,
    };
    let paths = ProjectPaths::new(&status.path);
    match StatusStats::load(&paths.status_file()) {
        Ok(stats) => status.progress = stats.map(|s| s.progress()),
        Err(e) => status.error = Some(e.to_string()),
    }
    match GitRepo::open(&status.path) {
        Ok(git) => {
            status.dirty = git.is_dirty().unwrap_or(false);
            status.remote = git.remote_status().ok().flatten();
        }
        Err(e) => status.error = Some(e.to_string()),
    }
    status
}

/// Collects the status of every registered project; the git calls run on
/// the blocking pool.
pub async fn status(environment: &Environment) -> Result<Vec<RepoStatus>> {
    let registry = environment.registry()?;
    let mut statuses: Vec<RepoStatus> = stream::iter(registry.repos)
        .map(|repo| async move {
            let fallback = (repo.repo_name.clone(), repo.repo_source_path.clone());
            tokio::task::spawn_blocking(move || repo_status(repo))
                .await
                .unwrap_or_else(|e| RepoStatus {
                    name: fallback.0,
                    path: fallback.1,
                    progress: None,
                    dirty: false,
                    remote: None,
                    error: Some(e.to_string()),
                })
        })
        .buffer_unordered(STATUS_CONCURRENCY)
        .collect()
        .await;
    statuses.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::tests::processed_project;
    use std::fs;

    #[tokio::test]
    async fn register_index_and_report() {
        let (dir, manager) = processed_project().await;
        let env = manager.environment();
        let root = register(env, manager.paths().root()).unwrap();
        assert!(register(env, manager.paths().root()).is_err());
        assert!(register(env, dir.path()).is_err());

        let gone = dir.path().join("gone");
        fs::create_dir_all(&gone).unwrap();
        env.register_repo(&gone, None).unwrap();
        fs::remove_dir(&gone).unwrap();

        let summary = index(env).unwrap();
        assert_eq!(summary.inserted, 2);
        assert_eq!(env.registry().unwrap().repos.len(), 1);
        assert_eq!(env.local_index().count().unwrap(), 2);

        let statuses = status(env).await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].path, root);
        assert!(statuses[0].progress.is_some());
        assert!(!statuses[0].dirty);
        assert_eq!(statuses[0].remote, None);
    }
}
