//! Local registry of projects (`registry.yaml`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("cannot access registry: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid registry: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{0} is already registered")]
    AlreadyRegistered(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredRepo {
    pub repo_name: String,
    pub repo_source_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_source_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(skip)]
    path: PathBuf,
    #[serde(default)]
    pub repos: Vec<RegisteredRepo>,
}

impl Registry {
    /// Loads the registry, or starts an empty one if the file does not exist.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let mut registry = if path.exists() {
            let content = fs::read_to_string(path)?;
            if content.trim().is_empty() {
                Registry::default()
            } else {
                serde_yaml::from_str(&content)?
            }
        } else {
            Registry::default()
        };
        registry.path = path.to_path_buf();
        Ok(registry)
    }

    pub fn save(&self) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn get(&self, path: &Path) -> Option<&RegisteredRepo> {
        self.repos.iter().find(|r| r.repo_source_path == path)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&RegisteredRepo> {
        self.repos.iter().find(|r| r.repo_name == name)
    }

    pub fn register(&mut self, path: &Path, url: Option<String>) -> Result<(), RegistryError> {
        if self.get(path).is_some() {
            return Err(RegistryError::AlreadyRegistered(path.to_path_buf()));
        }
        let repo_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        info!("registering {repo_name} ({})", path.display());
        self.repos.push(RegisteredRepo {
            repo_name,
            repo_source_path: path.to_path_buf(),
            repo_source_url: url,
        });
        self.save()
    }

    /// Drops entries whose directory no longer exists.
    pub fn prune_missing(&mut self) -> Result<Vec<RegisteredRepo>, RegistryError> {
        let (kept, removed): (Vec<_>, Vec<_>) = std::mem::take(&mut self.repos)
            .into_iter()
            .partition(|r| r.repo_source_path.exists());
        self.repos = kept;
        if !removed.is_empty() {
            self.save()?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn register_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.yaml");
        let project = dir.path().join("review-a");
        fs::create_dir_all(&project).unwrap();

        let mut registry = Registry::load(&path).unwrap();
        assert!(registry.repos.is_empty());
        registry
            .register(&project, Some("https://example.org/review-a.git".into()))
            .unwrap();
        assert!(matches!(
            registry.register(&project, None),
            Err(RegistryError::AlreadyRegistered(_))
        ));

        let reloaded = Registry::load(&path).unwrap();
        assert_eq!(reloaded.repos.len(), 1);
        assert_eq!(reloaded.repos[0].repo_name, "review-a");
        assert!(reloaded.find_by_name("review-a").is_some());
    }

    #[test]
    fn prune_missing_directories() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load(&dir.path().join("registry.yaml")).unwrap();
        registry.register(&dir.path().join("gone"), None).unwrap();
        let removed = registry.prune_missing().unwrap();
        assert_eq!(removed.len(), 1);
        assert!(registry.repos.is_empty());
    }
}
