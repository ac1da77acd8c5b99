//! Per-user environment shared by every project on the machine.

pub mod registry;
pub mod services;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::cache::RequestsCache;
use crate::error::Result;
use crate::local_index::LocalIndex;
use registry::Registry;
use services::ServiceManager;

pub const COLREV_HOME_VAR: &str = "COLREV_HOME";

/// `$COLREV_HOME`, else `~/colrev`.
pub fn colrev_home() -> PathBuf {
    if let Some(home) = std::env::var_os(COLREV_HOME_VAR) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("colrev")
}

pub struct Environment {
    home: PathBuf,
    local_index: LocalIndex,
    cache: RequestsCache,
    services: ServiceManager,
}

impl Environment {
    pub fn open() -> Result<Arc<Self>> {
        Self::open_at(&colrev_home())
    }

    pub fn open_at(home: &Path) -> Result<Arc<Self>> {
        std::fs::create_dir_all(home)?;
        debug!("environment at {}", home.display());
        let local_index = LocalIndex::open(&home.join("local_index.db"), &home.join("tei"))?;
        let cache = RequestsCache::open(&home.join("requests_cache.db"), true)?;
        Ok(Arc::new(Self {
            home: home.to_path_buf(),
            local_index,
            cache,
            services: ServiceManager::new(),
        }))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn local_index(&self) -> &LocalIndex {
        &self.local_index
    }

    pub fn cache(&self) -> &RequestsCache {
        &self.cache
    }

    pub fn services(&self) -> &ServiceManager {
        &self.services
    }

    pub fn registry_path(&self) -> PathBuf {
        self.home.join("registry.yaml")
    }

    /// Reads the registry; it is small and may be changed by other processes.
    pub fn registry(&self) -> Result<Registry> {
        Ok(Registry::load(&self.registry_path())?)
    }

    pub fn register_repo(&self, path: &Path, url: Option<String>) -> Result<()> {
        let mut registry = self.registry()?;
        registry.register(path, url)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_files_under_home() {
        let dir = tempdir().unwrap();
        let env = Environment::open_at(dir.path()).unwrap();
        assert!(dir.path().join("local_index.db").exists());
        assert!(dir.path().join("requests_cache.db").exists());

        let project = dir.path().join("p");
        std::fs::create_dir_all(&project).unwrap();
        env.register_repo(&project, None).unwrap();
        assert_eq!(env.registry().unwrap().repos.len(), 1);
    }
}
