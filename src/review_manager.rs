//! The project a command works on.

use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::dataset::git::GitRepo;
use crate::dataset::{Dataset, ProjectPaths};
use crate::endpoints::PackageManager;
use crate::environment::Environment;
use crate::error::{ColrevError, Result};
use crate::report_log::ReportLog;
use crate::settings::Settings;

pub struct ReviewManager {
    paths: ProjectPaths,
    settings: Settings,
    dataset: Dataset,
    environment: Arc<Environment>,
    report_log: ReportLog,
    force_mode: bool,
    verbose_mode: bool,
    command_line: String,
}

impl ReviewManager {
    /// Opens the project at `path` after checking that it is a git repository
    /// with a settings file.
    pub fn open(path: &Path, environment: Arc<Environment>) -> Result<Self> {
        let paths = ProjectPaths::new(path);
        if !path.join(".git").exists() {
            return Err(ColrevError::RepoSetup(format!(
                "{} is not a git repository (run colrev init)",
                path.display()
            )));
        }
        let settings_file = paths.settings_file();
        if !settings_file.is_file() {
            return Err(ColrevError::RepoSetup(format!(
                "{} is missing (run colrev init)",
                ProjectPaths::SETTINGS_FILE
            )));
        }
        let settings = Settings::load(&settings_file)?;
        let dataset = Dataset::open(path)?;
        debug!("opened {} ({})", path.display(), settings.project.review_type);
        Ok(Self {
            report_log: ReportLog::new(&paths.report_log()),
            paths,
            settings,
            dataset,
            environment,
            force_mode: false,
            verbose_mode: false,
            command_line: String::from("colrev"),
        })
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force_mode = force;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose_mode = verbose;
        self
    }

    /// Arguments recorded in commit reports.
    pub fn with_command_line<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        if !args.is_empty() {
            self.command_line = args.join(" ");
        }
        self
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn save_settings(&self) -> Result<()> {
        self.settings.save(&self.paths.settings_file())?;
        Ok(())
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn git(&self) -> &GitRepo {
        self.dataset.git()
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    pub fn report_log(&self) -> &ReportLog {
        &self.report_log
    }

    pub fn force_mode(&self) -> bool {
        self.force_mode
    }

    pub fn verbose_mode(&self) -> bool {
        self.verbose_mode
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn package_manager(&self) -> PackageManager {
        PackageManager::new(Arc::clone(&self.environment), self.paths.clone(), self.settings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::git::tests::init_test_repo;
    use crate::error::ErrorKind;
    use crate::settings::review_types;
    use tempfile::tempdir;

    #[test]
    fn setup_check() {
        let dir = tempdir().unwrap();
        let env = Environment::open_at(&dir.path().join("home")).unwrap();
        let project = dir.path().join("project");
        std::fs::create_dir_all(&project).unwrap();

        let err = ReviewManager::open(&project, Arc::clone(&env)).err().unwrap();
        assert!(matches!(err, ColrevError::RepoSetup(_)));
        assert_eq!(err.kind(), ErrorKind::Fatal);

        init_test_repo(&project);
        assert!(ReviewManager::open(&project, Arc::clone(&env)).is_err());

        let settings = review_types::initialize("literature_review", "Test").unwrap();
        settings.save(&ProjectPaths::new(&project).settings_file()).unwrap();
        let manager = ReviewManager::open(&project, env)
            .unwrap()
            .with_force(true)
            .with_command_line(["colrev", "prep", "--force"]);
        assert!(manager.force_mode());
        assert_eq!(manager.command_line(), "colrev prep --force");
        assert_eq!(manager.settings().project.title, "Test");
    }
}
