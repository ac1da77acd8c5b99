//! Init: a new review project in an empty directory.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::status::StatusStats;
use crate::dataset::git::GitRepo;
use crate::dataset::ProjectPaths;
use crate::environment::Environment;
use crate::error::{ColrevError, Result};
use crate::record::Records;
use crate::review_manager::ReviewManager;
use crate::settings::{review_types, COLREV_VERSION};

pub const GITIGNORE: &str = "\
.corrections/
data/pdfs/
data/.tei/
*.bib.tmp
";

const PRE_COMMIT_HOOK: &str = "#!/bin/sh
colrev hooks check || exit 1
colrev hooks format || exit 1
colrev hooks share
";

const COMMIT_MSG_HOOK: &str = "#!/bin/sh
colrev hooks report \"$1\"
";

fn check_empty(root: &Path) -> Result<()> {
    if root.join(ProjectPaths::SETTINGS_FILE).exists() {
        return Err(ColrevError::RepoSetup(format!(
            "{} is already a review project",
            root.display()
        )));
    }
    let Ok(entries) = fs::read_dir(root) else {
        return Ok(());
    };
    let visible: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.'))
        .collect();
    if !visible.is_empty() {
        return Err(ColrevError::RepoSetup(format!(
            "{} is not empty ({})",
            root.display(),
            visible.join(", ")
        )));
    }
    Ok(())
}

fn install_hooks(git: &GitRepo) -> Result<()> {
    let hooks = git.path().join(".git").join("hooks");
    fs::create_dir_all(&hooks)?;
    for (name, content) in [("pre-commit", PRE_COMMIT_HOOK), ("commit-msg", COMMIT_MSG_HOOK)] {
        let path = hooks.join(name);
        fs::write(&path, content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        }
    }
    Ok(())
}

/// Sets up the project at `root` and registers it in the environment.
/// The title defaults to the directory name.
pub fn init(
    root: &Path,
    review_type: &str,
    title: Option<&str>,
    environment: Arc<Environment>,
) -> Result<ReviewManager> {
    fs::create_dir_all(root)?;
    let root = fs::canonicalize(root)?;
    check_empty(&root)?;
    let title = title.map(str::to_string).unwrap_or_else(|| {
        root.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "review".to_string())
    });
    let settings = review_types::initialize(review_type, &title)?;

    let paths = ProjectPaths::new(&root);
    let git = if root.join(".git").is_dir() {
        GitRepo::open(&root)?
    } else {
        GitRepo::init(&root)?
    };
    install_hooks(&git)?;
    fs::create_dir_all(paths.search_dir())?;
    fs::write(paths.search_dir().join(".gitkeep"), "")?;
    fs::write(paths.join(ProjectPaths::GITIGNORE), GITIGNORE)?;
    settings.save(&paths.settings_file())?;
    StatusStats::compute(&Records::new()).save(&paths.status_file())?;

    git.add_all()?;
    let message = format!(
        "Init: {title}\n\nReport\n review type: {review_type}\n\nSoftware\n colrev {COLREV_VERSION}\n"
    );
    git.commit(&message)?;
    info!("initialized {review_type} project at {}", root.display());

    if let Err(e) = environment.register_repo(&root, git.remote_url()) {
        warn!("could not register {}: {e}", root.display());
    }
    ReviewManager::open(&root, environment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::git::tests::init_test_repo;
    use tempfile::tempdir;

    #[test]
    fn creates_commits_and_registers() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("my-review");
        fs::create_dir_all(&root).unwrap();
        init_test_repo(&root);
        let env = Environment::open_at(&dir.path().join("home")).unwrap();

        let manager = init(&root, "literature_review", None, Arc::clone(&env)).unwrap();
        assert_eq!(manager.settings().project.title, "my-review");
        assert!(manager.git().has_commits());
        assert!(!manager.git().is_dirty().unwrap());
        assert!(root.join(".git/hooks/pre-commit").is_file());
        assert_eq!(fs::read_to_string(root.join(".gitignore")).unwrap(), GITIGNORE);

        let registry = env.registry().unwrap();
        assert_eq!(registry.repos.len(), 1);
        assert_eq!(registry.repos[0].repo_name, "my-review");

        assert!(matches!(
            init(&root, "literature_review", None, env),
            Err(ColrevError::RepoSetup(_))
        ));
    }

    #[test]
    fn refuses_non_empty_directories_and_unknown_types() {
        let dir = tempdir().unwrap();
        let env = Environment::open_at(&dir.path().join("home")).unwrap();
        let root = dir.path().join("project");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("notes.txt"), "x").unwrap();
        assert!(matches!(
            init(&root, "literature_review", Some("T"), Arc::clone(&env)),
            Err(ColrevError::RepoSetup(_))
        ));

        let empty = dir.path().join("empty");
        assert!(init(&empty, "meta_analysis", Some("T"), env).is_err());
    }
}
