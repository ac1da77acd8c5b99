//! Distribute: hand a file over to another registered project.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::dataset::ProjectPaths;
use crate::environment::Environment;
use crate::error::{ColrevError, Result};

/// Copies `file` into the project registered as `target` (by name or path).
/// PDFs go to `data/pdfs/`, everything else to `data/search/` for the next `load`.
pub fn distribute(environment: &Environment, file: &Path, target: &str) -> Result<PathBuf> {
    if !file.is_file() {
        return Err(ColrevError::InvalidInput(format!("{} is not a file", file.display())));
    }
    let registry = environment.registry()?;
    let repo = registry
        .find_by_name(target)
        .or_else(|| registry.get(Path::new(target)))
        .ok_or_else(|| ColrevError::InvalidInput(format!("{target} is not a registered project")))?;

    let paths = ProjectPaths::new(&repo.repo_source_path);
    let is_pdf = file
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    let dir = if is_pdf { paths.pdf_dir() } else { paths.search_dir() };
    let name = file
        .file_name()
        .ok_or_else(|| ColrevError::InvalidInput(format!("{} has no file name", file.display())))?;
    let destination = dir.join(name);
    if destination.exists() {
        return Err(ColrevError::InvalidInput(format!(
            "{} already exists",
            destination.display()
        )));
    }
    fs::create_dir_all(&dir)?;
    fs::copy(file, &destination)?;
    info!("copied {} to {}", file.display(), destination.display());
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copies_into_registered_projects() {
        let dir = tempdir().unwrap();
        let env = Environment::open_at(&dir.path().join("home")).unwrap();
        let project = dir.path().join("review-b");
        fs::create_dir_all(&project).unwrap();
        env.register_repo(&project, None).unwrap();

        let results = dir.path().join("scopus.bib");
        fs::write(&results, "@article{x, title={T}}").unwrap();
        let copied = distribute(&env, &results, "review-b").unwrap();
        assert_eq!(copied, project.join("data/search/scopus.bib"));
        assert!(copied.is_file());
        assert!(distribute(&env, &results, "review-b").is_err());

        let paper = dir.path().join("paper.PDF");
        fs::write(&paper, b"%PDF-1.4").unwrap();
        let copied = distribute(&env, &paper, &project.display().to_string()).unwrap();
        assert_eq!(copied, project.join("data/pdfs/paper.PDF"));

        assert!(matches!(
            distribute(&env, &results, "unknown"),
            Err(ColrevError::InvalidInput(_))
        ));
    }
}
