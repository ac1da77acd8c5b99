//! Search: refreshing the raw search results of the configured sources.

use serde_json::Value;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{states_of, Operation, Outcome};
use crate::dataset::ProjectPaths;
use crate::error::{ColrevError, Result};
use crate::process::OperationsType;
use crate::review_manager::ReviewManager;
use crate::settings::{EndpointSettings, SearchSource, SearchType};

fn slug(query: &str) -> String {
    let slug: String = query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    slug.split('_').filter(|p| !p.is_empty()).collect::<Vec<_>>().join("_")
}

/// Adds a query-based source, stored in `data/search/<endpoint>_<query>.bib`.
pub fn add_source(review_manager: &mut ReviewManager, endpoint: &str, query: &str) -> Result<SearchSource> {
    review_manager
        .package_manager()
        .load_search_source(&EndpointSettings::new(endpoint))?;
    let short = endpoint.rsplit('.').next().unwrap_or(endpoint);
    let filename = PathBuf::from(format!("{}/{short}_{}.bib", ProjectPaths::SEARCH_DIR, slug(query)));
    if review_manager.settings().sources.iter().any(|s| s.filename == filename) {
        return Err(ColrevError::InvalidInput(format!(
            "a source for '{query}' already exists ({})",
            filename.display()
        )));
    }
    let source = SearchSource {
        endpoint: endpoint.to_string(),
        filename,
        search_type: SearchType::Db,
        search_parameters: [("query".to_string(), Value::from(query))].into_iter().collect(),
        comment: None,
    };
    review_manager.settings_mut().sources.push(source.clone());
    review_manager.settings().validate()?;
    review_manager.save_settings()?;
    info!("added source {}", source.filename.display());
    Ok(source)
}

pub struct Search<'a> {
    operation: Operation<'a>,
}

impl<'a> Search<'a> {
    pub fn new(review_manager: &'a ReviewManager) -> Result<Self> {
        Ok(Self {
            operation: Operation::new(review_manager, OperationsType::Search)?,
        })
    }

    /// Runs the sources whose filename contains `selection` (all without one).
    /// A failing source is logged and skipped.
    pub async fn run(&mut self, selection: Option<&str>) -> Result<Outcome> {
        let rm = self.operation.review_manager();
        let package_manager = rm.package_manager();
        let records = rm.dataset().load_records()?;
        let before = states_of(&records);

        let mut retrieved = 0;
        let mut changed: Vec<PathBuf> = vec![PathBuf::from(ProjectPaths::SETTINGS_FILE)];
        for source in &rm.settings().sources {
            if selection.is_some_and(|s| !source.filename.to_string_lossy().contains(s)) {
                continue;
            }
            let endpoint = package_manager.load_search_source(&EndpointSettings::new(&source.endpoint))?;
            self.operation.add_endpoint(endpoint.name());
            match endpoint.run_search(source).await {
                Ok(n) => {
                    retrieved += n;
                    if rm.paths().root().join(&source.filename).is_file() {
                        changed.push(source.filename.clone());
                    }
                }
                Err(e) => {
                    warn!("{}: {e}", source.filename.display());
                    self.operation
                        .log_failure(endpoint.name(), &source.origin_prefix(), e.to_string());
                }
            }
        }
        let summary = format!("{retrieved} records retrieved");
        self.operation.commit(&summary, &before, &records, &changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_index::IndexOptions;
    use crate::ops::load::Load;
    use crate::ops::tests::project;
    use crate::process::RecordState;
    use crate::record::{fields, Record, Records};
    use std::path::Path;

    #[test]
    fn query_slugs() {
        assert_eq!(slug("Digital Platforms & ERP"), "digital_platforms_erp");
    }

    #[tokio::test]
    async fn local_index_source_round_trip() {
        let (_dir, mut manager) = project("literature_review");
        let mut indexed = Record::new("Roe2019", "article")
            .with(fields::AUTHOR, "Roe, Ann")
            .with(fields::TITLE, "Platform ecosystems in retail")
            .with(fields::JOURNAL, "MIS Quarterly")
            .with(fields::VOLUME, "43")
            .with(fields::NUMBER, "2")
            .with(fields::YEAR, "2019");
        indexed.status = RecordState::MdProcessed;
        let records: Records = [(indexed.id.clone(), indexed)].into_iter().collect();
        manager
            .environment()
            .local_index()
            .index_records(&records, Path::new("/repos/other"), &IndexOptions::default())
            .unwrap();

        let source = add_source(&mut manager, "colrev.local_index", "platform ecosystems").unwrap();
        assert_eq!(source.filename, PathBuf::from("data/search/local_index_platform_ecosystems.bib"));
        assert!(add_source(&mut manager, "colrev.local_index", "platform ecosystems").is_err());
        assert!(add_source(&mut manager, "colrev.nonexistent", "x").is_err());

        let outcome = Search::new(&manager).unwrap().run(Some("local_index")).await.unwrap();
        assert!(outcome.commit.is_some());
        assert!(!manager.git().is_dirty().unwrap());

        Load::new(&manager).unwrap().run(false).await.unwrap();
        let records = manager.dataset().load_records().unwrap();
        assert!(records
            .values()
            .any(|r| r.origin == vec!["local_index_platform_ecosystems.bib/Roe2019".to_string()]));
    }
}
