//! Data endpoints: outputs built from the included records.

use std::fs;
use std::path::PathBuf;
use tracing::info;

use super::{async_trait, DataEndpoint, EndpointError};
use crate::dataset::{bibtex, ProjectPaths};
use crate::process::RecordState;
use crate::record::Records;
use crate::settings::EndpointSettings;

const DEFAULT_BIB_FILE: &str = "data/references.bib";

/// Writes the included records to a plain BibTeX file.
pub struct BibliographyExport {
    paths: ProjectPaths,
    bib_file: PathBuf,
}

impl BibliographyExport {
    pub fn from_settings(paths: &ProjectPaths, settings: &EndpointSettings) -> Self {
        let bib_file = PathBuf::from(settings.option_str("bib_file").unwrap_or(DEFAULT_BIB_FILE));
        Self {
            paths: paths.clone(),
            bib_file,
        }
    }

    pub fn bib_file(&self) -> PathBuf {
        self.paths.root().join(&self.bib_file)
    }
}

#[async_trait]
impl DataEndpoint for BibliographyExport {
    fn name(&self) -> &'static str {
        "colrev.bibliography_export"
    }

    async fn update_data(&self, records: &Records, included: &[String]) -> Result<Vec<String>, EndpointError> {
        let exported: Vec<_> = records
            .values()
            .filter(|r| r.status >= RecordState::RevIncluded || included.contains(&r.id))
            .collect();
        let content = exported
            .iter()
            .map(|r| bibtex::serialize_plain(r))
            .collect::<Vec<_>>()
            .join("\n");
        let target = self.bib_file();
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;
        info!("exported {} records to {}", exported.len(), self.bib_file.display());
        Ok(included.iter().filter(|id| records.contains_key(*id)).cloned().collect())
    }

    fn advice(&self, records: &Records) -> Option<String> {
        let pending = records.values().filter(|r| r.status == RecordState::RevIncluded).count();
        if pending > 0 {
            return Some(format!(
                "run colrev data to export {pending} included records to {}",
                self.bib_file.display()
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::record::{fields, Record};
    use tempfile::tempdir;

    fn record(id: &str, status: RecordState) -> Record {
        let mut record = Record::new(id, "article").with(fields::TITLE, "A title");
        record.status = status;
        record
    }

    #[tokio::test]
    async fn exports_included_and_synthesized() {
        let dir = tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        let export = BibliographyExport::from_settings(&paths, &EndpointSettings::new("colrev.bibliography_export"));
        let records: Records = [
            record("A", RecordState::RevIncluded),
            record("B", RecordState::RevSynthesized),
            record("C", RecordState::RevExcluded),
        ]
        .into_iter()
        .map(|r| (r.id.clone(), r))
        .collect();

        assert!(export.advice(&records).is_some_and(|a| a.contains("1 included")));
        let synthesized = export.update_data(&records, &["A".to_string()]).await.unwrap();
        assert_eq!(synthesized, vec!["A"]);

        let entries = parser::parse_search_file(&dir.path().join(DEFAULT_BIB_FILE)).unwrap();
        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["A", "B"]);
    }
}
