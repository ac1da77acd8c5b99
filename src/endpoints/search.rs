//! Search sources: where raw records come from.

use std::fs;
use std::sync::Arc;
use tracing::info;

use super::{async_trait, EndpointError, SearchSourceEndpoint};
use crate::dataset::{bibtex, ProjectPaths};
use crate::environment::Environment;
use crate::parser::{self, SearchEntry};
use crate::record::fields;
use crate::record::id_setter::next_unique_id;
use crate::settings::SearchSource;

/// Entry types other tools export that map onto the BibTeX ones.
const ENTRYTYPE_ALIASES: &[(&str, &str)] = &[
    ("conference", "inproceedings"),
    ("journal-article", "article"),
    ("report", "techreport"),
    ("thesis", "phdthesis"),
    ("electronic", "online"),
    ("www", "online"),
];

/// BibTeX files added by the user (`data/search/*.bib`).
pub struct UnknownSource;

#[async_trait]
impl SearchSourceEndpoint for UnknownSource {
    fn name(&self) -> &'static str {
        "colrev.unknown_source"
    }

    async fn run_search(&self, source: &SearchSource) -> Result<usize, EndpointError> {
        info!("{} is a file source, nothing to retrieve", source.filename.display());
        Ok(0)
    }

    fn load_fixes(&self, entries: Vec<SearchEntry>) -> Vec<SearchEntry> {
        entries
            .into_iter()
            .map(|mut entry| {
                entry.entrytype = entry.entrytype.to_lowercase();
                if let Some((_, to)) = ENTRYTYPE_ALIASES.iter().find(|(from, _)| *from == entry.entrytype) {
                    entry.entrytype = to.to_string();
                }
                if let Some(issue) = entry.fields.remove("issue") {
                    entry.fields.entry(fields::NUMBER.to_string()).or_insert(issue);
                }
                if let Some(doi) = entry.fields.get_mut(fields::DOI) {
                    *doi = doi.trim_start_matches("https://doi.org/").to_string();
                }
                entry.fields.retain(|_, v| !v.trim().is_empty());
                entry
            })
            .collect()
    }
}

/// Records of other projects on this machine, via the local index.
pub struct LocalIndexSearch {
    environment: Arc<Environment>,
    paths: ProjectPaths,
}

impl LocalIndexSearch {
    pub fn new(environment: Arc<Environment>, paths: ProjectPaths) -> Self {
        Self { environment, paths }
    }
}

#[async_trait]
impl SearchSourceEndpoint for LocalIndexSearch {
    fn name(&self) -> &'static str {
        "colrev.local_index"
    }

    /// Appends new hits for `search_parameters.query` to the search file.
    async fn run_search(&self, source: &SearchSource) -> Result<usize, EndpointError> {
        let query = source
            .search_parameters
            .get("query")
            .and_then(|q| q.as_str())
            .unwrap_or_default();
        if query.is_empty() {
            return Err(EndpointError::Parse(format!(
                "{}: search_parameters.query is missing",
                source.filename.display()
            )));
        }
        let path = self.paths.root().join(&source.filename);
        let existing = if path.is_file() {
            parser::parse_search_file(&path)?
        } else {
            Vec::new()
        };
        let mut ids: Vec<String> = existing.iter().map(|e| e.key.clone()).collect();
        let known_titles: Vec<String> = existing
            .iter()
            .filter_map(|e| e.get(fields::TITLE).map(str::to_lowercase))
            .collect();

        let mut content = if path.is_file() { fs::read_to_string(&path)? } else { String::new() };
        let mut added = 0;
        for mut record in self.environment.local_index().search(query)? {
            let title = record.get(fields::TITLE).unwrap_or_default().to_lowercase();
            if known_titles.contains(&title) {
                continue;
            }
            record.id = next_unique_id(&record.id, &ids);
            ids.push(record.id.clone());
            if !content.is_empty() && !content.ends_with("\n\n") {
                content.push('\n');
            }
            content.push_str(&bibtex::serialize_plain(&record));
            added += 1;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        info!("local index: {added} new records for '{query}'");
        Ok(added)
    }

    fn load_fixes(&self, entries: Vec<SearchEntry>) -> Vec<SearchEntry> {
        entries
            .into_iter()
            .map(|mut entry| {
                if let Some(id) = entry.fields.remove("curation_id") {
                    entry.fields.insert(fields::CURATION_ID.to_string(), id);
                }
                entry
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_index::IndexOptions;
    use crate::process::RecordState;
    use crate::record::{Record, Records};
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn entry(entrytype: &str, fields: &[(&str, &str)]) -> SearchEntry {
        SearchEntry {
            key: "k".into(),
            entrytype: entrytype.into(),
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn unknown_source_fixes() {
        let fixed = UnknownSource.load_fixes(vec![entry(
            "Conference",
            &[("issue", "2"), ("doi", "https://doi.org/10.1/ABC"), ("note", " ")],
        )]);
        assert_eq!(fixed[0].entrytype, "inproceedings");
        assert_eq!(fixed[0].get("number"), Some("2"));
        assert_eq!(fixed[0].get("doi"), Some("10.1/ABC"));
        assert!(fixed[0].get("note").is_none());
    }

    #[tokio::test]
    async fn local_index_search_writes_new_hits_once() {
        let dir = tempdir().unwrap();
        let env = Environment::open_at(&dir.path().join("home")).unwrap();
        let mut record = Record::new("Staehr2010", "article")
            .with(fields::AUTHOR, "Staehr, Lorraine")
            .with(fields::TITLE, "Understanding managerial agency")
            .with(fields::JOURNAL, "Information Systems Journal")
            .with(fields::YEAR, "2010");
        record.status = RecordState::MdProcessed;
        let records: Records = [(record.id.clone(), record)].into_iter().collect();
        env.local_index()
            .index_records(&records, Path::new("/repos/a"), &IndexOptions::default())
            .unwrap();

        let project = dir.path().join("project");
        let source = SearchSource {
            endpoint: "colrev.local_index".into(),
            filename: PathBuf::from("data/search/local_index.bib"),
            search_type: crate::settings::SearchType::Db,
            search_parameters: [("query".to_string(), Value::from("managerial"))].into_iter().collect(),
            comment: None,
        };
        let search = LocalIndexSearch::new(env, ProjectPaths::new(&project));
        assert_eq!(search.run_search(&source).await.unwrap(), 1);
        assert_eq!(search.run_search(&source).await.unwrap(), 0);

        let entries = parser::parse_search_file(&project.join("data/search/local_index.bib")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "Staehr2010");
    }
}
