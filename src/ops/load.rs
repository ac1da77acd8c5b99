//! Load: search files to records in `md_imported`.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::{states_of, Operation, Outcome};
use crate::dataset::ProjectPaths;
use crate::error::Result;
use crate::parser::{self, SearchEntry};
use crate::process::{OperationsType, RecordState};
use crate::record::id_setter::next_unique_id;
use crate::record::{fields, Record};
use crate::review_manager::ReviewManager;
use crate::settings::{review_types, EndpointSettings};

/// Registers BibTeX files in `data/search/` that no source refers to yet.
pub fn add_new_sources(review_manager: &mut ReviewManager) -> Result<Vec<String>> {
    let search_dir = review_manager.paths().search_dir();
    let Ok(entries) = fs::read_dir(&search_dir) else {
        return Ok(Vec::new());
    };
    let known: BTreeSet<String> = review_manager
        .settings()
        .sources
        .iter()
        .map(|s| s.origin_prefix())
        .collect();
    let mut added: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "bib"))
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .filter(|name| !known.contains(name))
        .collect();
    added.sort();
    if added.is_empty() {
        return Ok(added);
    }
    for name in &added {
        info!("new search source: {}/{name}", ProjectPaths::SEARCH_DIR);
        review_manager
            .settings_mut()
            .sources
            .push(review_types::unknown_source(name));
    }
    review_manager.save_settings()?;
    Ok(added)
}

fn to_record(entry: SearchEntry, origin: &str, id: String) -> Record {
    let mut record = Record::new(id, entry.entrytype);
    record.status = RecordState::MdRetrieved;
    record.origin = vec![origin.to_string()];
    for (key, value) in &entry.fields {
        if fields::is_system_field(key) {
            continue;
        }
        if let Err(e) = record.update_field(key, value, origin, "") {
            debug!("{origin}: {e}");
        }
    }
    record.status = RecordState::MdImported;
    record
}

pub struct Load<'a> {
    operation: Operation<'a>,
}

impl<'a> Load<'a> {
    pub fn new(review_manager: &'a ReviewManager) -> Result<Self> {
        Ok(Self {
            operation: Operation::new(review_manager, OperationsType::Load)?,
        })
    }

    /// Imports entries whose origin is not in the records file yet.
    pub async fn run(&mut self, keep_ids: bool) -> Result<Outcome> {
        let rm = self.operation.review_manager();
        let dataset = rm.dataset();
        let mut records = dataset.load_records()?;
        let before = states_of(&records);
        let imported: BTreeSet<String> = records.values().flat_map(|r| r.origin.iter().cloned()).collect();
        let package_manager = rm.package_manager();

        let mut loaded: Vec<String> = Vec::new();
        let mut search_files: Vec<PathBuf> = Vec::new();
        for source in rm.settings().sources.iter().filter(|s| !s.is_md_source()) {
            let path = rm.paths().root().join(&source.filename);
            if !path.is_file() {
                warn!("{} does not exist, skipping", source.filename.display());
                continue;
            }
            let endpoint = package_manager.load_search_source(&EndpointSettings::new(&source.endpoint))?;
            self.operation.add_endpoint(endpoint.name());
            let entries = endpoint.load_fixes(parser::parse_search_file(&path)?);
            let prefix = source.origin_prefix();
            let mut added = 0;
            for entry in entries {
                let origin = format!("{prefix}/{}", entry.key);
                if imported.contains(&origin) {
                    continue;
                }
                let existing: Vec<String> = records.keys().cloned().collect();
                let id = next_unique_id(&entry.key, &existing);
                let record = to_record(entry, &origin, id.clone());
                records.insert(id.clone(), record);
                loaded.push(id);
                added += 1;
            }
            info!("{}: {added} new records", source.filename.display());
            search_files.push(source.filename.clone());
        }

        if loaded.is_empty() {
            return Ok(Outcome::default().message("no new records to load"));
        }
        if !keep_ids {
            let renames = dataset.set_ids(&mut records, rm.settings().project.id_pattern, Some(&loaded))?;
            debug!("{} records re-keyed", renames.len());
        }
        search_files.push(PathBuf::from(ProjectPaths::SETTINGS_FILE));
        self.operation
            .save_and_commit(&format!("{} records loaded", loaded.len()), &before, &records, &search_files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::tests::project;

    #[tokio::test]
    async fn loads_new_entries_once() {
        let (_dir, manager) = project("literature_review");
        let outcome = Load::new(&manager).unwrap().run(false).await.unwrap();
        assert!(outcome.commit.is_some());
        assert_eq!(outcome.transitions.count_to(RecordState::MdImported), 3);

        let records = manager.dataset().load_records().unwrap();
        let origins: Vec<&String> = records.values().flat_map(|r| r.origin.iter()).collect();
        assert_eq!(origins.len(), 3);
        assert!(records.values().all(|r| r.status == RecordState::MdImported));
        let staehr = records.values().find(|r| r.origin == vec!["refs.bib/r1".to_string()]).unwrap();
        assert!(staehr.id.starts_with("Staehr2010"));
        assert_eq!(
            staehr.provenance_for(fields::TITLE).map(|p| p.source.as_str()),
            Some("refs.bib/r1")
        );
        assert!(manager.paths().status_file().is_file());

        let again = Load::new(&manager).unwrap().run(false).await.unwrap();
        assert!(again.commit.is_none());
        assert_eq!(manager.dataset().load_records().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn registers_new_search_files() {
        let (_dir, mut manager) = project("literature_review");
        fs::write(
            manager.paths().search_dir().join("extra.bib"),
            "@article{x1,\n  author = {Roe, Ann},\n  title = {Another paper},\n  year = {2019},\n}\n",
        )
        .unwrap();
        assert_eq!(add_new_sources(&mut manager).unwrap(), vec!["extra.bib".to_string()]);
        assert!(add_new_sources(&mut manager).unwrap().is_empty());

        let outcome = Load::new(&manager).unwrap().run(true).await.unwrap();
        assert_eq!(outcome.transitions.added.len(), 4);
        let records = manager.dataset().load_records().unwrap();
        assert!(records.contains_key("x1"));
        assert!(!manager.git().is_dirty().unwrap());
    }
}
