//! Push and pull: sharing the project through its git remote.

use std::path::Path;
use tracing::{debug, info, warn};

use super::corrections;
use super::status::StatusStats;
use super::{states_of, Outcome, TransitionReport};
use crate::dataset::ProjectPaths;
use crate::error::{ColrevError, Result};
use crate::record::{fields, Records};
use crate::review_manager::ReviewManager;
use crate::settings::COLREV_VERSION;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub corrections_applied: usize,
    pub pushed: bool,
}

/// Pushes to the remote. With `include_corrections`, pending corrections of
/// curated masterdata are applied to their repositories on this machine first.
pub fn push(review_manager: &ReviewManager, include_corrections: bool) -> Result<PushSummary> {
    let mut summary = PushSummary::default();
    if include_corrections {
        let registry = review_manager.environment().registry()?;
        summary.corrections_applied = corrections::apply_to_sources(review_manager.paths(), &registry)?;
    }
    let git = review_manager.git();
    if git.has_remote() {
        git.push()?;
        summary.pushed = true;
        info!("pushed to {}", git.remote_url().unwrap_or_default());
    } else if !include_corrections {
        return Err(ColrevError::RepoSetup("the project has no git remote".to_string()));
    }
    Ok(summary)
}

/// Replaces the masterdata of curated records with the current version in
/// the local index. Returns the IDs of the updated records.
pub fn refresh_curated(review_manager: &ReviewManager, records: &mut Records) -> Vec<String> {
    let local_index = review_manager.environment().local_index();
    let authors = review_manager.settings().project.colrev_id_authors;
    let mut updated = Vec::new();
    for record in records.values_mut().filter(|r| r.masterdata_is_curated()) {
        let retrieved = match local_index.retrieve(record, authors, false, false) {
            Ok(retrieved) => retrieved,
            Err(e) => {
                debug!("{}: {e}", record.id);
                continue;
            }
        };
        let mut changed = false;
        for (key, value) in retrieved.fields.iter().filter(|(k, _)| fields::is_masterdata(k)) {
            if record.get(key) != Some(value.as_str()) {
                record.set(key, value);
                changed = true;
            }
        }
        if retrieved.entrytype != record.entrytype {
            record.entrytype = retrieved.entrytype.clone();
            changed = true;
        }
        if changed {
            record.masterdata_provenance = retrieved.masterdata_provenance.clone();
            info!("{}: curated masterdata refreshed", record.id);
            updated.push(record.id.clone());
        }
    }
    updated
}

/// Pulls from the remote (if any) and refreshes curated records.
pub fn pull(review_manager: &ReviewManager) -> Result<Outcome> {
    let git = review_manager.git();
    if git.has_remote() {
        git.wait_for_index_lock()?;
        git.pull()?;
    } else {
        warn!("no git remote: only refreshing curated records");
    }

    let dataset = review_manager.dataset();
    if !dataset.records_file_exists() {
        return Ok(Outcome::default());
    }
    let mut records = dataset.load_records()?;
    let before = states_of(&records);
    let updated = refresh_curated(review_manager, &mut records);
    if updated.is_empty() {
        return Ok(Outcome::default());
    }

    dataset.save_records(&records)?;
    let paths = review_manager.paths();
    StatusStats::compute(&records).save(&paths.status_file())?;
    git.add(&[
        Path::new(ProjectPaths::RECORDS_FILE),
        Path::new(ProjectPaths::STATUS_FILE),
    ])?;
    let message = format!(
        "Pull: {} curated records updated\n\nReport\n {}\n\nSoftware\n colrev {COLREV_VERSION}\n",
        updated.len(),
        updated.join(", ")
    );
    let commit = git.commit(&message)?;
    Ok(Outcome {
        transitions: TransitionReport::between(&before, &records),
        commit,
        messages: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_index::IndexOptions;
    use crate::ops::tests::processed_project;
    use crate::record::Provenance;

    const CURATION: &str = "https://github.com/curated/icis";

    #[tokio::test]
    async fn pull_refreshes_curated_records_from_the_index() {
        let (_dir, manager) = processed_project().await;
        let mut records = manager.dataset().load_records().unwrap();
        let doe_id = records
            .values()
            .find(|r| r.origin.contains(&"refs.bib/r3".to_string()))
            .map(|r| r.id.clone())
            .unwrap();
        records.get_mut(&doe_id).unwrap().masterdata_provenance = Provenance::curated(CURATION);
        manager.dataset().save_records(&records).unwrap();
        manager.git().add_all().unwrap();
        manager.git().commit("Curated").unwrap();

        let mut curated = records.clone();
        curated
            .get_mut(&doe_id)
            .unwrap()
            .set(fields::DOI, "10.1234/icis.2021.17");
        let options = IndexOptions {
            curated_masterdata: true,
            curation_url: Some(CURATION.to_string()),
            ..IndexOptions::default()
        };
        manager
            .environment()
            .local_index()
            .index_records(&curated, Path::new("/repos/icis"), &options)
            .unwrap();

        let outcome = pull(&manager).unwrap();
        assert!(outcome.commit.is_some());
        assert!(outcome.transitions.is_empty());
        let records = manager.dataset().load_records().unwrap();
        assert_eq!(records[&doe_id].get(fields::DOI), Some("10.1234/icis.2021.17"));
        assert!(!manager.git().is_dirty().unwrap());

        assert!(pull(&manager).unwrap().commit.is_none());
    }

    #[tokio::test]
    async fn push_without_remote_fails() {
        let (_dir, manager) = processed_project().await;
        assert!(matches!(push(&manager, false), Err(ColrevError::RepoSetup(_))));
        assert_eq!(
            push(&manager, true).unwrap(),
            PushSummary {
                corrections_applied: 0,
                pushed: false
            }
        );
    }
}
