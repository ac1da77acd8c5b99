//! Validate: what a commit changed in the records, least similar first.

use std::collections::BTreeSet;

use crate::dataset::{bibtex, ProjectPaths};
use crate::error::{ColrevError, Result};
use crate::matcher::{compare_records, title_similarity, FieldChange};
use crate::process::RecordState;
use crate::record::{Record, Records};
use crate::review_manager::ReviewManager;

/// A record as changed by the commit, compared to one of its prior versions.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationItem {
    pub id: String,
    pub prior_id: String,
    pub status: (RecordState, RecordState),
    pub similarity: f64,
    pub changes: Vec<FieldChange>,
}

impl ValidationItem {
    /// The record absorbed another one (dedupe).
    pub fn is_merge(&self) -> bool {
        self.id != self.prior_id
    }
}

fn records_at(review_manager: &ReviewManager, revision: &str) -> Result<Records> {
    match review_manager.git().show_file(revision, ProjectPaths::RECORDS_FILE)? {
        Some(content) => Ok(bibtex::parse_records(&content)?),
        None => Ok(Records::new()),
    }
}

fn prior_versions<'a>(record: &Record, prior: &'a Records) -> Vec<&'a Record> {
    let origins: BTreeSet<&String> = record.origin.iter().collect();
    prior
        .values()
        .filter(|p| p.id == record.id || p.origin.iter().any(|o| origins.contains(o)))
        .collect()
}

/// Compares the records at `revision` with those of its parent commit.
/// Records without a prior version (newly loaded) are not listed.
pub fn validate(review_manager: &ReviewManager, revision: &str) -> Result<Vec<ValidationItem>> {
    if !review_manager.git().has_commits() {
        return Err(ColrevError::InvalidInput("the project has no commits yet".to_string()));
    }
    let current = records_at(review_manager, revision)?;
    let prior = records_at(review_manager, &format!("{revision}~1"))?;

    let mut items = Vec::new();
    for record in current.values() {
        for before in prior_versions(record, &prior) {
            let changes = compare_records(before, record);
            if changes.is_empty() && before.id == record.id {
                continue;
            }
            items.push(ValidationItem {
                id: record.id.clone(),
                prior_id: before.id.clone(),
                status: (before.status, record.status),
                similarity: title_similarity(before, record),
                changes,
            });
        }
    }
    items.sort_by(|a, b| a.similarity.total_cmp(&b.similarity).then_with(|| a.id.cmp(&b.id)));
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::tests::processed_project;
    use crate::record::fields;

    #[tokio::test]
    async fn lists_field_changes_of_the_last_commit() {
        let (_dir, manager) = processed_project().await;
        let mut records = manager.dataset().load_records().unwrap();
        let doe = records
            .values_mut()
            .find(|r| r.origin.contains(&"refs.bib/r3".to_string()))
            .unwrap();
        doe.set(fields::TITLE, "A study of structured literature reviews");
        let doe_id = doe.id.clone();
        manager.dataset().save_records(&records).unwrap();
        manager.git().add_all().unwrap();
        manager.git().commit("Fix title").unwrap();

        let items = validate(&manager, "HEAD").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, doe_id);
        assert!(!items[0].is_merge());
        assert_eq!(items[0].changes.len(), 1);
        assert_eq!(items[0].changes[0].field, "title");
        assert!(items[0].similarity < 1.0);
    }

    #[tokio::test]
    async fn dedupe_commit_shows_the_merge() {
        let (_dir, manager) = processed_project().await;
        let items = validate(&manager, "HEAD").unwrap();
        assert!(items.iter().any(ValidationItem::is_merge));
        assert!(items
            .iter()
            .all(|i| i.status.1 == RecordState::MdProcessed));
    }
}
