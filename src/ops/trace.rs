//! Trace: the history of one record through the commits.

use std::collections::BTreeSet;

use crate::error::{ColrevError, Result};
use crate::matcher::{compare_records, FieldChange};
use crate::process::RecordState;
use crate::record::Record;
use crate::review_manager::ReviewManager;

/// A commit in which the record appeared or changed.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceStep {
    pub commit: String,
    pub date: String,
    pub message: String,
    pub id: String,
    pub status: RecordState,
    pub changes: Vec<FieldChange>,
}

/// Follows the record by ID and by origin, so renamed and merged
/// versions are found too. Steps are ordered oldest first.
pub fn trace(review_manager: &ReviewManager, id: &str) -> Result<Vec<TraceStep>> {
    let dataset = review_manager.dataset();
    let current = dataset.load_records()?;
    let committed = dataset.committed_records()?;
    let record = current
        .get(id)
        .or_else(|| committed.get(id))
        .ok_or_else(|| ColrevError::InvalidInput(format!("no record with ID {id}")))?;
    let origins: BTreeSet<String> = record.origin.iter().cloned().collect();
    let matches = |r: &Record| r.id == id || r.origin.iter().any(|o| origins.contains(o));

    let mut versions = Vec::new();
    for entry in dataset.load_from_git_history()? {
        let (commit, records) = entry?;
        if let Some(version) = records.into_values().find(|r| matches(r)) {
            versions.push((commit, version));
        }
    }
    versions.reverse();

    let mut steps: Vec<TraceStep> = Vec::new();
    let mut previous: Option<Record> = None;
    for (commit, version) in versions {
        let changes = match &previous {
            Some(before) => {
                let changes = compare_records(before, &version);
                if changes.is_empty() && before.status == version.status && before.id == version.id {
                    previous = Some(version);
                    continue;
                }
                changes
            }
            None => Vec::new(),
        };
        steps.push(TraceStep {
            commit: commit.sha,
            date: commit.date,
            message: commit.message,
            id: version.id.clone(),
            status: version.status,
            changes,
        });
        previous = Some(version);
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::tests::processed_project;

    #[tokio::test]
    async fn follows_a_record_through_the_pipeline() {
        let (_dir, manager) = processed_project().await;
        let records = manager.dataset().load_records().unwrap();
        let doe = records
            .values()
            .find(|r| r.origin.contains(&"refs.bib/r3".to_string()))
            .unwrap();

        let steps = trace(&manager, &doe.id).unwrap();
        let states: Vec<RecordState> = steps.iter().map(|s| s.status).collect();
        assert_eq!(
            states,
            vec![RecordState::MdImported, RecordState::MdPrepared, RecordState::MdProcessed]
        );
        assert!(steps[0].message.starts_with("Load:"));
        assert!(steps[2].message.starts_with("Dedupe:"));
        assert!(steps[0].changes.is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_rejected() {
        let (_dir, manager) = processed_project().await;
        assert!(matches!(
            trace(&manager, "Nobody1999"),
            Err(ColrevError::InvalidInput(_))
        ));
    }
}
