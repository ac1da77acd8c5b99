//! Integrity checks run by the `check` hook.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use tracing::warn;

use super::{Dataset, DatasetError, ProjectPaths};
use crate::parser;
use crate::process::{ProcessModel, RecordState};
use crate::record::{fields, Records};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckFailure {
    DuplicateIds(Vec<String>),
    MissingOrigin { id: String },
    SharedOrigin { origin: String, ids: Vec<String> },
    OriginNotInSearchFile { id: String, origin: String },
    InvalidTransition {
        id: String,
        from: RecordState,
        to: RecordState,
        commit: String,
    },
    ScreeningCriteria { id: String, value: String },
    PropagatedIdChange {
        old_id: String,
        new_id: String,
        files: Vec<PathBuf>,
    },
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckFailure::DuplicateIds(ids) => write!(f, "duplicate IDs: {}", ids.join(", ")),
            CheckFailure::MissingOrigin { id } => write!(f, "{id}: empty colrev_origin"),
            CheckFailure::SharedOrigin { origin, ids } => {
                write!(f, "origin {origin} appears in several records: {}", ids.join(", "))
            }
            CheckFailure::OriginNotInSearchFile { id, origin } => {
                write!(f, "{id}: origin {origin} not found in the search files")
            }
            CheckFailure::InvalidTransition { id, from, to, commit } => {
                write!(f, "{id}: invalid transition {from} -> {to} (after {})", short(commit))
            }
            CheckFailure::ScreeningCriteria { id, value } => {
                write!(f, "{id}: screening_criteria '{value}' does not match the settings")
            }
            CheckFailure::PropagatedIdChange { old_id, new_id, files } => write!(
                f,
                "{old_id} was renamed to {new_id} after propagation; still referenced in {}",
                files
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

fn short(sha: &str) -> &str {
    &sha[..sha.len().min(8)]
}

/// Checks 1 and 2: unique IDs, non-empty and unshared origins.
pub fn check_origins(records: &Records) -> Vec<CheckFailure> {
    let mut failures = Vec::new();
    let mut origin_owners: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for record in records.values() {
        if record.origin.is_empty() {
            failures.push(CheckFailure::MissingOrigin {
                id: record.id.clone(),
            });
        }
        for origin in &record.origin {
            origin_owners.entry(origin.as_str()).or_default().push(record.id.clone());
        }
    }
    for (origin, ids) in origin_owners {
        if ids.len() > 1 {
            failures.push(CheckFailure::SharedOrigin {
                origin: origin.to_string(),
                ids,
            });
        }
    }
    failures
}

/// Check 3: every origin points to an entry of its search file.
///
/// Search files that are not BibTeX, or cannot be read, are skipped.
pub fn check_origins_in_search_files(paths: &ProjectPaths, records: &Records) -> Vec<CheckFailure> {
    let mut keys_by_file: BTreeMap<String, Option<BTreeSet<String>>> = BTreeMap::new();
    let mut failures = Vec::new();
    for record in records.values() {
        for origin in &record.origin {
            let Some((file, key)) = origin.rsplit_once('/') else {
                failures.push(CheckFailure::OriginNotInSearchFile {
                    id: record.id.clone(),
                    origin: origin.clone(),
                });
                continue;
            };
            let keys = keys_by_file.entry(file.to_string()).or_insert_with(|| {
                let path = paths.search_dir().join(file);
                if path.extension().and_then(|e| e.to_str()) != Some("bib") {
                    return None;
                }
                match parser::parse_search_file(&path) {
                    Ok(entries) => Some(entries.into_iter().map(|e| e.key).collect()),
                    Err(e) => {
                        warn!("cannot read search file {}: {e}", path.display());
                        None
                    }
                }
            });
            if let Some(keys) = keys {
                if !keys.contains(key) {
                    failures.push(CheckFailure::OriginNotInSearchFile {
                        id: record.id.clone(),
                        origin: origin.clone(),
                    });
                }
            }
        }
    }
    failures
}

/// Check 4: status changes across the history follow the state machine.
///
/// Records are tracked by origin so that renames and merges do not break the chain.
pub fn check_status_transitions(
    dataset: &Dataset,
    current: &Records,
) -> Result<Vec<CheckFailure>, DatasetError> {
    let mut newer: BTreeMap<String, (String, RecordState)> = current
        .values()
        .flat_map(|r| r.origin.iter().map(move |o| (o.clone(), (r.id.clone(), r.status))))
        .collect();
    let mut newer_commit = "working tree".to_string();
    let mut failures = Vec::new();
    let mut reported: BTreeSet<(String, RecordState, RecordState)> = BTreeSet::new();

    for item in dataset.load_from_git_history()? {
        let (commit, records) = item?;
        let mut older: BTreeMap<String, (String, RecordState)> = BTreeMap::new();
        for record in records.values() {
            for origin in &record.origin {
                older.insert(origin.clone(), (record.id.clone(), record.status));
            }
        }
        for (origin, (id, to)) in &newer {
            let Some((_, from)) = older.get(origin) else {
                continue;
            };
            if from == to || ProcessModel::is_reachable(*from, *to) {
                continue;
            }
            if reported.insert((id.clone(), *from, *to)) {
                failures.push(CheckFailure::InvalidTransition {
                    id: id.clone(),
                    from: *from,
                    to: *to,
                    commit: newer_commit.clone(),
                });
            }
        }
        newer = older;
        newer_commit = commit.sha;
    }
    Ok(failures)
}

/// Check 5: screening decisions use the configured criteria.
pub fn check_screening_criteria(records: &Records, criteria: &[String]) -> Vec<CheckFailure> {
    records
        .values()
        .filter_map(|record| {
            let value = record.get(fields::SCREENING_CRITERIA)?;
            (!screening_criteria_valid(value, criteria)).then(|| CheckFailure::ScreeningCriteria {
                id: record.id.clone(),
                value: value.to_string(),
            })
        })
        .collect()
}

/// `NA` when no criteria are configured, else `c1=in;c2=out` covering every criterion.
pub fn screening_criteria_valid(value: &str, criteria: &[String]) -> bool {
    if criteria.is_empty() {
        return value == "NA" || value.is_empty();
    }
    let mut seen = BTreeSet::new();
    for item in value.split(';').filter(|i| !i.is_empty()) {
        let Some((name, decision)) = item.split_once('=') else {
            return false;
        };
        if !criteria.iter().any(|c| c == name) || !matches!(decision, "in" | "out" | "TODO") {
            return false;
        }
        seen.insert(name);
    }
    seen.len() == criteria.len()
}

/// Check 6: IDs of propagated records must not change.
pub fn check_propagated_ids(
    dataset: &Dataset,
    current: &Records,
) -> Result<Vec<CheckFailure>, DatasetError> {
    let committed = dataset.committed_records()?;
    let current_by_origin: BTreeMap<&str, &str> = current
        .values()
        .flat_map(|r| r.origin.iter().map(move |o| (o.as_str(), r.id.as_str())))
        .collect();

    let mut failures = Vec::new();
    let mut seen = BTreeSet::new();
    for record in committed.values().filter(|r| r.status.is_post_md_processed()) {
        for origin in &record.origin {
            let Some(new_id) = current_by_origin.get(origin.as_str()) else {
                continue;
            };
            if *new_id != record.id && seen.insert(record.id.clone()) {
                failures.push(CheckFailure::PropagatedIdChange {
                    old_id: record.id.clone(),
                    new_id: new_id.to_string(),
                    files: dataset.files_referencing_id(&record.id),
                });
            }
        }
    }
    Ok(failures)
}

/// Runs every integrity check against the working tree.
pub fn run_all(dataset: &Dataset, screening_criteria: &[String]) -> Result<Vec<CheckFailure>, DatasetError> {
    let records = match dataset.load_records() {
        Ok(records) => records,
        Err(DatasetError::DuplicateIds(ids)) => return Ok(vec![CheckFailure::DuplicateIds(ids)]),
        Err(e) => return Err(e),
    };
    let mut failures = check_origins(&records);
    failures.extend(check_origins_in_search_files(dataset.paths(), &records));
    failures.extend(check_status_transitions(dataset, &records)?);
    failures.extend(check_screening_criteria(&records, screening_criteria));
    failures.extend(check_propagated_ids(dataset, &records)?);
    Ok(failures)
}
