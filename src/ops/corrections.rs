//! Corrections of curated masterdata, kept until they are sent upstream.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::dataset::{Dataset, ProjectPaths};
use crate::environment::registry::Registry;
use crate::error::Result;
use crate::record::{fields, Record, Records};

const ESSENTIAL_FIELDS: &[&str] = &[
    fields::TITLE,
    fields::AUTHOR,
    fields::JOURNAL,
    fields::YEAR,
    fields::BOOKTITLE,
    fields::NUMBER,
    fields::VOLUME,
    fields::DOI,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCorrection {
    pub field: String,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// `.corrections/<ID>.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub curated_source: String,
    pub original: BTreeMap<String, String>,
    pub corrected: BTreeMap<String, String>,
    pub changes: Vec<FieldCorrection>,
}

fn essential(record: &Record) -> BTreeMap<String, String> {
    ESSENTIAL_FIELDS
        .iter()
        .filter_map(|f| record.get(f).map(|v| (f.to_string(), v.to_string())))
        .collect()
}

/// Curated records whose essential masterdata differs from the last commit.
pub fn find_corrections(prior: &Records, records: &Records) -> Vec<(String, Correction)> {
    let mut corrections = Vec::new();
    for original in prior.values() {
        let Some(curated_source) = original.masterdata_provenance.curation_source() else {
            continue;
        };
        let Some(current) = records
            .get(&original.id)
            .or_else(|| records.values().find(|r| r.origin.iter().any(|o| original.origin.contains(o))))
        else {
            continue;
        };
        let before = essential(original);
        let after = essential(current);
        if before == after {
            continue;
        }
        let changes = ESSENTIAL_FIELDS
            .iter()
            .filter(|f| before.get(**f) != after.get(**f))
            .map(|f| FieldCorrection {
                field: f.to_string(),
                before: before.get(*f).cloned(),
                after: after.get(*f).cloned(),
            })
            .collect();
        corrections.push((
            current.id.clone(),
            Correction {
                curated_source: curated_source.to_string(),
                original: before,
                corrected: after,
                changes,
            },
        ));
    }
    corrections
}

/// Writes a correction file for every changed curated record.
pub fn detect(dataset: &Dataset, records: &Records) -> Result<Vec<PathBuf>> {
    let prior = dataset.get_records_curated_prior_from_history()?;
    if prior.is_empty() {
        return Ok(Vec::new());
    }
    let dir = dataset.paths().corrections_dir();
    let mut written = Vec::new();
    for (id, correction) in find_corrections(&prior, records) {
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{id}.json"));
        fs::write(&path, serde_json::to_string_pretty(&correction)?)?;
        info!("{id}: correction of curated masterdata saved to {}", path.display());
        written.push(path);
    }
    Ok(written)
}

pub fn pending(paths: &ProjectPaths) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(paths.corrections_dir()) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "json"))
        .collect();
    files.sort();
    files
}

fn source_repository<'a>(registry: &'a Registry, curated_source: &str) -> Option<&'a Path> {
    registry
        .repos
        .iter()
        .find(|r| {
            r.repo_source_path == Path::new(curated_source)
                || r.repo_source_url.as_deref() == Some(curated_source)
        })
        .map(|r| r.repo_source_path.as_path())
}

/// Applies pending corrections to curated repositories on this machine.
///
/// The changes are left uncommitted in the curated repository for its
/// maintainers to review. Returns the number of corrections applied.
pub fn apply_to_sources(paths: &ProjectPaths, registry: &Registry) -> Result<usize> {
    let mut applied = 0;
    for file in pending(paths) {
        let correction: Correction = serde_json::from_str(&fs::read_to_string(&file)?)?;
        let Some(repo) = source_repository(registry, &correction.curated_source) else {
            warn!(
                "{}: curated source {} is not a registered repository",
                file.display(),
                correction.curated_source
            );
            continue;
        };
        let source = Dataset::open(repo)?;
        let mut records = source.load_records()?;
        let Some(record) = records
            .values_mut()
            .find(|r| essential(r) == correction.original)
        else {
            warn!("{}: record no longer found in {}", file.display(), repo.display());
            continue;
        };
        for change in &correction.changes {
            match &change.after {
                Some(value) => record.set(&change.field, value),
                None => {
                    record.fields.remove(&change.field);
                }
            }
        }
        let id = record.id.clone();
        let corrected = record.clone();
        source.update_record_by_id(&id, &corrected)?;
        fs::remove_file(&file)?;
        info!("{id}: correction applied to {}", repo.display());
        applied += 1;
    }
    Ok(applied)
}
