//! Citation key generation.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::colrev_id::{family_names, remove_accents};
use super::fields;
use super::{Record, RecordError, Records};
use crate::process::RecordState;

lazy_static! {
    static ref PARENTHESIZED: Regex = Regex::new(r"\(.*\)").unwrap();
    static ref NON_ALNUM: Regex = Regex::new(r"[^0-9a-zA-Z]+").unwrap();
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdPattern {
    FirstAuthorYear,
    #[default]
    ThreeAuthorsYear,
}

fn is_upper(s: &str) -> bool {
    s.chars().any(char::is_alphabetic)
        && s.chars().filter(|c| c.is_alphabetic()).all(char::is_uppercase)
}

fn capitalize(s: &str) -> String {
    let lower = s.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The ID a record would get without collision handling.
pub fn generate_temp_id(record: &Record, pattern: IdPattern) -> String {
    let persons = record
        .known(fields::AUTHOR)
        .or_else(|| record.known(fields::EDITOR));
    let mut authors = persons.map(family_names).unwrap_or_default();
    if authors.is_empty() {
        authors.push("Anonymous".to_string());
    }
    let year = record.known(fields::YEAR).unwrap_or("NoYear");

    let mut temp_id = match pattern {
        IdPattern::FirstAuthorYear => format!("{}{}", authors[0].replace(' ', ""), year),
        IdPattern::ThreeAuthorsYear => {
            let mut id: String = authors.iter().take(3).map(|a| a.replace(' ', "")).collect();
            if authors.len() > 3 {
                id.push_str("EtAl");
            }
            id.push_str(year);
            id
        }
    };

    if is_upper(&temp_id) {
        temp_id = capitalize(&temp_id);
    }
    let temp_id = remove_accents(&temp_id);
    let temp_id = PARENTHESIZED.replace_all(&temp_id, "");
    NON_ALNUM.replace_all(&temp_id, "").to_string()
}

/// `a, b, ..., z, aa, ab, ...`
fn suffix(mut index: usize) -> String {
    let mut len = 1;
    let mut block = 26;
    while index >= block {
        index -= block;
        len += 1;
        block *= 26;
    }
    let mut chars = vec!['a'; len];
    for slot in chars.iter_mut().rev() {
        *slot = (b'a' + (index % 26) as u8) as char;
        index /= 26;
    }
    chars.into_iter().collect()
}

/// Appends letters until the ID does not collide (case-insensitively).
pub fn next_unique_id(temp_id: &str, existing_ids: &[String]) -> String {
    let taken = |candidate: &str| {
        existing_ids
            .iter()
            .any(|id| id.to_lowercase() == candidate.to_lowercase())
    };
    if !taken(temp_id) {
        return temp_id.to_string();
    }
    (0..)
        .map(|i| format!("{temp_id}{}", suffix(i)))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| temp_id.to_string())
}

pub fn generate_id(
    record: &Record,
    pattern: IdPattern,
    existing_ids: &[String],
) -> Result<String, RecordError> {
    if record.status.is_post_md_processed() {
        return Err(RecordError::PropagatedIdChange {
            ids: vec![record.id.clone()],
            files: Vec::new(),
        });
    }
    Ok(next_unique_id(&generate_temp_id(record, pattern), existing_ids))
}

/// Re-keys records that have not been propagated yet.
///
/// Returns the renames (`old -> new`). With `selected`, only those IDs are considered.
pub fn set_ids(
    records: &mut Records,
    pattern: IdPattern,
    selected: Option<&[String]>,
) -> BTreeMap<String, String> {
    let mut renames = BTreeMap::new();
    let mut id_list: Vec<String> = records.keys().cloned().collect();
    let candidates: Vec<String> = records.keys().cloned().collect();

    for old_id in candidates {
        if let Some(selected) = selected {
            if !selected.contains(&old_id) {
                continue;
            }
        }
        let Some(record) = records.get(&old_id) else {
            continue;
        };
        if !matches!(
            record.status,
            RecordState::MdImported | RecordState::MdPrepared | RecordState::MdNeedsManualPreparation
        ) {
            continue;
        }
        let existing: Vec<String> = id_list.iter().filter(|id| **id != old_id).cloned().collect();
        let new_id = match generate_id(record, pattern, &existing) {
            Ok(id) => id,
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };
        if new_id == old_id {
            continue;
        }
        if let Some(mut record) = records.remove(&old_id) {
            debug!("set_ids({old_id}) to {new_id}");
            record.id = new_id.clone();
            records.insert(new_id.clone(), record);
            id_list.retain(|id| *id != old_id);
            id_list.push(new_id.clone());
            renames.insert(old_id, new_id);
        }
    }
    renames
}
