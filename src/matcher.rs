use crate::record::colrev_id::{family_names, remove_accents};
use crate::record::{fields, Record};
use strsim::{jaro_winkler, normalized_levenshtein};

/// Threshold for title similarity (0.0 to 1.0)
const TITLE_MATCH_THRESHOLD: f64 = 0.85;

/// Fields compared when a change of metadata is validated
const COMPARED_FIELDS: &[&str] = &[
    fields::TITLE,
    fields::AUTHOR,
    fields::YEAR,
    fields::JOURNAL,
    fields::BOOKTITLE,
    fields::VOLUME,
    fields::NUMBER,
    fields::PAGES,
    fields::DOI,
];

/// Lowercase, accent-free, alphanumeric words separated by single spaces.
pub fn normalize_string(s: &str) -> String {
    remove_accents(s)
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Edit-distance ratio of two strings (1.0 = identical).
pub fn string_ratio(a: &str, b: &str) -> f64 {
    normalized_levenshtein(a, b)
}

fn field_similarity(a: &Record, b: &Record, field: &str) -> Option<f64> {
    match (a.known(field), b.known(field)) {
        (Some(x), Some(y)) => Some(jaro_winkler(&normalize_string(x), &normalize_string(y))),
        _ => None,
    }
}

/// Calculate title similarity between two records
pub fn title_similarity(a: &Record, b: &Record) -> f64 {
    field_similarity(a, b, fields::TITLE).unwrap_or(0.0)
}

/// Similarity of the family names of both author lists.
pub fn author_similarity(a: &Record, b: &Record) -> f64 {
    match (a.known(fields::AUTHOR), b.known(fields::AUTHOR)) {
        (Some(x), Some(y)) => {
            let x = normalize_string(&family_names(x).join(" "));
            let y = normalize_string(&family_names(y).join(" "));
            jaro_winkler(&x, &y)
        }
        _ => 0.0,
    }
}

/// Years are compatible when unknown on either side or at most one year apart.
pub fn years_compatible(a: &Record, b: &Record) -> bool {
    let year = |r: &Record| r.known(fields::YEAR).and_then(|y| y.trim().parse::<i32>().ok());
    match (year(a), year(b)) {
        (Some(x), Some(y)) => (x - y).abs() <= 1,
        _ => true,
    }
}

/// Overall similarity used to detect duplicates that share no identifier.
pub fn record_similarity(a: &Record, b: &Record) -> f64 {
    if !years_compatible(a, b) {
        return 0.0;
    }
    let title = title_similarity(a, b);
    let author = author_similarity(a, b);
    let container = field_similarity(a, b, fields::JOURNAL)
        .or_else(|| field_similarity(a, b, fields::BOOKTITLE));
    match container {
        Some(container) => 0.6 * title + 0.3 * author + 0.1 * container,
        None => 0.65 * title + 0.35 * author,
    }
}

/// Find the best matching record from a list of candidates
pub fn find_best_match<'a>(target: &Record, candidates: &'a [Record]) -> Option<(&'a Record, f64)> {
    candidates
        .iter()
        .filter(|c| years_compatible(target, c))
        .map(|c| (c, title_similarity(target, c)))
        .filter(|(_, sim)| *sim >= TITLE_MATCH_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// A masterdata field that differs between two versions of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub before: Option<String>,
    pub after: Option<String>,
    pub similarity: f64,
}

/// Compare two versions of a record and list the changed masterdata fields
pub fn compare_records(before: &Record, after: &Record) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if before.entrytype != after.entrytype {
        changes.push(FieldChange {
            field: fields::ENTRYTYPE.to_string(),
            before: Some(before.entrytype.clone()),
            after: Some(after.entrytype.clone()),
            similarity: 0.0,
        });
    }
    for field in COMPARED_FIELDS {
        let (old, new) = (before.get(field), after.get(field));
        if old == new {
            continue;
        }
        let similarity = match (old, new) {
            (Some(x), Some(y)) => string_ratio(&normalize_string(x), &normalize_string(y)),
            _ => 0.0,
        };
        changes.push(FieldChange {
            field: field.to_string(),
            before: old.map(String::from),
            after: new.map(String::from),
            similarity,
        });
    }
    changes
}
