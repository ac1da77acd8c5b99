//! Content fingerprints (`colrev_id`) and table-of-contents keys.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::fields::{self, UNKNOWN};
use super::{Record, RecordError};
use crate::process::RecordState;

pub const COLREV_ID_PREFIX: &str = "colrev_id1:";

const STOP_PREFIXES: &[&str] = &["a ", "the ", "review: "];
const NAME_PARTICLES: &[&str] = &[
    "van", "von", "de", "der", "den", "da", "di", "du", "la", "le", "del", "della", "dos", "das",
    "ter", "ten",
];

lazy_static! {
    static ref NON_ID_CHARS: Regex = Regex::new(r"[^0-9a-zA-Z -]+").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref HYPHENS: Regex = Regex::new(r"-+").unwrap();
}

/// How many author family names enter the fingerprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColrevIdAuthors {
    #[default]
    FirstAuthor,
    ThreeAuthors,
}

/// Removes diacritics (NFKD decomposition without combining marks).
pub fn remove_accents(input: &str) -> String {
    input.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Normalizes one fingerprint segment.
pub fn normalize_segment(value: &str, drop_stop_prefixes: bool) -> String {
    let mut s = value
        .replace(['\n', '/', '–'], " ")
        .replace("emph{", "")
        .replace("&amp;", "and")
        .replace(" & ", " and ");
    s = remove_accents(&s).to_lowercase();
    let mut s = s.trim().to_string();
    if drop_stop_prefixes {
        for prefix in STOP_PREFIXES {
            if let Some(rest) = s.strip_prefix(prefix) {
                s = rest.trim_start().to_string();
                break;
            }
        }
    }
    let s = NON_ID_CHARS.replace_all(&s, "");
    let s = WHITESPACE.replace_all(s.trim(), "-");
    let s = HYPHENS.replace_all(&s, "-");
    s.trim_matches('-').to_string()
}

/// Family names of a BibTeX author string (`Last, First and ...`).
pub fn family_names(author: &str) -> Vec<String> {
    author
        .replace('\n', " ")
        .replace("; ", " and ")
        .split(" and ")
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter_map(|name| {
            if let Some((last, _)) = name.split_once(',') {
                let last = last.trim();
                return (!last.is_empty()).then(|| last.to_string());
            }
            let tokens: Vec<&str> = name.split_whitespace().collect();
            let (last, rest) = tokens.split_last()?;
            let mut family = vec![*last];
            for token in rest.iter().rev() {
                if NAME_PARTICLES.contains(&token.to_lowercase().as_str()) {
                    family.insert(0, token);
                } else {
                    break;
                }
            }
            Some(family.join(" "))
        })
        .collect()
}

fn container_title(record: &Record) -> Option<&str> {
    let known = |key| record.get(key).filter(|v| !v.trim().is_empty());
    match record.entrytype.as_str() {
        "article" => known(fields::JOURNAL),
        "inproceedings" | "incollection" | "inbook" | "proceedings" => known(fields::BOOKTITLE),
        "phdthesis" | "mastersthesis" | "thesis" => known(fields::SCHOOL),
        "techreport" => known(fields::INSTITUTION),
        "book" => known(fields::PUBLISHER).or_else(|| known(fields::SERIES)),
        _ => known(fields::SERIES)
            .or_else(|| known(fields::HOWPUBLISHED))
            .or_else(|| known(fields::URL))
            .or(Some("-")),
    }
}

fn not_identifiable(record: &Record, reason: impl Into<String>) -> RecordError {
    RecordError::NotEnoughDataToIdentify {
        id: record.id.clone(),
        reason: reason.into(),
    }
}

/// Computes the fingerprint of a record from its identifying fields.
pub fn create_colrev_id(
    record: &Record,
    assume_complete: bool,
    authors: ColrevIdAuthors,
) -> Result<String, RecordError> {
    if !assume_complete {
        if matches!(
            record.status,
            RecordState::MdImported | RecordState::MdNeedsManualPreparation
        ) {
            return Err(not_identifiable(
                record,
                "field requirements cannot be determined before preparation",
            ));
        }
        for key in fields::MASTERDATA_FIELDS {
            if record.get(key) == Some(UNKNOWN) {
                return Err(not_identifiable(record, format!("{key} unknown")));
            }
        }
    }

    let container = container_title(record)
        .ok_or_else(|| not_identifiable(record, "missing container title"))?;
    let person_field = if record.entrytype == "proceedings" {
        fields::EDITOR
    } else {
        fields::AUTHOR
    };
    let mut segments = vec![match record.entrytype.to_lowercase().as_str() {
        "article" => "a".to_string(),
        "inproceedings" => "p".to_string(),
        other => normalize_segment(other, false),
    }];
    segments.push(normalize_segment(container, true));

    if record.entrytype == "article" {
        for key in [fields::VOLUME, fields::NUMBER] {
            let value = match record.get(key).map(str::trim) {
                None | Some("") => "-",
                Some(UNKNOWN) => "-",
                Some(v) => v,
            };
            segments.push(normalize_segment(value, false));
        }
    }

    for key in [fields::YEAR, person_field, fields::TITLE] {
        let value = record
            .get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| not_identifiable(record, format!("missing {key}")))?;
        if value == UNKNOWN {
            return Err(not_identifiable(record, format!("{key} unknown")));
        }
        let segment = if key == person_field {
            let names = family_names(value);
            let keep = match authors {
                ColrevIdAuthors::FirstAuthor => 1,
                ColrevIdAuthors::ThreeAuthors => 3,
            };
            let joined = names.into_iter().take(keep).collect::<Vec<_>>().join(" ");
            let segment = normalize_segment(&joined, false);
            if segment.replace('-', "").is_empty() {
                return Err(not_identifiable(record, format!("empty {key}")));
            }
            segment
        } else {
            normalize_segment(value, key == fields::TITLE)
        };
        segments.push(segment);
    }

    let mut cid = COLREV_ID_PREFIX.to_string();
    for segment in segments {
        cid.push('|');
        cid.push_str(&segment);
    }
    if cid.contains("|minitrack-introduction") {
        return Err(not_identifiable(record, "minitrack introductions are not identifiable"));
    }
    Ok(cid.replace(';', ""))
}

fn toc_container(value: &str) -> String {
    value
        .replace(' ', "-")
        .replace('\\', "")
        .replace('&', "and")
        .to_lowercase()
}

fn toc_part(record: &Record, key: &str) -> String {
    match record.get(key).map(str::trim) {
        None | Some("") | Some(UNKNOWN) => "-".to_string(),
        Some(v) => v.to_string(),
    }
}

/// Key of the venue issue a record belongs to.
pub fn toc_key(record: &Record) -> Result<String, RecordError> {
    let not_toc = || RecordError::NotTocIdentifiable {
        id: record.id.clone(),
    };
    match record.entrytype.as_str() {
        "article" => {
            let journal = record.known(fields::JOURNAL).ok_or_else(not_toc)?;
            Ok(format!(
                "{}|{}|{}",
                toc_container(journal),
                toc_part(record, fields::VOLUME),
                toc_part(record, fields::NUMBER)
            ))
        }
        "inproceedings" => {
            let booktitle = record.known(fields::BOOKTITLE).ok_or_else(not_toc)?;
            let year = record.known(fields::YEAR).ok_or_else(not_toc)?;
            Ok(format!("{}|{}", toc_container(booktitle), year))
        }
        _ => Err(not_toc()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staehr() -> Record {
        Record::new("Staehr2010", "article")
            .with("author", "Staehr, Lorraine")
            .with("journal", "Information Systems Journal")
            .with(
                "title",
                "Understanding the role of managerial agency in achieving business benefits from ERP systems",
            )
            .with("volume", "20")
            .with("number", "3")
            .with("year", "2010")
    }

    #[test]
    fn article_fingerprint() {
        let cid = create_colrev_id(&staehr(), false, ColrevIdAuthors::FirstAuthor).unwrap();
        assert_eq!(
            cid,
            "colrev_id1:|a|information-systems-journal|20|3|2010|staehr|understanding-the-role-of-managerial-agency-in-achieving-business-benefits-from-erp-systems"
        );
    }

    #[test]
    fn unknown_author_is_not_identifiable() {
        let record = staehr().with("author", "UNKNOWN");
        let err = create_colrev_id(&record, false, ColrevIdAuthors::FirstAuthor).unwrap_err();
        assert!(matches!(err, RecordError::NotEnoughDataToIdentify { .. }));
        assert!(create_colrev_id(&record, true, ColrevIdAuthors::FirstAuthor).is_err());
    }

    #[test]
    fn fingerprint_ignores_case_middle_names_and_extra_fields() {
        let base = create_colrev_id(&staehr(), false, ColrevIdAuthors::FirstAuthor).unwrap();

        let upper = staehr()
            .with("journal", "INFORMATION SYSTEMS JOURNAL")
            .with("author", "STAEHR, LORRAINE");
        assert_eq!(
            create_colrev_id(&upper, false, ColrevIdAuthors::FirstAuthor).unwrap(),
            base
        );

        let middle = staehr().with("author", "Staehr, Lorraine M. J.");
        assert_eq!(
            create_colrev_id(&middle, false, ColrevIdAuthors::FirstAuthor).unwrap(),
            base
        );

        let extra = staehr().with("abstract", "An abstract").with("doi", "10.1111/j.1365-2575.2009.00325.x");
        assert_eq!(
            create_colrev_id(&extra, false, ColrevIdAuthors::FirstAuthor).unwrap(),
            base
        );
    }

    #[test]
    fn three_author_fingerprints_join_family_names() {
        let record = staehr().with("author", "Webster, Jane and Watson, Richard T. and Doe, J.");
        let cid = create_colrev_id(&record, false, ColrevIdAuthors::ThreeAuthors).unwrap();
        assert!(cid.contains("|webster-watson-doe|"));
    }

    #[test]
    fn imported_records_need_preparation_first() {
        let mut record = staehr();
        record.status = RecordState::MdImported;
        assert!(create_colrev_id(&record, false, ColrevIdAuthors::FirstAuthor).is_err());
        assert!(create_colrev_id(&record, true, ColrevIdAuthors::FirstAuthor).is_ok());
    }

    #[test]
    fn segments_drop_accents_and_stop_prefixes() {
        assert_eq!(normalize_segment("The Journal of Ölstudies", true), "journal-of-olstudies");
        assert_eq!(normalize_segment("Review: A & B", true), "a-and-b");
        assert_eq!(normalize_segment("Research & Practice", false), "research-and-practice");
    }

    #[test]
    fn family_names_handle_both_name_orders() {
        assert_eq!(
            family_names("Staehr, Lorraine and Craig van Slyke and Jane Webster"),
            vec!["Staehr", "van Slyke", "Webster"]
        );
    }

    #[test]
    fn toc_keys() {
        assert_eq!(toc_key(&staehr()).unwrap(), "information-systems-journal|20|3");
        let no_number = staehr().with("number", "UNKNOWN");
        assert_eq!(toc_key(&no_number).unwrap(), "information-systems-journal|20|-");

        let paper = Record::new("Doe2020", "inproceedings")
            .with("booktitle", "ICIS")
            .with("year", "2020");
        assert_eq!(toc_key(&paper).unwrap(), "icis|2020");

        let book = Record::new("Doe2020", "book");
        assert!(matches!(
            toc_key(&book),
            Err(RecordError::NotTocIdentifiable { .. })
        ));
    }
}
