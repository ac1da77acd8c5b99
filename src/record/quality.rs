//! Masterdata quality model.
//!
//! Each checker owns one defect code: it clears stale notes of that code and
//! adds a note for every field that currently shows the defect.

use lazy_static::lazy_static;
use regex::Regex;

use super::fields::{self, UNKNOWN};
use super::provenance::DefectCode;
use super::Record;

pub const QUALITY_MODEL_SOURCE: &str = "quality_model";

lazy_static! {
    static ref DOI_PATTERN: Regex = Regex::new(r"^10\.\d{4,9}/\S+$").unwrap();
    static ref YEAR_PATTERN: Regex = Regex::new(r"^\d{4}$").unwrap();
    static ref HTML_TAG: Regex = Regex::new(r"</?[a-zA-Z][a-zA-Z0-9]*[^<>]*>").unwrap();
    static ref PAGE_RANGE: Regex = Regex::new(r"^(\d+)\s*--\s*(\d+)$").unwrap();
}

/// Share of upper-case letters among all letters.
pub fn percent_upper_chars(input: &str) -> f64 {
    let letters: Vec<char> = input.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return 0.0;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    upper as f64 / letters.len() as f64
}

type Checker = fn(&Record) -> Vec<String>;

fn missing(record: &Record) -> Vec<String> {
    fields::required_fields(&record.entrytype)
        .iter()
        .filter(|key| record.known(key).is_none())
        .map(|key| key.to_string())
        .collect()
}

fn inconsistent_with_entrytype(record: &Record) -> Vec<String> {
    fields::inconsistent_fields(&record.entrytype)
        .iter()
        .filter(|key| record.known(key).is_some())
        .map(|key| key.to_string())
        .collect()
}

fn mostly_all_caps(record: &Record) -> Vec<String> {
    [fields::TITLE, fields::AUTHOR, fields::JOURNAL, fields::BOOKTITLE]
        .iter()
        .filter(|key| {
            record.known(key).is_some_and(|value| {
                value.chars().filter(|c| c.is_alphabetic()).count() > 6
                    && percent_upper_chars(value) > 0.8
            })
        })
        .map(|key| key.to_string())
        .collect()
}

fn page_range(record: &Record) -> Vec<String> {
    let Some(pages) = record.known(fields::PAGES) else {
        return Vec::new();
    };
    let reversed = PAGE_RANGE.captures(pages).is_some_and(|caps| {
        let from: u64 = caps[1].parse().unwrap_or(0);
        let to: u64 = caps[2].parse().unwrap_or(u64::MAX);
        from > to
    });
    if reversed {
        vec![fields::PAGES.to_string()]
    } else {
        Vec::new()
    }
}

fn year_format(record: &Record) -> Vec<String> {
    match record.known(fields::YEAR) {
        Some(year) if !YEAR_PATTERN.is_match(year) => vec![fields::YEAR.to_string()],
        _ => Vec::new(),
    }
}

fn name_format_separators(record: &Record) -> Vec<String> {
    [fields::AUTHOR, fields::EDITOR]
        .iter()
        .filter(|key| {
            record.known(key).is_some_and(|value| {
                let trimmed = value.trim_end();
                value.contains(';')
                    || trimmed.ends_with(" and")
                    || trimmed.starts_with("and ")
                    || value.contains(" and and ")
            })
        })
        .map(|key| key.to_string())
        .collect()
}

fn container_title_abbreviated(record: &Record) -> Vec<String> {
    [fields::JOURNAL, fields::BOOKTITLE]
        .iter()
        .filter(|key| {
            record.known(key).is_some_and(|value| {
                let words: Vec<&str> = value.split_whitespace().collect();
                !words.is_empty()
                    && words.iter().any(|w| w.ends_with('.'))
                    && words.iter().all(|w| w.chars().count() <= 5)
            })
        })
        .map(|key| key.to_string())
        .collect()
}

fn doi_not_matching_pattern(record: &Record) -> Vec<String> {
    match record.known(fields::DOI) {
        Some(doi) if !DOI_PATTERN.is_match(doi) => vec![fields::DOI.to_string()],
        _ => Vec::new(),
    }
}

fn html_tags(record: &Record) -> Vec<String> {
    [fields::TITLE, fields::AUTHOR, fields::JOURNAL, fields::BOOKTITLE]
        .iter()
        .filter(|key| record.known(key).is_some_and(|v| HTML_TAG.is_match(v)))
        .map(|key| key.to_string())
        .collect()
}

fn thesis_with_multiple_authors(record: &Record) -> Vec<String> {
    let is_thesis = matches!(
        record.entrytype.as_str(),
        "phdthesis" | "mastersthesis" | "thesis"
    );
    match record.known(fields::AUTHOR) {
        Some(author) if is_thesis && author.contains(" and ") => vec![fields::AUTHOR.to_string()],
        _ => Vec::new(),
    }
}

const CHECKERS: &[(DefectCode, Checker)] = &[
    (DefectCode::Missing, missing),
    (DefectCode::InconsistentWithEntrytype, inconsistent_with_entrytype),
    (DefectCode::MostlyAllCaps, mostly_all_caps),
    (DefectCode::PageRange, page_range),
    (DefectCode::YearFormat, year_format),
    (DefectCode::NameFormatSeparators, name_format_separators),
    (DefectCode::ContainerTitleAbbreviated, container_title_abbreviated),
    (DefectCode::DoiNotMatchingPattern, doi_not_matching_pattern),
    (DefectCode::HtmlTags, html_tags),
    (DefectCode::ThesisWithMultipleAuthors, thesis_with_multiple_authors),
];

/// Runs every checker against the record. Curated records are left alone.
pub fn run_quality_model(record: &mut Record) {
    if record.masterdata_is_curated() {
        return;
    }
    for (code, checker) in CHECKERS {
        let flagged = checker(record);
        let stale: Vec<String> = record
            .masterdata_provenance
            .iter()
            .chain(record.data_provenance.iter())
            .filter(|(key, entry)| entry.defects().contains(code) && !flagged.contains(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            record.remove_provenance_note(&key, code.as_str());
        }
        for key in flagged {
            let source = record
                .provenance_for(&key)
                .map(|p| p.source.clone())
                .unwrap_or_else(|| QUALITY_MODEL_SOURCE.to_string());
            if fields::is_masterdata(&key) || *code == DefectCode::Missing {
                record.add_masterdata_provenance_note(&key, code.as_str(), &source);
            } else {
                record.add_data_provenance_note(&key, code.as_str(), &source);
            }
        }
    }
    drop_empty_missing_entries(record);
}

/// Provenance entries created for a missing field disappear once nothing is left in them.
fn drop_empty_missing_entries(record: &mut Record) {
    let empty: Vec<String> = record
        .masterdata_provenance
        .iter()
        .filter(|(key, entry)| {
            entry.note.is_empty()
                && entry.source == QUALITY_MODEL_SOURCE
                && record.get(key).map_or(true, |v| v == UNKNOWN)
        })
        .map(|(key, _)| key.clone())
        .collect();
    for key in empty {
        record.masterdata_provenance.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article() -> Record {
        let mut record = Record::new("Doe2021", "article");
        for (key, value) in [
            ("author", "Doe, John"),
            ("title", "Digital platforms"),
            ("journal", "MIS Quarterly"),
            ("year", "2021"),
            ("volume", "45"),
        ] {
            record.update_field(key, value, "search.bib/1", "").unwrap();
        }
        record
    }

    #[test]
    fn missing_fields_are_flagged_and_cleared() {
        let mut record = article();
        run_quality_model(&mut record);
        assert_eq!(
            record.defects(),
            vec![("number".to_string(), DefectCode::Missing)]
        );

        record.update_field("number", "2", "manual", "").unwrap();
        run_quality_model(&mut record);
        assert!(!record.has_quality_defects());
    }

    #[test]
    fn caps_and_year_format() {
        let mut record = article();
        record.update_field("number", "2", "src", "").unwrap();
        record.update_field("title", "DIGITAL PLATFORMS", "src", "").unwrap();
        record.update_field("year", "21", "src", "").unwrap();
        run_quality_model(&mut record);
        let defects: Vec<DefectCode> = record.defects().into_iter().map(|(_, d)| d).collect();
        assert!(defects.contains(&DefectCode::MostlyAllCaps));
        assert!(defects.contains(&DefectCode::YearFormat));
    }

    #[test]
    fn abbreviated_container_and_bad_doi() {
        let mut record = article();
        record.update_field("number", "2", "src", "").unwrap();
        record.update_field("journal", "MIS Q.", "src", "").unwrap();
        record.update_field("doi", "doi.org/10.1", "src", "").unwrap();
        run_quality_model(&mut record);
        let defects = record.defects();
        assert!(defects.contains(&("journal".to_string(), DefectCode::ContainerTitleAbbreviated)));
        assert!(defects.contains(&("doi".to_string(), DefectCode::DoiNotMatchingPattern)));
    }

    #[test]
    fn upper_share() {
        assert!(percent_upper_chars("ABC def") == 0.5);
        assert_eq!(percent_upper_chars("123"), 0.0);
    }
}
