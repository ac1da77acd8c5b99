//! Fusion of duplicate records.

use lazy_static::lazy_static;
use regex::Regex;

use super::fields::{self, UNKNOWN};
use super::provenance::ProvenanceEntry;
use super::quality::percent_upper_chars;
use super::{Record, RecordError};

lazy_static! {
    static ref TRAILING_PART: Regex = Regex::new(r"part [a-z0-9]+$").unwrap();
}

const TERMS_REQUIRED_TO_MATCH: &[&str] = &[
    "erratum",
    "correction",
    "corrigendum",
    "comment",
    "commentary",
    "response",
];

/// Fields that keep the main record's value whenever it has one.
const KEEP_EXISTING: &[&str] = &[fields::SCREENING_CRITERIA, fields::PRESCREEN_EXCLUSION, fields::PDF_ID];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Winner {
    Main,
    Other,
}

fn check_mergeable(main: &Record, other: &Record) -> Result<(), RecordError> {
    let title_a = main.get(fields::TITLE).unwrap_or("").to_lowercase();
    let title_b = other.get(fields::TITLE).unwrap_or("").to_lowercase();
    let invalid = |reason: &str| RecordError::InvalidMerge {
        main: main.id.clone(),
        other: other.id.clone(),
        reason: reason.to_string(),
    };

    let part_a = TRAILING_PART.find(title_a.trim()).map(|m| m.as_str().to_string());
    let part_b = TRAILING_PART.find(title_b.trim()).map(|m| m.as_str().to_string());
    if part_a != part_b {
        return Err(invalid("titles refer to different parts"));
    }

    let terms_a: Vec<&str> = TERMS_REQUIRED_TO_MATCH
        .iter()
        .copied()
        .filter(|t| title_a.contains(t))
        .collect();
    let terms_b: Vec<&str> = TERMS_REQUIRED_TO_MATCH
        .iter()
        .copied()
        .filter(|t| title_b.contains(t))
        .collect();
    if terms_a != terms_b {
        return Err(invalid("only one record is an erratum, comment or response"));
    }
    Ok(())
}

fn select_winner(
    key: &str,
    main: &Record,
    other: &Record,
    main_rank: u8,
    other_rank: u8,
) -> Winner {
    let mine = main.get(key).unwrap_or("").trim();
    let theirs = other.get(key).unwrap_or("").trim();

    if theirs.is_empty() || theirs == UNKNOWN {
        return Winner::Main;
    }
    if mine.is_empty() || mine == UNKNOWN {
        return Winner::Other;
    }
    if other_rank != main_rank {
        return if other_rank > main_rank {
            Winner::Other
        } else {
            Winner::Main
        };
    }

    match (main.field_has_defect(key), other.field_has_defect(key)) {
        (true, false) => return Winner::Other,
        (false, true) => return Winner::Main,
        _ => {}
    }

    match key {
        fields::AUTHOR | fields::TITLE => {
            let mine_upper = percent_upper_chars(mine) > 0.8;
            let theirs_upper = percent_upper_chars(theirs) > 0.8;
            if mine_upper != theirs_upper {
                return if mine_upper { Winner::Other } else { Winner::Main };
            }
        }
        fields::JOURNAL | fields::BOOKTITLE => {
            let mine_abbr = mine.contains('.');
            let theirs_abbr = theirs.contains('.');
            if mine_abbr != theirs_abbr {
                return if mine_abbr { Winner::Other } else { Winner::Main };
            }
        }
        fields::PAGES => {
            if theirs.contains("--") && !mine.contains("--") {
                return Winner::Other;
            }
            return Winner::Main;
        }
        _ => {}
    }

    if theirs.chars().count() > mine.chars().count() {
        Winner::Other
    } else {
        Winner::Main
    }
}

impl Record {
    /// Merges a duplicate into this record.
    ///
    /// `default_source` stands in for fields of `other` that carry no provenance.
    pub fn merge(&mut self, other: &Record, default_source: &str) -> Result<(), RecordError> {
        check_mergeable(self, other)?;

        let main_rank = self.masterdata_quality();
        let other_rank = other.masterdata_quality();
        let main_curated = self.masterdata_is_curated();
        let other_curated = other.masterdata_is_curated();
        let marker = format!("merged-from:{}", other.id);

        for origin in &other.origin {
            self.add_origin(origin);
        }
        for cid in &other.colrev_id {
            if !self.colrev_id.contains(cid) {
                self.colrev_id.push(cid.clone());
            }
        }
        self.status = self.status.min(other.status);

        if other_curated && !main_curated {
            let masterdata: Vec<String> = self
                .fields
                .keys()
                .filter(|k| fields::is_masterdata(k))
                .cloned()
                .collect();
            for key in masterdata {
                self.fields.remove(&key);
            }
            for (key, value) in other.data_fields().filter(|(k, _)| fields::is_masterdata(k)) {
                self.fields.insert(key.clone(), value.clone());
            }
            self.masterdata_provenance = other.masterdata_provenance.clone();
            self.entrytype = other.entrytype.clone();
        } else if !main_curated
            && fields::is_generic_entrytype(&self.entrytype)
            && !fields::is_generic_entrytype(&other.entrytype)
        {
            self.entrytype = other.entrytype.clone();
        }

        for (key, value) in other.data_fields() {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let masterdata = fields::is_masterdata(key);
            if masterdata && (main_curated || other_curated) {
                continue;
            }
            if key == fields::FILE {
                self.merge_file(value);
                continue;
            }
            let other_prov = other
                .provenance_for(key)
                .cloned()
                .unwrap_or_else(|| ProvenanceEntry::new(default_source, ""));

            let existing = self.get(key).map(str::to_string);
            match existing {
                None => {
                    self.fields.insert(key.clone(), value.to_string());
                    self.provenance_map(key).insert(key.clone(), other_prov);
                }
                Some(existing) if existing.trim() == value => {}
                Some(_) if KEEP_EXISTING.contains(&key.as_str()) => {}
                Some(_) => {
                    match select_winner(key, self, other, main_rank, other_rank) {
                        Winner::Other => {
                            self.fields.insert(key.clone(), value.to_string());
                            let mut prov = other_prov;
                            prov.add_note(&marker);
                            self.provenance_map(key).insert(key.clone(), prov);
                        }
                        Winner::Main => {
                            self.provenance_map(key).add_note(key, &marker, default_source);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn provenance_map(&mut self, key: &str) -> &mut super::Provenance {
        if fields::is_masterdata(key) {
            &mut self.masterdata_provenance
        } else {
            &mut self.data_provenance
        }
    }

    fn merge_file(&mut self, value: &str) {
        let mut files: Vec<String> = self
            .get(fields::FILE)
            .map(|f| f.split(';').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        for file in value.split(';').map(str::trim) {
            if !file.is_empty() && !files.iter().any(|f| f == file) {
                files.push(file.to_string());
            }
        }
        files.retain(|f| !f.is_empty());
        self.fields.insert(fields::FILE.to_string(), files.join(";"));
        if !self.data_provenance.contains_key(fields::FILE) {
            self.data_provenance
                .insert(fields::FILE, ProvenanceEntry::new("merge", ""));
        }
    }
}
