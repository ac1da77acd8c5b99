use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::fields::CURATED;

/// Known quality defects recorded in provenance notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DefectCode {
    Missing,
    NotMissing,
    RecordNotInToc,
    InconsistentWithEntrytype,
    ContainerTitleAbbreviated,
    DoiNotMatchingPattern,
    ErroneousSymbolInField,
    ErroneousTermInField,
    ErroneousTitleField,
    HtmlTags,
    IncompleteField,
    InconsistentContent,
    InconsistentWithDoiMetadata,
    InconsistentWithUrlMetadata,
    IsbnNotMatchingPattern,
    LanguageFormatError,
    LanguageUnknown,
    MostlyAllCaps,
    NameAbbreviated,
    NameFormatSeparators,
    NameFormatTitles,
    NameParticles,
    PageRange,
    PubmedidNotMatchingPattern,
    ThesisWithMultipleAuthors,
    YearFormat,
    YearUnknown,
    Timeout,
}

impl DefectCode {
    pub const ALL: [DefectCode; 28] = [
        DefectCode::Missing,
        DefectCode::NotMissing,
        DefectCode::RecordNotInToc,
        DefectCode::InconsistentWithEntrytype,
        DefectCode::ContainerTitleAbbreviated,
        DefectCode::DoiNotMatchingPattern,
        DefectCode::ErroneousSymbolInField,
        DefectCode::ErroneousTermInField,
        DefectCode::ErroneousTitleField,
        DefectCode::HtmlTags,
        DefectCode::IncompleteField,
        DefectCode::InconsistentContent,
        DefectCode::InconsistentWithDoiMetadata,
        DefectCode::InconsistentWithUrlMetadata,
        DefectCode::IsbnNotMatchingPattern,
        DefectCode::LanguageFormatError,
        DefectCode::LanguageUnknown,
        DefectCode::MostlyAllCaps,
        DefectCode::NameAbbreviated,
        DefectCode::NameFormatSeparators,
        DefectCode::NameFormatTitles,
        DefectCode::NameParticles,
        DefectCode::PageRange,
        DefectCode::PubmedidNotMatchingPattern,
        DefectCode::ThesisWithMultipleAuthors,
        DefectCode::YearFormat,
        DefectCode::YearUnknown,
        DefectCode::Timeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DefectCode::Missing => "missing",
            DefectCode::NotMissing => "not-missing",
            DefectCode::RecordNotInToc => "record-not-in-toc",
            DefectCode::InconsistentWithEntrytype => "inconsistent-with-entrytype",
            DefectCode::ContainerTitleAbbreviated => "container-title-abbreviated",
            DefectCode::DoiNotMatchingPattern => "doi-not-matching-pattern",
            DefectCode::ErroneousSymbolInField => "erroneous-symbol-in-field",
            DefectCode::ErroneousTermInField => "erroneous-term-in-field",
            DefectCode::ErroneousTitleField => "erroneous-title-field",
            DefectCode::HtmlTags => "html-tags",
            DefectCode::IncompleteField => "incomplete-field",
            DefectCode::InconsistentContent => "inconsistent-content",
            DefectCode::InconsistentWithDoiMetadata => "inconsistent-with-doi-metadata",
            DefectCode::InconsistentWithUrlMetadata => "inconsistent-with-url-metadata",
            DefectCode::IsbnNotMatchingPattern => "isbn-not-matching-pattern",
            DefectCode::LanguageFormatError => "language-format-error",
            DefectCode::LanguageUnknown => "language-unknown",
            DefectCode::MostlyAllCaps => "mostly-all-caps",
            DefectCode::NameAbbreviated => "name-abbreviated",
            DefectCode::NameFormatSeparators => "name-format-separators",
            DefectCode::NameFormatTitles => "name-format-titles",
            DefectCode::NameParticles => "name-particles",
            DefectCode::PageRange => "page-range",
            DefectCode::PubmedidNotMatchingPattern => "pubmedid-not-matching-pattern",
            DefectCode::ThesisWithMultipleAuthors => "thesis-with-multiple-authors",
            DefectCode::YearFormat => "year-format",
            DefectCode::YearUnknown => "year-unknown",
            DefectCode::Timeout => "timeout",
        }
    }
}

impl fmt::Display for DefectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DefectCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DefectCode::ALL
            .iter()
            .find(|code| code.as_str() == s)
            .copied()
            .ok_or(())
    }
}

/// A single entry of a provenance note list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Note {
    Defect(DefectCode),
    /// A defect the user chose to accept (`IGNORE:<defect>`).
    Ignored(String),
    MergedFrom(String),
    Other(String),
}

impl Note {
    pub fn parse(raw: &str) -> Note {
        if let Some(rest) = raw.strip_prefix("IGNORE:") {
            return Note::Ignored(rest.to_string());
        }
        if let Some(rest) = raw.strip_prefix("merged-from:") {
            return Note::MergedFrom(rest.to_string());
        }
        match raw.parse::<DefectCode>() {
            Ok(code) => Note::Defect(code),
            Err(()) => Note::Other(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub source: String,
    #[serde(default)]
    pub note: String,
}

impl ProvenanceEntry {
    pub fn new(source: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            note: note.into(),
        }
    }

    /// The comma-separated note split into its items.
    pub fn notes(&self) -> Vec<&str> {
        self.note
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .collect()
    }

    /// Adds a note item, keeping the list sorted and free of duplicates.
    pub fn add_note(&mut self, note: &str) {
        let mut notes: Vec<String> = self.notes().into_iter().map(String::from).collect();
        if notes.iter().any(|n| n == note) {
            return;
        }
        notes.push(note.to_string());
        notes.sort();
        self.note = notes.join(",");
    }

    pub fn remove_note(&mut self, note: &str) {
        let notes: Vec<&str> = self.notes().into_iter().filter(|n| *n != note).collect();
        self.note = notes.join(",");
    }

    pub fn defects(&self) -> Vec<DefectCode> {
        self.notes()
            .into_iter()
            .filter_map(|n| match Note::parse(n) {
                Note::Defect(code) => Some(code),
                _ => None,
            })
            .collect()
    }

    pub fn is_ignored(&self, defect: DefectCode) -> bool {
        let marker = format!("IGNORE:{defect}");
        self.notes().contains(&marker.as_str())
    }
}

/// Field name to provenance entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Provenance(BTreeMap<String, ProvenanceEntry>);

impl Provenance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn curated(source: impl Into<String>) -> Self {
        let mut prov = Self::new();
        prov.insert(CURATED, ProvenanceEntry::new(source, ""));
        prov
    }

    pub fn get(&self, key: &str) -> Option<&ProvenanceEntry> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut ProvenanceEntry> {
        self.0.get_mut(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: ProvenanceEntry) {
        self.0.insert(key.into(), entry);
    }

    pub fn remove(&mut self, key: &str) -> Option<ProvenanceEntry> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ProvenanceEntry)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn is_curated(&self) -> bool {
        self.0.contains_key(CURATED)
    }

    pub fn curation_source(&self) -> Option<&str> {
        self.0.get(CURATED).map(|e| e.source.as_str())
    }

    /// Adds a note to `key`, creating the entry with `source` if needed.
    pub fn add_note(&mut self, key: &str, note: &str, source: &str) {
        self.0
            .entry(key.to_string())
            .or_insert_with(|| ProvenanceEntry::new(source, ""))
            .add_note(note);
    }

    pub fn remove_note(&mut self, key: &str, note: &str) {
        if let Some(entry) = self.0.get_mut(key) {
            entry.remove_note(note);
        }
    }

    /// `(field, defect)` pairs that are not explicitly ignored.
    pub fn active_defects(&self) -> Vec<(String, DefectCode)> {
        self.0
            .iter()
            .flat_map(|(key, entry)| {
                entry
                    .defects()
                    .into_iter()
                    .filter(|d| !entry.is_ignored(*d))
                    .map(|d| (key.clone(), d))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl FromIterator<(String, ProvenanceEntry)> for Provenance {
    fn from_iter<I: IntoIterator<Item = (String, ProvenanceEntry)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
