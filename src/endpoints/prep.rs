//! Built-in metadata preparation endpoints.

use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

use super::{async_trait, fuse_retrieved, EndpointError, PrepEndpoint, SearchSourceEndpoint};
use crate::environment::Environment;
use crate::local_index::LocalIndexError;
use crate::parser::extract_year_from_string;
use crate::record::quality::percent_upper_chars;
use crate::record::{fields, ColrevIdAuthors, DefectCode, Record};

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref PAGE_RANGE: Regex = Regex::new(r"^\s*(\w+)\s*(?:-+|–|—)\s*(\w+)\s*$").unwrap();
    static ref DBLP_AUTHOR_ID: Regex = Regex::new(r"\s[0-9]{4}\b").unwrap();
    static ref DOI_PREFIX: Regex = Regex::new(r"^(?i)(https?://(dx\.)?doi\.org/|doi:\s*)").unwrap();
    static ref BOOKTITLE_NOISE: Regex =
        Regex::new(r"\b\d{4}\b|\b\d{1,2}(st|nd|rd|th)\b|\([A-Z]{3,6}\)|Proceedings of the|Proceedings").unwrap();
}

const SMALL_WORDS: &[&str] = &["of", "for", "the", "and", "in", "on", "a", "an", "to"];
const TOC_SIMILARITY: f64 = 0.9;

/// Runs the `prepare` of the search source each origin came from.
pub struct SourceSpecificPrep {
    sources: Vec<(String, Arc<dyn SearchSourceEndpoint>)>,
}

impl SourceSpecificPrep {
    pub fn new(sources: Vec<(String, Arc<dyn SearchSourceEndpoint>)>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl PrepEndpoint for SourceSpecificPrep {
    fn name(&self) -> &'static str {
        "colrev.source_specific_prep"
    }

    fn source_correction_hint(&self) -> &'static str {
        "check the search source"
    }

    fn always_apply_changes(&self) -> bool {
        true
    }

    async fn prepare(&self, mut record: Record) -> Result<Record, EndpointError> {
        let origins = record.origin.clone();
        for (prefix, source) in &self.sources {
            if origins.iter().any(|o| o.starts_with(&format!("{prefix}/"))) {
                record = source.prepare(record);
            }
        }
        Ok(record)
    }
}

fn title_case(value: &str) -> String {
    value
        .split(' ')
        .enumerate()
        .map(|(i, word)| {
            let lower = word.to_lowercase();
            if i > 0 && SMALL_WORDS.contains(&lower.as_str()) {
                return lower;
            }
            match lower.as_str() {
                "ieee" | "acm" | "ais" => lower.to_uppercase(),
                _ => capitalize(&lower),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(value: &str) -> String {
    let lower = value.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn format_author(value: &str) -> String {
    let value = DBLP_AUTHOR_ID.replace_all(value, "");
    let value = WHITESPACE.replace_all(&value, " ");
    let names: Vec<String> = if value.contains(" and ") {
        value.split(" and ").map(|n| n.trim().to_string()).collect()
    } else if value.contains(';') {
        value.split(';').map(|n| n.trim().to_string()).collect()
    } else {
        vec![value.trim().to_string()]
    };
    names
        .into_iter()
        .filter(|n| !n.is_empty())
        .map(|name| {
            let name = super::format_person_name(&name);
            if percent_upper_chars(&name) > 0.8 {
                name.split(' ').map(capitalize).collect::<Vec<_>>().join(" ")
            } else {
                name
            }
        })
        .collect::<Vec<_>>()
        .join(" and ")
}

/// `12-34`, `12 – 34` to `12--34`.
pub fn unify_pages(value: &str) -> String {
    match PAGE_RANGE.captures(value) {
        Some(caps) => format!("{}--{}", &caps[1], &caps[2]),
        None => value.trim().to_string(),
    }
}

/// Normalizes formatting of the masterdata fields.
pub struct FormatPrep;

impl FormatPrep {
    const SOURCE: &'static str = "colrev.format";

    fn update(record: &mut Record, key: &str, value: String) {
        if record.get(key) == Some(value.as_str()) {
            return;
        }
        if let Err(e) = record.update_field(key, &value, Self::SOURCE, "") {
            debug!("{e}");
        }
    }

    fn format(mut record: Record) -> Record {
        if let Some(author) = record.known(fields::AUTHOR).map(String::from) {
            Self::update(&mut record, fields::AUTHOR, format_author(&author));
        }
        if let Some(title) = record.known(fields::TITLE).map(String::from) {
            let mut title = WHITESPACE.replace_all(&title, " ").trim_end_matches('.').trim().to_string();
            if percent_upper_chars(&title) > 0.8 {
                title = capitalize(&title);
            }
            Self::update(&mut record, fields::TITLE, title);
        }
        if let Some(booktitle) = record.known(fields::BOOKTITLE).map(String::from) {
            let mut booktitle = WHITESPACE.replace_all(&booktitle, " ").to_string();
            if percent_upper_chars(&booktitle) > 0.8 {
                booktitle = title_case(&booktitle);
            }
            let stripped = BOOKTITLE_NOISE.replace_all(&booktitle, "");
            let stripped = WHITESPACE.replace_all(stripped.trim(), " ").to_string();
            if !stripped.is_empty() {
                booktitle = stripped;
            }
            Self::update(&mut record, fields::BOOKTITLE, booktitle);
        }
        if let Some(journal) = record.known(fields::JOURNAL).map(String::from) {
            let mut journal = WHITESPACE.replace_all(&journal, " ").trim().to_string();
            if journal.len() > 10 && percent_upper_chars(&journal) > 0.8 {
                journal = title_case(&journal);
            }
            Self::update(&mut record, fields::JOURNAL, journal);
        }
        if !record.contains(fields::YEAR) {
            if let Some(year) = record.get("date").and_then(extract_year_from_string) {
                Self::update(&mut record, fields::YEAR, year.to_string());
            }
        }
        if let Some(pages) = record.known(fields::PAGES).map(String::from) {
            if pages == "N.PAG" {
                record.remove_field(fields::PAGES);
            } else {
                Self::update(&mut record, fields::PAGES, unify_pages(&pages));
            }
        }
        if let Some(volume) = record.known(fields::VOLUME).map(String::from) {
            Self::update(&mut record, fields::VOLUME, volume.replace("Volume ", "").trim().to_string());
        }
        if let Some(language) = record.get(fields::LANGUAGE).map(String::from) {
            let language = match language.to_lowercase().as_str() {
                "en" | "english" | "eng" => "eng".to_string(),
                "de" | "german" | "deu" | "ger" => "deu".to_string(),
                _ => language,
            };
            Self::update(&mut record, fields::LANGUAGE, language);
        }
        if let Some(doi) = record.get(fields::DOI).map(String::from) {
            Self::update(&mut record, fields::DOI, DOI_PREFIX.replace(doi.trim(), "").to_uppercase());
        }
        if record.get(fields::URL).is_some() && record.get(fields::URL) == record.get("fulltext") {
            record.remove_field("fulltext");
        }
        record
    }
}

#[async_trait]
impl PrepEndpoint for FormatPrep {
    fn name(&self) -> &'static str {
        "colrev.format"
    }

    fn source_correction_hint(&self) -> &'static str {
        "check with the developer"
    }

    fn always_apply_changes(&self) -> bool {
        true
    }

    async fn prepare(&self, record: Record) -> Result<Record, EndpointError> {
        Ok(Self::format(record))
    }
}

/// Metadata from other projects on this machine.
pub struct LocalIndexPrep {
    environment: Arc<Environment>,
    authors: ColrevIdAuthors,
}

impl LocalIndexPrep {
    const SOURCE: &'static str = "colrev.local_index";

    pub fn new(environment: Arc<Environment>, authors: ColrevIdAuthors) -> Self {
        Self { environment, authors }
    }
}

#[async_trait]
impl PrepEndpoint for LocalIndexPrep {
    fn name(&self) -> &'static str {
        "colrev.local_index"
    }

    fn source_correction_hint(&self) -> &'static str {
        "correct the metadata in the source repository (see curation_ID)"
    }

    fn always_apply_changes(&self) -> bool {
        true
    }

    async fn prepare(&self, mut record: Record) -> Result<Record, EndpointError> {
        let index = self.environment.local_index();
        let retrieved = match index.retrieve(&record, self.authors, false, false) {
            Ok(found) => Some(found),
            Err(LocalIndexError::RecordNotInIndex(_)) => {
                match index.retrieve_from_toc(&record, self.authors, TOC_SIMILARITY, false) {
                    Ok(found) => Some(found),
                    Err(LocalIndexError::RecordNotInToc { .. }) => {
                        let container = if record.entrytype == "article" {
                            fields::JOURNAL
                        } else {
                            fields::BOOKTITLE
                        };
                        record.add_masterdata_provenance_note(
                            container,
                            DefectCode::RecordNotInToc.as_str(),
                            Self::SOURCE,
                        );
                        None
                    }
                    Err(LocalIndexError::RecordNotInIndex(_)) => None,
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        match retrieved {
            Some(found) if found.masterdata_is_curated() => {
                record.merge(&found, Self::SOURCE)?;
            }
            Some(found) => fuse_retrieved(&mut record, &found, Self::SOURCE),
            None => {
                if record.known(fields::YEAR).is_none() {
                    if let Some(year) = index.get_year_from_toc(&record)? {
                        record.update_field(fields::YEAR, &year, Self::SOURCE, "")?;
                    }
                }
            }
        }
        Ok(record)
    }
}

/// Drops empty values, placeholders, and fields the venue does not use.
pub struct RemoveSpuriousFields {
    environment: Arc<Environment>,
}

impl RemoveSpuriousFields {
    pub fn new(environment: Arc<Environment>) -> Self {
        Self { environment }
    }
}

#[async_trait]
impl PrepEndpoint for RemoveSpuriousFields {
    fn name(&self) -> &'static str {
        "colrev.remove_spurious_fields"
    }

    fn source_correction_hint(&self) -> &'static str {
        "check with the developer"
    }

    fn always_apply_changes(&self) -> bool {
        false
    }

    async fn prepare(&self, mut record: Record) -> Result<Record, EndpointError> {
        let spurious: Vec<String> = record
            .data_fields()
            .filter(|(key, value)| {
                let value = value.trim();
                value.is_empty()
                    || value == "NA"
                    || (key.as_str() == fields::NUMBER && matches!(value, "0" | "-"))
                    || (key.as_str() == fields::PUBLISHER && value == "researchgate.net")
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in spurious {
            record.remove_field(&key);
        }
        if record.entrytype == "article" {
            if let (Some(journal), Some(booktitle)) = (record.get(fields::JOURNAL), record.get(fields::BOOKTITLE)) {
                if journal.eq_ignore_ascii_case(booktitle) {
                    record.remove_field(fields::BOOKTITLE);
                }
            }
        }
        for key in self.environment.local_index().get_fields_to_remove(&record)? {
            record.remove_field(&key);
            record.add_masterdata_provenance_note(&key, DefectCode::NotMissing.as_str(), "colrev.local_index");
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_index::IndexOptions;
    use crate::process::RecordState;
    use crate::record::Records;
    use std::path::Path;
    use tempfile::tempdir;

    #[tokio::test]
    async fn format_fixes_common_problems() {
        let record = Record::new("A", "inproceedings")
            .with(fields::AUTHOR, "STAEHR, LORRAINE and John Smith 0001")
            .with(fields::TITLE, "UNDERSTANDING MANAGERIAL AGENCY.")
            .with(fields::BOOKTITLE, "Proceedings of the 30th International Conference on Information Systems (ICIS)")
            .with(fields::PAGES, "12 - 34")
            .with(fields::DOI, "https://doi.org/10.1111/j.1365-2575")
            .with(fields::LANGUAGE, "English");
        let prepared = FormatPrep.prepare(record).await.unwrap();
        assert_eq!(prepared.get(fields::AUTHOR), Some("Staehr, Lorraine and Smith, John"));
        assert_eq!(prepared.get(fields::TITLE), Some("Understanding managerial agency"));
        assert_eq!(prepared.get(fields::BOOKTITLE), Some("International Conference on Information Systems"));
        assert_eq!(prepared.get(fields::PAGES), Some("12--34"));
        assert_eq!(prepared.get(fields::DOI), Some("10.1111/J.1365-2575"));
        assert_eq!(prepared.get(fields::LANGUAGE), Some("eng"));
        assert_eq!(
            prepared.provenance_for(fields::PAGES).map(|p| p.source.as_str()),
            Some("colrev.format")
        );
    }

    #[test]
    fn pages_and_case_helpers() {
        assert_eq!(unify_pages("1–10"), "1--10");
        assert_eq!(unify_pages("e12345"), "e12345");
        assert_eq!(title_case("JOURNAL OF THE AIS"), "Journal of the AIS");
    }

    fn curated_issue(env: &Environment) {
        let mut record = Record::new("Staehr2010", "article")
            .with(fields::AUTHOR, "Staehr, Lorraine")
            .with(fields::TITLE, "Understanding managerial agency")
            .with(fields::JOURNAL, "Information Systems Journal")
            .with(fields::VOLUME, "20")
            .with(fields::YEAR, "2010")
            .with(fields::PAGES, "213--238");
        record.status = RecordState::MdProcessed;
        let records: Records = [(record.id.clone(), record)].into_iter().collect();
        let options = IndexOptions {
            curated_masterdata: true,
            curation_url: Some("https://example.org/isj".into()),
            ..IndexOptions::default()
        };
        env.local_index()
            .index_records(&records, Path::new("/repos/isj"), &options)
            .unwrap();
    }

    #[tokio::test]
    async fn local_index_prep_adopts_curated_masterdata() {
        let dir = tempdir().unwrap();
        let env = Environment::open_at(dir.path()).unwrap();
        curated_issue(&env);

        let mut record = Record::new("X", "article")
            .with(fields::AUTHOR, "Staehr, L.")
            .with(fields::TITLE, "Understanding managerial agency")
            .with(fields::JOURNAL, "Information Systems Journal")
            .with(fields::VOLUME, "20")
            .with(fields::YEAR, "2010");
        record.status = RecordState::MdImported;
        record.origin = vec!["search.bib/1".into()];
        let prepared = LocalIndexPrep::new(Arc::clone(&env), ColrevIdAuthors::FirstAuthor).prepare(record).await.unwrap();
        assert!(prepared.masterdata_is_curated());
        assert_eq!(prepared.get(fields::PAGES), Some("213--238"));
        assert_eq!(prepared.origin, vec!["search.bib/1"]);

        let unknown = Record::new("Y", "article")
            .with(fields::AUTHOR, "Doe, Jane")
            .with(fields::TITLE, "Something else entirely")
            .with(fields::JOURNAL, "Information Systems Journal")
            .with(fields::VOLUME, "20")
            .with(fields::YEAR, "2010");
        let prepared = LocalIndexPrep::new(env, ColrevIdAuthors::FirstAuthor).prepare(unknown).await.unwrap();
        assert!(prepared
            .provenance_for(fields::JOURNAL)
            .is_some_and(|p| p.defects().contains(&DefectCode::RecordNotInToc)));
    }

    #[tokio::test]
    async fn spurious_fields_follow_the_toc() {
        let dir = tempdir().unwrap();
        let env = Environment::open_at(dir.path()).unwrap();
        curated_issue(&env);

        let record = Record::new("X", "article")
            .with(fields::TITLE, "Other paper")
            .with(fields::JOURNAL, "Information Systems Journal")
            .with(fields::VOLUME, "20")
            .with(fields::NUMBER, "3")
            .with(fields::YEAR, "2010")
            .with(fields::PUBLISHER, "researchgate.net")
            .with("note", "");
        let prepared = RemoveSpuriousFields::new(env).prepare(record).await.unwrap();
        assert!(prepared.get(fields::NUMBER).is_none());
        assert!(prepared.get(fields::PUBLISHER).is_none());
        assert!(prepared.get("note").is_none());
        assert!(prepared
            .provenance_for(fields::NUMBER)
            .is_some_and(|p| p.notes().contains(&"not-missing")));
    }
}
