use biblatex::{Bibliography, ChunksExt};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse BibTeX: {0}")]
    ParseError(String),
}

/// A raw entry of a search result file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchEntry {
    pub key: String,
    pub entrytype: String,
    pub fields: BTreeMap<String, String>,
}

impl SearchEntry {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Parse a search result file (`.bib`)
pub fn parse_search_file(path: &Path) -> Result<Vec<SearchEntry>, ParseError> {
    let content = fs::read_to_string(path)?;
    parse_bib_string(&content)
}

/// Parse a BibTeX string into raw search entries
pub fn parse_bib_string(content: &str) -> Result<Vec<SearchEntry>, ParseError> {
    let bibliography =
        Bibliography::parse(content).map_err(|e| ParseError::ParseError(e.to_string()))?;

    let mut entries = Vec::new();
    for bib_entry in bibliography.into_iter() {
        let mut fields = BTreeMap::new();
        for (name, chunks) in bib_entry.fields.iter() {
            let value = chunks.format_verbatim();
            let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
            if !value.is_empty() {
                fields.insert(name.to_lowercase(), value);
            }
        }

        // Fill a missing year from the date field
        if !fields.contains_key("year") {
            if let Some(year) = fields.get("date").and_then(|d| extract_year_from_string(d)) {
                fields.insert("year".to_string(), year.to_string());
            }
        }

        // Recover a DOI hidden in the URL
        if !fields.contains_key("doi") {
            if let Some(doi) = fields.get("url").and_then(|u| extract_doi_from_url(u)) {
                fields.insert("doi".to_string(), doi);
            }
        }

        entries.push(SearchEntry {
            key: bib_entry.key.clone(),
            entrytype: entry_type_name(&format!("{:?}", bib_entry.entry_type)),
            fields,
        });
    }

    Ok(entries)
}

/// Lower-cased type name from the `Debug` form, e.g. `Unknown("report")` -> `report`.
fn entry_type_name(debug: &str) -> String {
    let lower = debug.to_lowercase();
    match lower.strip_prefix("unknown(") {
        Some(rest) => rest.trim_end_matches(')').trim_matches('"').to_string(),
        None => lower,
    }
}

/// Extract a 4-digit year from a string
pub fn extract_year_from_string(s: &str) -> Option<i32> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(4).enumerate().find_map(|(i, window)| {
        let before_ok = i == 0 || !chars[i - 1].is_ascii_digit();
        let after_ok = chars.get(i + 4).map_or(true, |c| !c.is_ascii_digit());
        if !(before_ok && after_ok && window.iter().all(char::is_ascii_digit)) {
            return None;
        }
        let year: i32 = window.iter().collect::<String>().parse().ok()?;
        (1800..=2099).contains(&year).then_some(year)
    })
}

/// Extract DOI from a URL
pub fn extract_doi_from_url(url: &str) -> Option<String> {
    // https://doi.org/10.1234/example
    // https://dx.doi.org/10.1234/example
    let idx = url.find("doi.org/")?;
    let doi = &url[idx + 8..];
    doi.starts_with("10.").then(|| doi.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_year() {
        assert_eq!(extract_year_from_string("2021-03-04"), Some(2021));
        assert_eq!(extract_year_from_string("vol 12345"), None);
        assert_eq!(extract_year_from_string("no year"), None);
    }

    #[test]
    fn test_extract_doi_from_url() {
        assert_eq!(
            extract_doi_from_url("https://dx.doi.org/10.1234/example"),
            Some("10.1234/example".to_string())
        );
        assert_eq!(extract_doi_from_url("https://example.com"), None);
    }

    #[test]
    fn test_parse_search_file() {
        let bib = r#"
            @article{smith2021,
                author = {Smith, John and Doe, Jane},
                title = {A Great
                         Paper},
                journal = {Nature},
                year = {2021},
                url = {https://doi.org/10.1234/example}
            }
            @inproceedings{doe2020,
                author = {Doe, Jane},
                title = {Another Paper},
                booktitle = {ICIS},
                date = {2020-12-01}
            }
        "#;

        let entries = parse_bib_string(bib).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "smith2021");
        assert_eq!(entries[0].entrytype, "article");
        assert_eq!(entries[0].get("title"), Some("A Great Paper"));
        assert_eq!(entries[0].get("doi"), Some("10.1234/example"));
        assert_eq!(entries[1].entrytype, "inproceedings");
        assert_eq!(entries[1].get("year"), Some("2020"));
    }

    #[test]
    fn test_unknown_entry_type() {
        assert_eq!(entry_type_name("Unknown(\"dataset\")"), "dataset");
        assert_eq!(entry_type_name("TechReport"), "techreport");
    }
}
