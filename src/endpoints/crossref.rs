//! Crossref metadata for records with a DOI or a searchable title.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{async_trait, fuse_retrieved, EndpointError, PrepEndpoint, USER_AGENT};
use crate::environment::Environment;
use crate::matcher::find_best_match;
use crate::record::{fields, Record};

const CROSSREF_API_BASE: &str = "https://api.crossref.org/works";
const CACHE_API: &str = "crossref";

pub struct CrossrefPrep {
    client: Client,
    environment: Arc<Environment>,
}

impl CrossrefPrep {
    pub fn new(environment: Arc<Environment>) -> Result<Self, EndpointError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, environment })
    }

    /// Cached GET; `None` for 404.
    async fn fetch(&self, url: &str) -> Result<Option<Value>, EndpointError> {
        if let Some(cached) = self.environment.cache().get::<Value>(CACHE_API, url) {
            return Ok(Some(cached));
        }
        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::TOO_MANY_REQUESTS => return Err(EndpointError::RateLimited("Crossref")),
            _ => {}
        }
        let value: Value = response.error_for_status()?.json().await?;
        if let Err(e) = self.environment.cache().set(CACHE_API, url, &value) {
            debug!("crossref cache: {e}");
        }
        Ok(Some(value))
    }

    async fn by_doi(&self, doi: &str) -> Result<Option<Record>, EndpointError> {
        let url = format!("{CROSSREF_API_BASE}/{}", urlencoding::encode(doi));
        let Some(value) = self.fetch(&url).await? else {
            return Ok(None);
        };
        Ok(parse_response(value)?.into_iter().next())
    }

    async fn by_title(&self, title: &str) -> Result<Vec<Record>, EndpointError> {
        let url = format!(
            "{CROSSREF_API_BASE}?query.bibliographic={}&rows=5",
            urlencoding::encode(title)
        );
        match self.fetch(&url).await? {
            Some(value) => parse_response(value),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CrossrefResponse {
    status: String,
    message: CrossrefMessage,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CrossrefMessage {
    Search { items: Vec<CrossrefWork> },
    Single(CrossrefWork),
}

#[derive(Debug, Deserialize)]
struct CrossrefWork {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    author: Vec<CrossrefAuthor>,
    #[serde(rename = "container-title", default)]
    container_title: Vec<String>,
    published: Option<CrossrefDate>,
    #[serde(rename = "published-print")]
    published_print: Option<CrossrefDate>,
    #[serde(rename = "published-online")]
    published_online: Option<CrossrefDate>,
    #[serde(rename = "type")]
    work_type: Option<String>,
    volume: Option<String>,
    issue: Option<String>,
    page: Option<String>,
    publisher: Option<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossrefAuthor {
    given: Option<String>,
    family: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossrefDate {
    #[serde(rename = "date-parts")]
    date_parts: Option<Vec<Vec<Option<i32>>>>,
}

impl CrossrefDate {
    fn year(&self) -> Option<i32> {
        self.date_parts.as_ref()?.first()?.first().copied().flatten()
    }
}

fn entrytype_for(work_type: Option<&str>) -> &'static str {
    match work_type {
        Some("journal-article") => "article",
        Some("proceedings-article") => "inproceedings",
        Some("book-chapter") => "inbook",
        Some("book") | Some("monograph") => "book",
        Some("report") => "techreport",
        Some("dissertation") => "phdthesis",
        _ => "misc",
    }
}

impl CrossrefWork {
    fn to_record(&self) -> Record {
        let entrytype = entrytype_for(self.work_type.as_deref());
        let mut record = Record::new(self.doi.as_deref().unwrap_or("crossref"), entrytype);
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
                record.fields.insert(key.to_string(), value);
            }
        };

        put(fields::TITLE, self.title.first().cloned());
        let authors: Vec<String> = self
            .author
            .iter()
            .filter_map(|a| match (&a.family, &a.given, &a.name) {
                (Some(family), Some(given), _) => Some(format!("{family}, {given}")),
                (Some(family), None, _) => Some(family.clone()),
                (None, _, Some(name)) => Some(super::format_person_name(name)),
                _ => None,
            })
            .collect();
        put(fields::AUTHOR, Some(authors.join(" and ")));
        let container = match entrytype {
            "article" => fields::JOURNAL,
            "inproceedings" | "inbook" => fields::BOOKTITLE,
            _ => "container_title",
        };
        put(container, self.container_title.first().cloned());
        let year = self
            .published
            .as_ref()
            .or(self.published_print.as_ref())
            .or(self.published_online.as_ref())
            .and_then(CrossrefDate::year);
        put(fields::YEAR, year.map(|y| y.to_string()));
        put(fields::VOLUME, self.volume.clone());
        put(fields::NUMBER, self.issue.clone());
        put(fields::PAGES, self.page.as_ref().map(|p| p.replace("--", "-").replace('-', "--")));
        put(fields::DOI, self.doi.as_ref().map(|d| d.to_uppercase()));
        put(fields::PUBLISHER, self.publisher.clone());
        put(fields::URL, self.url.clone());
        record
    }
}

fn parse_response(value: Value) -> Result<Vec<Record>, EndpointError> {
    let response: CrossrefResponse =
        serde_json::from_value(value).map_err(|e| EndpointError::Parse(format!("crossref: {e}")))?;
    if response.status != "ok" {
        return Ok(Vec::new());
    }
    Ok(match response.message {
        CrossrefMessage::Single(work) => vec![work.to_record()],
        CrossrefMessage::Search { items } => items.iter().map(CrossrefWork::to_record).collect(),
    })
}

#[async_trait]
impl PrepEndpoint for CrossrefPrep {
    fn name(&self) -> &'static str {
        "colrev.crossref"
    }

    fn source_correction_hint(&self) -> &'static str {
        "ask the publisher to correct the metadata (see https://www.crossref.org/blog/metadata-corrections-updates-and-additions-in-metadata-manager/)"
    }

    fn always_apply_changes(&self) -> bool {
        false
    }

    async fn prepare(&self, mut record: Record) -> Result<Record, EndpointError> {
        let retrieved = if let Some(doi) = record.known(fields::DOI).map(String::from) {
            self.by_doi(&doi).await?
        } else if let Some(title) = record.known(fields::TITLE).map(String::from) {
            let candidates = self.by_title(&title).await?;
            find_best_match(&record, &candidates).map(|(best, _)| best.clone())
        } else {
            None
        };
        let Some(retrieved) = retrieved else {
            return Ok(record);
        };
        let source = match retrieved.get(fields::DOI) {
            Some(doi) => format!("{CROSSREF_API_BASE}/{doi}"),
            None => CROSSREF_API_BASE.to_string(),
        };
        let doi_differs = record
            .known(fields::DOI)
            .is_some_and(|doi| !retrieved.get(fields::DOI).is_some_and(|r| r.eq_ignore_ascii_case(doi)));
        if doi_differs {
            warn!("{}: crossref returned a different DOI", record.id);
            return Ok(record);
        }
        fuse_retrieved(&mut record, &retrieved, &source);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn work() -> Value {
        json!({
            "DOI": "10.1111/j.1365-2575.2009.00325.x",
            "title": ["Understanding managerial agency"],
            "author": [
                {"given": "Lorraine", "family": "Staehr"},
                {"name": "Graeme Shanks"}
            ],
            "container-title": ["Information Systems Journal"],
            "published-print": {"date-parts": [[2010, 5]]},
            "type": "journal-article",
            "volume": "20",
            "issue": "3",
            "page": "213-238"
        })
    }

    #[test]
    fn parses_single_work() {
        let records = parse_response(json!({"status": "ok", "message": work()})).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.entrytype, "article");
        assert_eq!(record.get(fields::AUTHOR), Some("Staehr, Lorraine and Shanks, Graeme"));
        assert_eq!(record.get(fields::JOURNAL), Some("Information Systems Journal"));
        assert_eq!(record.get(fields::YEAR), Some("2010"));
        assert_eq!(record.get(fields::NUMBER), Some("3"));
        assert_eq!(record.get(fields::PAGES), Some("213--238"));
        assert_eq!(record.get(fields::DOI), Some("10.1111/J.1365-2575.2009.00325.X"));
    }

    #[test]
    fn parses_search_results_and_errors() {
        let records = parse_response(json!({"status": "ok", "message": {"items": [work(), work()]}})).unwrap();
        assert_eq!(records.len(), 2);
        assert!(parse_response(json!({"status": "failed", "message": {"items": []}}))
            .unwrap()
            .is_empty());
        assert!(matches!(parse_response(json!({"nope": 1})), Err(EndpointError::Parse(_))));
    }

    #[test]
    fn work_types() {
        assert_eq!(entrytype_for(Some("proceedings-article")), "inproceedings");
        assert_eq!(entrytype_for(Some("posted-content")), "misc");
        assert_eq!(entrytype_for(None), "misc");
    }
}
