//! DBLP metadata for computer science venues.

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{async_trait, format_person_name, fuse_retrieved, EndpointError, PrepEndpoint, USER_AGENT};
use crate::environment::Environment;
use crate::matcher::find_best_match;
use crate::record::{fields, Record};

const DBLP_API_BASE: &str = "https://dblp.org/search/publ/api";
const CACHE_API: &str = "dblp";

lazy_static! {
    static ref HOMONYM_SUFFIX: Regex = Regex::new(r"\s[0-9]{4}$").unwrap();
}

pub struct DblpPrep {
    client: Client,
    environment: Arc<Environment>,
}

impl DblpPrep {
    pub fn new(environment: Arc<Environment>) -> Result<Self, EndpointError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, environment })
    }

    async fn search(&self, query: &str) -> Result<Vec<Record>, EndpointError> {
        let url = format!("{DBLP_API_BASE}?q={}&format=json&h=5", urlencoding::encode(query));
        let value = match self.environment.cache().get::<Value>(CACHE_API, &url) {
            Some(cached) => cached,
            None => {
                let response = self.client.get(&url).send().await?;
                if response.status() == StatusCode::TOO_MANY_REQUESTS {
                    return Err(EndpointError::RateLimited("DBLP"));
                }
                let value: Value = response.error_for_status()?.json().await?;
                if let Err(e) = self.environment.cache().set(CACHE_API, &url, &value) {
                    debug!("dblp cache: {e}");
                }
                value
            }
        };
        parse_response(value)
    }
}

#[derive(Debug, Deserialize)]
struct DblpResponse {
    result: DblpResult,
}

#[derive(Debug, Deserialize)]
struct DblpResult {
    hits: Option<DblpHits>,
}

#[derive(Debug, Deserialize)]
struct DblpHits {
    hit: Option<Vec<DblpHit>>,
}

#[derive(Debug, Deserialize)]
struct DblpHit {
    info: DblpInfo,
}

#[derive(Debug, Deserialize)]
struct DblpInfo {
    key: Option<String>,
    title: Option<String>,
    authors: Option<DblpAuthors>,
    year: Option<String>,
    venue: Option<String>,
    volume: Option<String>,
    number: Option<String>,
    pages: Option<String>,
    doi: Option<String>,
    #[serde(rename = "type")]
    pub_type: Option<String>,
    ee: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DblpAuthors {
    author: DblpAuthorList,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DblpAuthorList {
    Single(DblpAuthor),
    Multiple(Vec<DblpAuthor>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DblpAuthor {
    Simple(String),
    Complex { text: String },
}

impl DblpAuthor {
    fn name(&self) -> String {
        let raw = match self {
            DblpAuthor::Simple(s) => s,
            DblpAuthor::Complex { text } => text,
        };
        format_person_name(&HOMONYM_SUFFIX.replace(raw, ""))
    }
}

impl DblpInfo {
    fn to_record(&self) -> Record {
        let entrytype = match self.pub_type.as_deref() {
            Some("Journal Articles") => "article",
            Some("Conference and Workshop Papers") => "inproceedings",
            Some("Parts in Books or Collections") => "inbook",
            Some("Books and Theses") => "book",
            _ => "misc",
        };
        let mut record = Record::new(self.key.as_deref().unwrap_or("dblp"), entrytype);
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
                record.fields.insert(key.to_string(), value);
            }
        };

        put(fields::TITLE, self.title.as_ref().map(|t| t.trim_end_matches('.').to_string()));
        let authors = self.authors.as_ref().map(|a| match &a.author {
            DblpAuthorList::Single(one) => one.name(),
            DblpAuthorList::Multiple(list) => list.iter().map(DblpAuthor::name).collect::<Vec<_>>().join(" and "),
        });
        put(fields::AUTHOR, authors);
        let container = if entrytype == "article" { fields::JOURNAL } else { fields::BOOKTITLE };
        put(container, self.venue.clone());
        put(fields::YEAR, self.year.clone());
        put(fields::VOLUME, self.volume.clone());
        put(fields::NUMBER, self.number.clone());
        put(fields::PAGES, self.pages.as_ref().map(|p| p.replace("--", "-").replace('-', "--")));
        put(fields::DOI, self.doi.as_ref().map(|d| d.to_uppercase()));
        put(fields::URL, self.ee.clone());
        put(fields::DBLP_KEY, self.key.as_ref().map(|k| format!("https://dblp.org/rec/{k}")));
        record
    }
}

fn parse_response(value: Value) -> Result<Vec<Record>, EndpointError> {
    let response: DblpResponse =
        serde_json::from_value(value).map_err(|e| EndpointError::Parse(format!("dblp: {e}")))?;
    Ok(response
        .result
        .hits
        .and_then(|h| h.hit)
        .map(|hits| hits.iter().map(|h| h.info.to_record()).collect())
        .unwrap_or_default())
}

#[async_trait]
impl PrepEndpoint for DblpPrep {
    fn name(&self) -> &'static str {
        "colrev.dblp"
    }

    fn source_correction_hint(&self) -> &'static str {
        "send an email to dblp@dagstuhl.de"
    }

    fn always_apply_changes(&self) -> bool {
        false
    }

    async fn prepare(&self, mut record: Record) -> Result<Record, EndpointError> {
        if record.known(fields::DBLP_KEY).is_some() {
            return Ok(record);
        }
        let Some(title) = record.known(fields::TITLE).map(String::from) else {
            return Ok(record);
        };
        let candidates = self.search(&title).await?;
        if let Some((best, _)) = find_best_match(&record, &candidates) {
            let source = best.get(fields::DBLP_KEY).unwrap_or(DBLP_API_BASE).to_string();
            fuse_retrieved(&mut record, best, &source);
        }
        Ok(record)
    }
}
