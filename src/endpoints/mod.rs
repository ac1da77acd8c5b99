//! Pluggable per-stage components, loaded by name from the settings.

pub use async_trait::async_trait;

pub mod crossref;
pub mod data;
pub mod dblp;
pub mod dedupe;
pub mod pdf;
pub mod prep;
pub mod prescreen;
pub mod screen;
pub mod search;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::dataset::ProjectPaths;
use crate::environment::services::ServiceError;
use crate::environment::Environment;
use crate::local_index::LocalIndexError;
use crate::parser::{ParseError, SearchEntry};
use crate::record::{fields, Record, RecordError, Records};
use crate::settings::{EndpointSettings, SearchSource, Settings};

pub const USER_AGENT: &str = concat!("colrev/", env!("CARGO_PKG_VERSION"), " (mailto:colrev@example.org)");

/// What an operation needs from an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    SearchSource,
    Prep,
    Dedupe,
    Prescreen,
    PdfGet,
    PdfPrep,
    Screen,
    Data,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::SearchSource => "search_source",
            Capability::Prep => "prep",
            Capability::Dedupe => "dedupe",
            Capability::Prescreen => "prescreen",
            Capability::PdfGet => "pdf_get",
            Capability::PdfPrep => "pdf_prep",
            Capability::Screen => "screen",
            Capability::Data => "data",
        })
    }
}

#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("no {capability} endpoint named '{name}'")]
    UnknownEndpoint { name: String, capability: Capability },
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to parse response: {0}")]
    Parse(String),
    #[error("{0} rate limited, try again later")]
    RateLimited(&'static str),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    LocalIndex(#[from] LocalIndexError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Search(#[from] ParseError),
}

/// An include/exclude decision of a prescreen or screen endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub id: String,
    pub include: bool,
    /// Exclusion reason or screening criteria, depending on the stage.
    pub detail: Option<String>,
}

impl Decision {
    pub fn include(id: &str) -> Self {
        Self {
            id: id.to_string(),
            include: true,
            detail: None,
        }
    }

    pub fn exclude(id: &str, detail: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            include: false,
            detail: Some(detail.into()),
        }
    }
}

/// Outcome of a PDF check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdfPrepOutcome {
    Prepared,
    NeedsManualPreparation(String),
}

#[async_trait]
pub trait SearchSourceEndpoint: Send + Sync {
    fn name(&self) -> &'static str;

    /// Refreshes the search file; returns the number of entries written.
    async fn run_search(&self, source: &SearchSource) -> Result<usize, EndpointError>;

    /// Source-specific repairs of the raw entries before they become records.
    fn load_fixes(&self, entries: Vec<SearchEntry>) -> Vec<SearchEntry> {
        entries
    }

    /// Source-specific preparation of a record loaded from this source.
    fn prepare(&self, record: Record) -> Record {
        record
    }
}

#[async_trait]
pub trait PrepEndpoint: Send + Sync {
    fn name(&self) -> &'static str;

    /// Where wrong metadata returned by this endpoint should be corrected.
    fn source_correction_hint(&self) -> &'static str;

    /// Whether changes are applied without a similarity check.
    fn always_apply_changes(&self) -> bool;

    async fn prepare(&self, record: Record) -> Result<Record, EndpointError>;
}

#[async_trait]
pub trait DedupeEndpoint: Send + Sync {
    fn name(&self) -> &'static str;

    /// Merges duplicates among `candidates` inside `records`; returns `(kept, removed)` pairs.
    async fn run_dedupe(
        &self,
        records: &mut Records,
        candidates: &[String],
    ) -> Result<Vec<(String, String)>, EndpointError>;
}

#[async_trait]
pub trait PrescreenEndpoint: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decisions for the records it can decide; others stay undecided.
    async fn prescreen(&self, records: &Records, ids: &[String]) -> Result<Vec<Decision>, EndpointError>;
}

#[async_trait]
pub trait PdfGetEndpoint: Send + Sync {
    fn name(&self) -> &'static str;

    /// Location of a PDF for the record, if this endpoint finds one.
    async fn get_pdf(&self, record: &Record) -> Result<Option<PathBuf>, EndpointError>;
}

#[async_trait]
pub trait PdfPrepEndpoint: Send + Sync {
    fn name(&self) -> &'static str;

    async fn prep_pdf(&self, record: &Record, pdf: &Path) -> Result<PdfPrepOutcome, EndpointError>;
}

#[async_trait]
pub trait ScreenEndpoint: Send + Sync {
    fn name(&self) -> &'static str;

    async fn screen(
        &self,
        records: &Records,
        ids: &[String],
        criteria: &[String],
    ) -> Result<Vec<Decision>, EndpointError>;
}

#[async_trait]
pub trait DataEndpoint: Send + Sync {
    fn name(&self) -> &'static str;

    /// Updates the endpoint's outputs; returns the IDs it synthesized.
    async fn update_data(&self, records: &Records, included: &[String]) -> Result<Vec<String>, EndpointError>;

    /// A hint on what to do next, if any.
    fn advice(&self, records: &Records) -> Option<String>;
}

/// A loaded endpoint, tagged with its capability.
pub enum Endpoint {
    SearchSource(Arc<dyn SearchSourceEndpoint>),
    Prep(Arc<dyn PrepEndpoint>),
    Dedupe(Arc<dyn DedupeEndpoint>),
    Prescreen(Arc<dyn PrescreenEndpoint>),
    PdfGet(Arc<dyn PdfGetEndpoint>),
    PdfPrep(Arc<dyn PdfPrepEndpoint>),
    Screen(Arc<dyn ScreenEndpoint>),
    Data(Arc<dyn DataEndpoint>),
}

/// Built-in endpoints and the capabilities each provides.
pub const BUILTIN_ENDPOINTS: &[(&str, &[Capability])] = &[
    ("colrev.unknown_source", &[Capability::SearchSource]),
    ("colrev.local_index", &[Capability::SearchSource, Capability::Prep, Capability::PdfGet]),
    ("colrev.source_specific_prep", &[Capability::Prep]),
    ("colrev.format", &[Capability::Prep]),
    ("colrev.remove_spurious_fields", &[Capability::Prep]),
    ("colrev.crossref", &[Capability::Prep]),
    ("colrev.dblp", &[Capability::Prep]),
    ("colrev.dedupe", &[Capability::Dedupe]),
    ("colrev.scope_prescreen", &[Capability::Prescreen]),
    ("colrev.conditional_prescreen", &[Capability::Prescreen]),
    ("colrev.pdfs_dir", &[Capability::PdfGet]),
    ("colrev.pdf_check", &[Capability::PdfPrep]),
    ("colrev.include_all", &[Capability::Screen]),
    ("colrev.bibliography_export", &[Capability::Data]),
];

/// Resolves endpoint names to implementations.
#[derive(Clone)]
pub struct PackageManager {
    environment: Arc<Environment>,
    paths: ProjectPaths,
    settings: Arc<Settings>,
}

impl PackageManager {
    pub fn new(environment: Arc<Environment>, paths: ProjectPaths, settings: Settings) -> Self {
        Self {
            environment,
            paths,
            settings: Arc::new(settings),
        }
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    fn unknown(name: &str, capability: Capability) -> EndpointError {
        EndpointError::UnknownEndpoint {
            name: name.to_string(),
            capability,
        }
    }

    pub fn load(&self, endpoint: &EndpointSettings, capability: Capability) -> Result<Endpoint, EndpointError> {
        let name = endpoint.endpoint.as_str();
        let env = Arc::clone(&self.environment);
        let loaded = match (name, capability) {
            ("colrev.unknown_source", Capability::SearchSource) => {
                Endpoint::SearchSource(Arc::new(search::UnknownSource))
            }
            ("colrev.local_index", Capability::SearchSource) => {
                Endpoint::SearchSource(Arc::new(search::LocalIndexSearch::new(env, self.paths.clone())))
            }
            ("colrev.local_index", Capability::Prep) => {
                Endpoint::Prep(Arc::new(prep::LocalIndexPrep::new(env, self.settings.project.colrev_id_authors)))
            }
            ("colrev.source_specific_prep", Capability::Prep) => {
                let mut sources = Vec::new();
                for source in &self.settings.sources {
                    let loaded = self.load_search_source(&EndpointSettings::new(&source.endpoint))?;
                    sources.push((source.origin_prefix(), loaded));
                }
                Endpoint::Prep(Arc::new(prep::SourceSpecificPrep::new(sources)))
            }
            ("colrev.format", Capability::Prep) => Endpoint::Prep(Arc::new(prep::FormatPrep)),
            ("colrev.remove_spurious_fields", Capability::Prep) => {
                Endpoint::Prep(Arc::new(prep::RemoveSpuriousFields::new(env)))
            }
            ("colrev.crossref", Capability::Prep) => Endpoint::Prep(Arc::new(crossref::CrossrefPrep::new(env)?)),
            ("colrev.dblp", Capability::Prep) => Endpoint::Prep(Arc::new(dblp::DblpPrep::new(env)?)),
            ("colrev.dedupe", Capability::Dedupe) => Endpoint::Dedupe(Arc::new(dedupe::Dedupe::new(env, endpoint))),
            ("colrev.scope_prescreen", Capability::Prescreen) => {
                Endpoint::Prescreen(Arc::new(prescreen::ScopePrescreen::from_settings(endpoint)?))
            }
            ("colrev.conditional_prescreen", Capability::Prescreen) => {
                Endpoint::Prescreen(Arc::new(prescreen::ConditionalPrescreen))
            }
            ("colrev.local_index", Capability::PdfGet) => {
                Endpoint::PdfGet(Arc::new(pdf::LocalIndexPdfGet::new(env, self.settings.project.colrev_id_authors)))
            }
            ("colrev.pdfs_dir", Capability::PdfGet) => {
                Endpoint::PdfGet(Arc::new(pdf::PdfsDir::from_settings(&self.paths, endpoint)))
            }
            ("colrev.pdf_check", Capability::PdfPrep) => {
                Endpoint::PdfPrep(Arc::new(pdf::PdfCheck::from_settings(env, &self.paths, endpoint)))
            }
            ("colrev.include_all", Capability::Screen) => Endpoint::Screen(Arc::new(screen::IncludeAll)),
            ("colrev.bibliography_export", Capability::Data) => {
                Endpoint::Data(Arc::new(data::BibliographyExport::from_settings(&self.paths, endpoint)))
            }
            _ => return Err(Self::unknown(name, capability)),
        };
        Ok(loaded)
    }

    pub fn load_search_source(&self, endpoint: &EndpointSettings) -> Result<Arc<dyn SearchSourceEndpoint>, EndpointError> {
        match self.load(endpoint, Capability::SearchSource)? {
            Endpoint::SearchSource(e) => Ok(e),
            _ => Err(Self::unknown(&endpoint.endpoint, Capability::SearchSource)),
        }
    }

    pub fn load_prep(&self, endpoint: &EndpointSettings) -> Result<Arc<dyn PrepEndpoint>, EndpointError> {
        match self.load(endpoint, Capability::Prep)? {
            Endpoint::Prep(e) => Ok(e),
            _ => Err(Self::unknown(&endpoint.endpoint, Capability::Prep)),
        }
    }

    pub fn load_dedupe(&self, endpoint: &EndpointSettings) -> Result<Arc<dyn DedupeEndpoint>, EndpointError> {
        match self.load(endpoint, Capability::Dedupe)? {
            Endpoint::Dedupe(e) => Ok(e),
            _ => Err(Self::unknown(&endpoint.endpoint, Capability::Dedupe)),
        }
    }

    pub fn load_prescreen(&self, endpoint: &EndpointSettings) -> Result<Arc<dyn PrescreenEndpoint>, EndpointError> {
        match self.load(endpoint, Capability::Prescreen)? {
            Endpoint::Prescreen(e) => Ok(e),
            _ => Err(Self::unknown(&endpoint.endpoint, Capability::Prescreen)),
        }
    }

    pub fn load_pdf_get(&self, endpoint: &EndpointSettings) -> Result<Arc<dyn PdfGetEndpoint>, EndpointError> {
        match self.load(endpoint, Capability::PdfGet)? {
            Endpoint::PdfGet(e) => Ok(e),
            _ => Err(Self::unknown(&endpoint.endpoint, Capability::PdfGet)),
        }
    }

    pub fn load_pdf_prep(&self, endpoint: &EndpointSettings) -> Result<Arc<dyn PdfPrepEndpoint>, EndpointError> {
        match self.load(endpoint, Capability::PdfPrep)? {
            Endpoint::PdfPrep(e) => Ok(e),
            _ => Err(Self::unknown(&endpoint.endpoint, Capability::PdfPrep)),
        }
    }

    pub fn load_screen(&self, endpoint: &EndpointSettings) -> Result<Arc<dyn ScreenEndpoint>, EndpointError> {
        match self.load(endpoint, Capability::Screen)? {
            Endpoint::Screen(e) => Ok(e),
            _ => Err(Self::unknown(&endpoint.endpoint, Capability::Screen)),
        }
    }

    pub fn load_data(&self, endpoint: &EndpointSettings) -> Result<Arc<dyn DataEndpoint>, EndpointError> {
        match self.load(endpoint, Capability::Data)? {
            Endpoint::Data(e) => Ok(e),
            _ => Err(Self::unknown(&endpoint.endpoint, Capability::Data)),
        }
    }
}

/// Copies fields of a retrieved record that are missing or defective in `record`.
pub fn fuse_retrieved(record: &mut Record, retrieved: &Record, source: &str) {
    let curated = record.masterdata_is_curated();
    for (key, value) in retrieved.data_fields() {
        if value.trim().is_empty() || (curated && fields::is_masterdata(key)) {
            continue;
        }
        let replace = match record.known(key) {
            None => true,
            Some(_) => record.field_has_defect(key),
        };
        if replace {
            if let Err(e) = record.update_field(key, value, source, "") {
                debug!("{}: {e}", record.id);
            }
        }
    }
    if record.entrytype == "misc" && retrieved.entrytype != "misc" {
        record.entrytype = retrieved.entrytype.clone();
    }
}

/// `Given Middle Family` to `Family, Given Middle`.
pub fn format_person_name(name: &str) -> String {
    let name = name.trim();
    if name.contains(',') {
        return name.to_string();
    }
    let mut parts: Vec<&str> = name.split_whitespace().collect();
    match parts.pop() {
        Some(family) if !parts.is_empty() => format!("{family}, {}", parts.join(" ")),
        Some(family) => family.to_string(),
        None => String::new(),
    }
}
