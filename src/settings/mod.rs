//! Project settings (`settings.json`).

pub mod review_types;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::record::id_setter::IdPattern;
use crate::record::ColrevIdAuthors;

pub const COLREV_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("cannot read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("project requires colrev {project}, running {running}; upgrade colrev")]
    Upgrade { project: String, running: String },
}

impl From<serde_json::Error> for SettingsError {
    fn from(e: serde_json::Error) -> Self {
        SettingsError::InvalidSettings(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShareStatReq {
    #[default]
    None,
    Processed,
    Screened,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchType {
    Db,
    Toc,
    Api,
    BackwardSearch,
    ForwardSearch,
    Pdfs,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PdfPathType {
    #[default]
    Symlink,
    Copy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionType {
    InclusionCriterion,
    ExclusionCriterion,
}

/// `{ "endpoint": <name>, ...options }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSettings {
    pub endpoint: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl EndpointSettings {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            options: Map::new(),
        }
    }

    pub fn with_option(mut self, key: &str, value: Value) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub initials: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub review_type: String,
    #[serde(default)]
    pub id_pattern: IdPattern,
    #[serde(default)]
    pub share_stat_req: ShareStatReq,
    #[serde(default)]
    pub delay_automated_processing: bool,
    #[serde(default)]
    pub curated_masterdata: bool,
    #[serde(default)]
    pub curated_fields: Vec<String>,
    #[serde(default)]
    pub curation_url: Option<String>,
    #[serde(default)]
    pub colrev_id_authors: ColrevIdAuthors,
    pub colrev_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSource {
    pub endpoint: String,
    pub filename: PathBuf,
    pub search_type: SearchType,
    #[serde(default)]
    pub search_parameters: Map<String, Value>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl SearchSource {
    /// Prefix of the origins of records loaded from this source (the file name).
    pub fn origin_prefix(&self) -> String {
        self.filename
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Metadata sources (`md_*`) only serve preparation and are not loaded.
    pub fn is_md_source(&self) -> bool {
        self.origin_prefix().starts_with("md_")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default)]
    pub retrieve_forthcoming: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSettings {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepRound {
    pub name: String,
    #[serde(default = "default_similarity")]
    pub similarity: f64,
    pub prep_package_endpoints: Vec<EndpointSettings>,
}

fn default_similarity() -> f64 {
    0.9
}

fn default_cpu() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepSettings {
    #[serde(default)]
    pub fields_to_keep: Vec<String>,
    pub prep_rounds: Vec<PrepRound>,
    #[serde(default)]
    pub prep_man_package_endpoints: Vec<EndpointSettings>,
    #[serde(default)]
    pub defects_to_ignore: Vec<String>,
    #[serde(default = "default_cpu")]
    pub cpu: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupeSettings {
    pub dedupe_package_endpoints: Vec<EndpointSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrescreenSettings {
    #[serde(default)]
    pub explanation: String,
    pub prescreen_package_endpoints: Vec<EndpointSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfGetSettings {
    #[serde(default)]
    pub pdf_path_type: PdfPathType,
    #[serde(default = "default_true")]
    pub pdf_required_for_screen_and_synthesis: bool,
    #[serde(default = "default_true")]
    pub rename_pdfs: bool,
    pub pdf_get_package_endpoints: Vec<EndpointSettings>,
    #[serde(default)]
    pub pdf_get_man_package_endpoints: Vec<EndpointSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdfPrepSettings {
    #[serde(default)]
    pub keep_backup_of_pdfs: bool,
    pub pdf_prep_package_endpoints: Vec<EndpointSettings>,
    #[serde(default)]
    pub pdf_prep_man_package_endpoints: Vec<EndpointSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenCriterion {
    pub explanation: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub criterion_type: CriterionType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenSettings {
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub criteria: BTreeMap<String, ScreenCriterion>,
    pub screen_package_endpoints: Vec<EndpointSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSettings {
    pub data_package_endpoints: Vec<EndpointSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub project: ProjectSettings,
    pub sources: Vec<SearchSource>,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub load: LoadSettings,
    pub prep: PrepSettings,
    pub dedupe: DedupeSettings,
    pub prescreen: PrescreenSettings,
    pub pdf_get: PdfGetSettings,
    pub pdf_prep: PdfPrepSettings,
    pub screen: ScreenSettings,
    pub data: DataSettings,
}

fn major_minor(version: &str) -> (u64, u64) {
    let mut parts = version
        .trim_start_matches('v')
        .split('.')
        .map(|p| p.parse::<u64>().unwrap_or(0));
    (parts.next().unwrap_or(0), parts.next().unwrap_or(0))
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_json::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if major_minor(&self.project.colrev_version) > major_minor(COLREV_VERSION) {
            return Err(SettingsError::Upgrade {
                project: self.project.colrev_version.clone(),
                running: COLREV_VERSION.to_string(),
            });
        }
        for source in &self.sources {
            let filename = source.filename.to_string_lossy().replace('\\', "/");
            if !filename.starts_with("data/search/") {
                return Err(SettingsError::InvalidSettings(format!(
                    "source filename does not start with data/search/: {filename}"
                )));
            }
        }
        if self.prep.cpu == 0 {
            return Err(SettingsError::InvalidSettings("prep.cpu must be positive".into()));
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let mut content = serde_json::to_string_pretty(self)?;
        content.push('\n');
        fs::write(path, content)?;
        Ok(())
    }

    /// Names of the screening criteria, in settings order.
    pub fn screening_criteria(&self) -> Vec<String> {
        self.screen.criteria.keys().cloned().collect()
    }

    /// Sets the value at a JSON pointer (e.g. `/project/delay_automated_processing`).
    pub fn set_value(&mut self, pointer: &str, value: Value) -> Result<(), SettingsError> {
        let mut json = serde_json::to_value(&*self)?;
        let slot = json
            .pointer_mut(pointer)
            .ok_or_else(|| SettingsError::InvalidSettings(format!("no setting at {pointer}")))?;
        *slot = value;
        let updated: Settings = serde_json::from_value(json)?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |endpoints: &[EndpointSettings]| {
            endpoints
                .iter()
                .map(|e| e.endpoint.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        writeln!(f, "Project")?;
        writeln!(f, "- review ({}): {}", self.project.review_type, self.project.title)?;
        writeln!(f, "- id_pattern: {:?}", self.project.id_pattern)?;
        writeln!(f, "- share_stat_req: {:?}", self.project.share_stat_req)?;
        writeln!(f, "- delay_automated_processing: {}", self.project.delay_automated_processing)?;
        writeln!(f, "Sources")?;
        for source in &self.sources {
            writeln!(f, "- {:?}: {} >> {}", source.search_type, source.endpoint, source.filename.display())?;
        }
        writeln!(f, "Prep")?;
        for round in &self.prep.prep_rounds {
            writeln!(f, "- {} ({})", round.name, names(&round.prep_package_endpoints))?;
        }
        writeln!(f, "Dedupe: {}", names(&self.dedupe.dedupe_package_endpoints))?;
        writeln!(f, "Prescreen: {}", names(&self.prescreen.prescreen_package_endpoints))?;
        writeln!(f, "PDF get: {}", names(&self.pdf_get.pdf_get_package_endpoints))?;
        writeln!(f, "PDF prep: {}", names(&self.pdf_prep.pdf_prep_package_endpoints))?;
        writeln!(f, "Screen: {}", names(&self.screen.screen_package_endpoints))?;
        for (name, criterion) in &self.screen.criteria {
            writeln!(f, "- {name}: {} ({:?})", criterion.explanation, criterion.criterion_type)?;
        }
        write!(f, "Data: {}", names(&self.data.data_package_endpoints))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_round_trip_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = review_types::initialize("literature_review", "Digital platforms").unwrap();
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn unknown_enum_values_are_invalid() {
        let settings = review_types::initialize("literature_review", "T").unwrap();
        let json = serde_json::to_string(&settings)
            .unwrap()
            .replace("three_authors_year", "four_authors");
        assert!(matches!(
            Settings::from_json(&json),
            Err(SettingsError::InvalidSettings(_))
        ));
    }

    #[test]
    fn newer_project_version_requires_upgrade() {
        let mut settings = review_types::initialize("literature_review", "T").unwrap();
        settings.project.colrev_version = "99.0.0".into();
        assert!(matches!(settings.validate(), Err(SettingsError::Upgrade { .. })));
    }

    #[test]
    fn sources_live_in_search_dir() {
        let mut settings = review_types::initialize("literature_review", "T").unwrap();
        settings.sources.push(SearchSource {
            endpoint: "colrev.unknown_source".into(),
            filename: PathBuf::from("records.bib"),
            search_type: SearchType::Db,
            search_parameters: Map::new(),
            comment: None,
        });
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidSettings(_))
        ));
    }

    #[test]
    fn set_value_by_pointer() {
        let mut settings = review_types::initialize("literature_review", "T").unwrap();
        settings
            .set_value("/project/delay_automated_processing", Value::Bool(true))
            .unwrap();
        assert!(settings.project.delay_automated_processing);
        assert!(settings.set_value("/project/nope", Value::Null).is_err());
    }
}
