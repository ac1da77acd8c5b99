//! Rule-based prescreen endpoints.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{async_trait, Decision, EndpointError, PrescreenEndpoint};
use crate::record::{fields, Record, Records};
use crate::settings::EndpointSettings;

/// Titles of front matter, cover pages and similar non-papers.
const COMPLEMENTARY_MATERIAL_TITLES: &[&str] = &[
    "about this issue",
    "about the authors",
    "back matter",
    "board of editors",
    "call for papers",
    "contents",
    "cover",
    "editorial board",
    "editorial advisory board",
    "front matter",
    "index",
    "issue information",
    "masthead",
    "reviewers",
    "table of contents",
    "title page",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ScopeSettings {
    time_scope_from: Option<i32>,
    time_scope_to: Option<i32>,
    #[serde(default)]
    language_scope: Vec<String>,
    #[serde(default = "default_true")]
    exclude_complementary_materials: bool,
    #[serde(rename = "ENTRYTYPEScope", default)]
    entrytype_scope: Vec<String>,
    outlet_inclusion_scope: Option<OutletScope>,
    outlet_exclusion_scope: Option<OutletScope>,
}

fn default_true() -> bool {
    true
}

/// `{"values": [{"journal": "MIS Quarterly"}, ...]}`
#[derive(Debug, Default, Deserialize)]
struct OutletScope {
    #[serde(default)]
    values: Vec<Map<String, Value>>,
}

impl OutletScope {
    fn matches(&self, record: &Record) -> bool {
        self.values.iter().any(|outlet| {
            outlet
                .iter()
                .any(|(key, value)| value.as_str().is_some_and(|v| record.get(key) == Some(v)))
        })
    }
}

/// Excludes records outside the configured time, language, outlet and ENTRYTYPE scope.
#[derive(Debug)]
pub struct ScopePrescreen {
    scope: ScopeSettings,
}

impl ScopePrescreen {
    pub fn from_settings(settings: &EndpointSettings) -> Result<Self, EndpointError> {
        let scope: ScopeSettings = serde_json::from_value(Value::Object(settings.options.clone()))
            .map_err(|e| EndpointError::Parse(format!("colrev.scope_prescreen settings: {e}")))?;
        for bound in [scope.time_scope_from, scope.time_scope_to].into_iter().flatten() {
            if !(1900..2100).contains(&bound) {
                return Err(EndpointError::Parse(format!(
                    "colrev.scope_prescreen: time scope {bound} out of range"
                )));
            }
        }
        if let Some(code) = scope.language_scope.iter().find(|c| c.chars().count() != 3) {
            return Err(EndpointError::Parse(format!(
                "colrev.scope_prescreen: '{code}' is not an ISO 639-3 language code"
            )));
        }
        Ok(Self { scope })
    }

    /// Reason for excluding the record, if it is out of scope.
    fn exclusion_reason(&self, record: &Record) -> Option<String> {
        let scope = &self.scope;
        if !scope.entrytype_scope.is_empty() && !scope.entrytype_scope.contains(&record.entrytype) {
            return Some("not in ENTRYTYPEScope".into());
        }
        if let Some(inclusion) = &scope.outlet_inclusion_scope {
            if !inclusion.matches(record) {
                return Some("not in OutletInclusionScope".into());
            }
        }
        if scope.outlet_exclusion_scope.as_ref().is_some_and(|s| s.matches(record)) {
            return Some("in OutletExclusionScope".into());
        }
        let year = record.known(fields::YEAR).and_then(|y| y.parse::<i32>().ok());
        if let (Some(from), Some(year)) = (scope.time_scope_from, year) {
            if year < from {
                return Some(format!("not in TimeScopeFrom (>{from})"));
            }
        }
        if let (Some(to), Some(year)) = (scope.time_scope_to, year) {
            if year > to {
                return Some(format!("not in TimeScopeTo (<{to})"));
            }
        }
        if !scope.language_scope.is_empty() {
            if let Some(language) = record.known(fields::LANGUAGE) {
                if !scope.language_scope.iter().any(|l| l == language) {
                    return Some(format!("not in LanguageScope ({language})"));
                }
            }
        }
        if scope.exclude_complementary_materials {
            let title = record.get(fields::TITLE).unwrap_or_default().trim().to_lowercase();
            if COMPLEMENTARY_MATERIAL_TITLES.contains(&title.as_str()) {
                return Some("complementary material".into());
            }
        }
        None
    }
}

#[async_trait]
impl PrescreenEndpoint for ScopePrescreen {
    fn name(&self) -> &'static str {
        "colrev.scope_prescreen"
    }

    /// Excludes out-of-scope records and leaves the rest to the following endpoints.
    async fn prescreen(&self, records: &Records, ids: &[String]) -> Result<Vec<Decision>, EndpointError> {
        Ok(ids
            .iter()
            .filter_map(|id| records.get(id))
            .filter_map(|record| {
                self.exclusion_reason(record)
                    .map(|reason| Decision::exclude(&record.id, reason))
            })
            .collect())
    }
}

/// Includes every record it is asked about.
pub struct ConditionalPrescreen;

#[async_trait]
impl PrescreenEndpoint for ConditionalPrescreen {
    fn name(&self) -> &'static str {
        "colrev.conditional_prescreen"
    }

    async fn prescreen(&self, records: &Records, ids: &[String]) -> Result<Vec<Decision>, EndpointError> {
        Ok(ids
            .iter()
            .filter(|id| records.contains_key(*id))
            .map(|id| Decision::include(id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records() -> Records {
        [
            Record::new("Old1999", "article").with(fields::YEAR, "1999").with(fields::TITLE, "A paper"),
            Record::new("New2015", "article").with(fields::YEAR, "2015").with(fields::TITLE, "A paper"),
            Record::new("Cover2015", "article").with(fields::YEAR, "2015").with(fields::TITLE, "Issue Information"),
            Record::new("German2015", "article")
                .with(fields::YEAR, "2015")
                .with(fields::TITLE, "Ein Beitrag")
                .with(fields::LANGUAGE, "deu"),
            Record::new("Talk2015", "misc").with(fields::YEAR, "2015").with(fields::TITLE, "A talk"),
        ]
        .into_iter()
        .map(|r| (r.id.clone(), r))
        .collect()
    }

    #[tokio::test]
    async fn scope_excludes_out_of_scope_records() {
        let settings = EndpointSettings::new("colrev.scope_prescreen")
            .with_option("TimeScopeFrom", json!(2000))
            .with_option("LanguageScope", json!(["eng"]))
            .with_option("ENTRYTYPEScope", json!(["article", "inproceedings"]));
        let prescreen = ScopePrescreen::from_settings(&settings).unwrap();
        let records = records();
        let ids: Vec<String> = records.keys().cloned().collect();
        let mut decisions = prescreen.prescreen(&records, &ids).await.unwrap();
        decisions.sort_by(|a, b| a.id.cmp(&b.id));

        let excluded: Vec<&str> = decisions.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(excluded, vec!["Cover2015", "German2015", "Old1999", "Talk2015"]);
        assert!(decisions.iter().all(|d| !d.include));
        let old = decisions.iter().find(|d| d.id == "Old1999").unwrap();
        assert_eq!(old.detail.as_deref(), Some("not in TimeScopeFrom (>2000)"));
    }

    #[test]
    fn invalid_scope_settings() {
        let bad_year = EndpointSettings::new("colrev.scope_prescreen").with_option("TimeScopeTo", json!(1800));
        assert!(ScopePrescreen::from_settings(&bad_year).is_err());
        let bad_language =
            EndpointSettings::new("colrev.scope_prescreen").with_option("LanguageScope", json!(["en"]));
        assert!(ScopePrescreen::from_settings(&bad_language).is_err());
    }

    #[test]
    fn outlet_scopes() {
        let settings = EndpointSettings::new("colrev.scope_prescreen")
            .with_option("OutletExclusionScope", json!({"values": [{"journal": "Predatory Letters"}]}));
        let prescreen = ScopePrescreen::from_settings(&settings).unwrap();
        let record = Record::new("X", "article").with(fields::JOURNAL, "Predatory Letters");
        assert_eq!(prescreen.exclusion_reason(&record).as_deref(), Some("in OutletExclusionScope"));
    }

    #[tokio::test]
    async fn conditional_includes_everything_asked() {
        let records = records();
        let ids = vec!["New2015".to_string(), "Missing".to_string()];
        let decisions = ConditionalPrescreen.prescreen(&records, &ids).await.unwrap();
        assert_eq!(decisions, vec![Decision::include("New2015")]);
    }
}
