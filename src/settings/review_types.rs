//! Review types seed the default settings of a new project.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::*;

pub const REVIEW_TYPES: &[&str] = &["literature_review", "scoping_review", "curated_masterdata"];

fn endpoints(names: &[&str]) -> Vec<EndpointSettings> {
    names.iter().map(|n| EndpointSettings::new(n)).collect()
}

/// Settings shared by every review type.
fn base(review_type: &str, title: &str) -> Settings {
    Settings {
        project: ProjectSettings {
            title: title.to_string(),
            authors: Vec::new(),
            keywords: Vec::new(),
            review_type: review_type.to_string(),
            id_pattern: IdPattern::ThreeAuthorsYear,
            share_stat_req: ShareStatReq::None,
            delay_automated_processing: true,
            curated_masterdata: false,
            curated_fields: Vec::new(),
            curation_url: None,
            colrev_id_authors: ColrevIdAuthors::FirstAuthor,
            colrev_version: COLREV_VERSION.to_string(),
        },
        sources: Vec::new(),
        search: SearchSettings::default(),
        load: LoadSettings::default(),
        prep: PrepSettings {
            fields_to_keep: Vec::new(),
            prep_rounds: vec![
                PrepRound {
                    name: "prep".to_string(),
                    similarity: 0.8,
                    prep_package_endpoints: endpoints(&[
                        "colrev.source_specific_prep",
                        "colrev.format",
                        "colrev.local_index",
                        "colrev.remove_spurious_fields",
                        "colrev.crossref",
                        "colrev.dblp",
                    ]),
                },
            ],
            prep_man_package_endpoints: Vec::new(),
            defects_to_ignore: Vec::new(),
            cpu: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            timeout_secs: 60,
        },
        dedupe: DedupeSettings {
            dedupe_package_endpoints: endpoints(&["colrev.dedupe"]),
        },
        prescreen: PrescreenSettings {
            explanation: String::new(),
            prescreen_package_endpoints: vec![EndpointSettings::new("colrev.scope_prescreen")
                .with_option("LanguageScope", Value::Array(vec![Value::from("eng")]))],
        },
        pdf_get: PdfGetSettings {
            pdf_path_type: PdfPathType::Symlink,
            pdf_required_for_screen_and_synthesis: true,
            rename_pdfs: true,
            pdf_get_package_endpoints: endpoints(&["colrev.local_index", "colrev.pdfs_dir"]),
            pdf_get_man_package_endpoints: Vec::new(),
        },
        pdf_prep: PdfPrepSettings {
            keep_backup_of_pdfs: true,
            pdf_prep_package_endpoints: endpoints(&["colrev.pdf_check"]),
            pdf_prep_man_package_endpoints: Vec::new(),
        },
        screen: ScreenSettings {
            explanation: None,
            criteria: BTreeMap::new(),
            screen_package_endpoints: Vec::new(),
        },
        data: DataSettings {
            data_package_endpoints: endpoints(&["colrev.bibliography_export"]),
        },
    }
}

/// Default settings of a project of the given review type.
pub fn initialize(review_type: &str, title: &str) -> Result<Settings, SettingsError> {
    let mut settings = base(review_type, title);
    match review_type {
        "literature_review" => {}
        "scoping_review" => {
            settings.prescreen.explanation =
                "Include records that map the breadth of the field.".to_string();
            settings.pdf_get.pdf_required_for_screen_and_synthesis = false;
            settings.screen.screen_package_endpoints = endpoints(&["colrev.include_all"]);
        }
        "curated_masterdata" => {
            settings.project.curated_masterdata = true;
            settings.project.delay_automated_processing = false;
            settings.project.id_pattern = IdPattern::ThreeAuthorsYear;
            settings.project.colrev_id_authors = ColrevIdAuthors::FirstAuthor;
            settings.prescreen.prescreen_package_endpoints =
                endpoints(&["colrev.conditional_prescreen"]);
            settings.pdf_get.pdf_required_for_screen_and_synthesis = false;
            settings.pdf_get.pdf_get_package_endpoints.clear();
            settings.pdf_prep.pdf_prep_package_endpoints.clear();
            settings.screen.screen_package_endpoints = endpoints(&["colrev.include_all"]);
            settings.screen.criteria.clear();
            settings.prep.prep_rounds[0]
                .prep_package_endpoints
                .retain(|e| e.endpoint != "colrev.local_index");
        }
        other => {
            return Err(SettingsError::InvalidSettings(format!(
                "unknown review type '{other}' (expected one of {})",
                REVIEW_TYPES.join(", ")
            )))
        }
    }
    Ok(settings)
}

/// Options of the default search source of a new BibTeX file.
pub fn unknown_source(filename: &str) -> SearchSource {
    SearchSource {
        endpoint: "colrev.unknown_source".to_string(),
        filename: std::path::PathBuf::from(format!("data/search/{filename}")),
        search_type: SearchType::Db,
        search_parameters: Map::new(),
        comment: None,
    }
}
