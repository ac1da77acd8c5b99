//! Screen: full-text include/exclude decisions against the screening criteria.

use tracing::info;

use super::prescreen::ManualDecisions;
use super::{states_of, Operation, Outcome};
use crate::dataset::checks::screening_criteria_valid;
use crate::endpoints::Decision;
use crate::error::{ColrevError, Result};
use crate::process::{OperationsType, RecordState};
use crate::record::{fields, Records};
use crate::review_manager::ReviewManager;

/// `c1=<decision>;c2=<decision>` for every criterion, `NA` without criteria.
fn all_criteria(criteria: &[String], decision: &str) -> String {
    if criteria.is_empty() {
        return "NA".to_string();
    }
    criteria
        .iter()
        .map(|c| format!("{c}={decision}"))
        .collect::<Vec<_>>()
        .join(";")
}

pub struct Screen<'a> {
    operation: Operation<'a>,
}

impl<'a> Screen<'a> {
    pub fn new(review_manager: &'a ReviewManager) -> Result<Self> {
        Ok(Self {
            operation: Operation::new(review_manager, OperationsType::Screen)?,
        })
    }

    fn apply(records: &mut Records, decision: &Decision, criteria: &[String]) -> Result<()> {
        let Some(record) = records.get_mut(&decision.id) else {
            return Ok(());
        };
        let default = all_criteria(criteria, if decision.include { "in" } else { "out" });
        let value = decision.detail.clone().unwrap_or(default);
        if !screening_criteria_valid(&value, criteria) {
            return Err(ColrevError::InvalidInput(format!(
                "{}: screening criteria '{value}' do not match the settings ({})",
                decision.id,
                all_criteria(criteria, "in|out")
            )));
        }
        record.set(fields::SCREENING_CRITERIA, &value);
        record.status = if decision.include {
            RecordState::RevIncluded
        } else {
            RecordState::RevExcluded
        };
        Ok(())
    }

    /// Manual decisions first, then the screen endpoints for the rest.
    /// An exclusion reason given on the command line is the criteria string.
    pub async fn run(&mut self, manual: &ManualDecisions) -> Result<Outcome> {
        let rm = self.operation.review_manager();
        let criteria = rm.settings().screening_criteria();
        let mut records = rm.dataset().load_records()?;
        let before = states_of(&records);
        let mut pending: Vec<String> = records
            .values()
            .filter(|r| r.status == RecordState::PdfPrepared)
            .map(|r| r.id.clone())
            .collect();

        let exclusion = all_criteria(&criteria, "out");
        for decision in manual.decisions(&pending, &exclusion)? {
            Self::apply(&mut records, &decision, &criteria)?;
            pending.retain(|id| id != &decision.id);
        }

        let package_manager = rm.package_manager();
        for endpoint_settings in &rm.settings().screen.screen_package_endpoints {
            if pending.is_empty() {
                break;
            }
            let endpoint = package_manager.load_screen(endpoint_settings)?;
            self.operation.add_endpoint(endpoint.name());
            let decisions = endpoint.screen(&records, &pending, &criteria).await?;
            info!("{}: {} decisions", endpoint.name(), decisions.len());
            for decision in decisions.iter().filter(|d| pending.contains(&d.id)) {
                Self::apply(&mut records, decision, &criteria)?;
            }
            pending.retain(|id| !decisions.iter().any(|d| &d.id == id));
        }

        if manual.include_all {
            for id in pending.drain(..) {
                Self::apply(&mut records, &Decision::include(&id), &criteria)?;
            }
        }

        let decided = |state: RecordState| {
            records
                .values()
                .filter(|r| before.get(&r.id) == Some(&RecordState::PdfPrepared) && r.status == state)
                .count()
        };
        let summary = format!(
            "{} included, {} excluded",
            decided(RecordState::RevIncluded),
            decided(RecordState::RevExcluded)
        );
        let mut outcome = self.operation.save_and_commit(&summary, &before, &records, &[])?;
        if !pending.is_empty() {
            outcome = outcome.message(format!("{} records still need a screening decision", pending.len()));
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::tests::processed_project;
    use crate::settings::{CriterionType, ScreenCriterion};

    fn criteria() -> Vec<String> {
        vec!["focus".to_string(), "method".to_string()]
    }

    #[test]
    fn default_criteria_strings() {
        assert_eq!(all_criteria(&criteria(), "in"), "focus=in;method=in");
        assert_eq!(all_criteria(&[], "out"), "NA");
    }

    #[test]
    fn rejects_incomplete_criteria() {
        let mut records: Records = [("A".to_string(), crate::record::Record::new("A", "article"))]
            .into_iter()
            .collect();
        let partial = Decision::exclude("A", "focus=out");
        assert!(Screen::apply(&mut records, &partial, &criteria()).is_err());

        let full = Decision::exclude("A", "focus=out;method=in");
        Screen::apply(&mut records, &full, &criteria()).unwrap();
        assert_eq!(records["A"].status, RecordState::RevExcluded);
    }

    #[tokio::test]
    async fn screens_prepared_records() {
        let (_dir, manager) = processed_project().await;
        let mut manager = manager;
        manager.settings_mut().screen.criteria.insert(
            "focus".to_string(),
            ScreenCriterion {
                explanation: "The paper studies ERP benefits".to_string(),
                comment: None,
                criterion_type: CriterionType::InclusionCriterion,
            },
        );
        manager.save_settings().unwrap();
        manager.git().add_all().unwrap();
        manager.git().commit("Add screening criterion").unwrap();

        // skip the PDF stages
        let mut records = manager.dataset().load_records().unwrap();
        for record in records.values_mut() {
            record.status = RecordState::PdfPrepared;
        }
        manager.dataset().save_records(&records).unwrap();
        manager.git().add_all().unwrap();
        manager.git().commit("PDFs prepared").unwrap();

        let doe = records.keys().find(|id| id.starts_with("Doe")).cloned().unwrap();
        let manual = ManualDecisions {
            exclude: vec![(doe.clone(), None)],
            include_all: true,
            ..ManualDecisions::default()
        };
        Screen::new(&manager).unwrap().run(&manual).await.unwrap();

        let records = manager.dataset().load_records().unwrap();
        assert_eq!(records[&doe].status, RecordState::RevExcluded);
        assert_eq!(records[&doe].get(fields::SCREENING_CRITERIA), Some("focus=out"));
        let staehr = records.values().find(|r| r.id.starts_with("Staehr")).unwrap();
        assert_eq!(staehr.status, RecordState::RevIncluded);
        assert_eq!(staehr.get(fields::SCREENING_CRITERIA), Some("focus=in"));
    }
}
