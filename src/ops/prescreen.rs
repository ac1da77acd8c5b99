//! Prescreen: include/exclude decisions based on metadata.

use std::collections::BTreeMap;
use tracing::info;

use super::{states_of, Operation, Outcome};
use crate::endpoints::Decision;
use crate::error::{ColrevError, Result};
use crate::process::{OperationsType, RecordState};
use crate::record::{fields, Records};
use crate::review_manager::ReviewManager;

/// Decisions given on the command line. They take precedence over the
/// endpoints.
#[derive(Debug, Clone, Default)]
pub struct ManualDecisions {
    pub include: Vec<String>,
    pub exclude: Vec<(String, Option<String>)>,
    /// Include every record no endpoint decided on.
    pub include_all: bool,
}

impl ManualDecisions {
    /// Decisions for `candidates`, in candidate order; unknown IDs are an error.
    pub(crate) fn decisions(&self, candidates: &[String], default_exclusion: &str) -> Result<Vec<Decision>> {
        let mut decided = BTreeMap::new();
        for id in &self.include {
            decided.insert(id.clone(), Decision::include(id));
        }
        for (id, reason) in &self.exclude {
            let reason = reason.clone().unwrap_or_else(|| default_exclusion.to_string());
            decided.insert(id.clone(), Decision::exclude(id, reason));
        }
        if let Some(unknown) = decided.keys().find(|id| !candidates.contains(id)) {
            return Err(ColrevError::InvalidInput(format!(
                "{unknown} is not waiting for this decision"
            )));
        }
        Ok(candidates.iter().filter_map(|id| decided.remove(id)).collect())
    }
}

pub struct Prescreen<'a> {
    operation: Operation<'a>,
}

impl<'a> Prescreen<'a> {
    pub fn new(review_manager: &'a ReviewManager) -> Result<Self> {
        Ok(Self {
            operation: Operation::new(review_manager, OperationsType::Prescreen)?,
        })
    }

    fn apply(records: &mut Records, decision: &Decision) {
        let Some(record) = records.get_mut(&decision.id) else {
            return;
        };
        if decision.include {
            record.status = RecordState::RevPrescreenIncluded;
        } else {
            let reason = decision.detail.as_deref().unwrap_or("out of scope");
            record.set(fields::PRESCREEN_EXCLUSION, reason);
            record.status = RecordState::RevPrescreenExcluded;
        }
    }

    /// Applies the manual decisions, then asks the endpoints about the
    /// records still undecided. Records nobody decided on stay in
    /// `md_processed`.
    pub async fn run(&mut self, manual: &ManualDecisions) -> Result<Outcome> {
        let rm = self.operation.review_manager();
        let mut records = rm.dataset().load_records()?;
        let before = states_of(&records);
        let mut pending: Vec<String> = records
            .values()
            .filter(|r| r.status == RecordState::MdProcessed)
            .map(|r| r.id.clone())
            .collect();

        for decision in manual.decisions(&pending, "manual")? {
            Self::apply(&mut records, &decision);
            pending.retain(|id| id != &decision.id);
        }

        let package_manager = rm.package_manager();
        for endpoint_settings in &rm.settings().prescreen.prescreen_package_endpoints {
            if pending.is_empty() {
                break;
            }
            let endpoint = package_manager.load_prescreen(endpoint_settings)?;
            self.operation.add_endpoint(endpoint.name());
            let decisions = endpoint.prescreen(&records, &pending).await?;
            info!("{}: {} decisions", endpoint.name(), decisions.len());
            for decision in decisions.iter().filter(|d| pending.contains(&d.id)) {
                Self::apply(&mut records, decision);
            }
            pending.retain(|id| !decisions.iter().any(|d| &d.id == id));
        }

        if manual.include_all {
            for id in pending.drain(..) {
                Self::apply(&mut records, &Decision::include(&id));
            }
        }

        let decided = |state: RecordState| {
            records
                .values()
                .filter(|r| before.get(&r.id) == Some(&RecordState::MdProcessed) && r.status == state)
                .count()
        };
        let summary = format!(
            "{} included, {} excluded",
            decided(RecordState::RevPrescreenIncluded),
            decided(RecordState::RevPrescreenExcluded)
        );
        let mut outcome = self.operation.save_and_commit(&summary, &before, &records, &[])?;
        if !pending.is_empty() {
            outcome = outcome.message(format!("{} records still need a prescreen decision", pending.len()));
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::tests::processed_project;

    #[test]
    fn manual_decisions_follow_candidate_order() {
        let candidates = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let manual = ManualDecisions {
            include: vec!["C".into()],
            exclude: vec![("A".into(), None)],
            include_all: false,
        };
        let decisions = manual.decisions(&candidates, "manual").unwrap();
        assert_eq!(decisions, vec![Decision::exclude("A", "manual"), Decision::include("C")]);

        let unknown = ManualDecisions {
            include: vec!["X".into()],
            ..ManualDecisions::default()
        };
        assert!(unknown.decisions(&candidates, "manual").is_err());
    }

    #[tokio::test]
    async fn manual_exclusion_and_include_all() {
        let (_dir, manager) = processed_project().await;
        let records = manager.dataset().load_records().unwrap();
        let doe = records.values().find(|r| r.id.starts_with("Doe")).unwrap().id.clone();

        let manual = ManualDecisions {
            exclude: vec![(doe.clone(), Some("not about ERP".into()))],
            include_all: true,
            ..ManualDecisions::default()
        };
        let outcome = Prescreen::new(&manager).unwrap().run(&manual).await.unwrap();
        assert_eq!(outcome.transitions.count_to(RecordState::RevPrescreenExcluded), 1);
        assert_eq!(outcome.transitions.count_to(RecordState::RevPrescreenIncluded), 1);

        let records = manager.dataset().load_records().unwrap();
        assert_eq!(records[&doe].get(fields::PRESCREEN_EXCLUSION), Some("not about ERP"));
    }

    #[tokio::test]
    async fn undecided_records_stay_processed() {
        let (_dir, manager) = processed_project().await;
        let outcome = Prescreen::new(&manager)
            .unwrap()
            .run(&ManualDecisions::default())
            .await
            .unwrap();
        assert_eq!(outcome.messages, vec!["2 records still need a prescreen decision".to_string()]);
        let records = manager.dataset().load_records().unwrap();
        assert!(records.values().all(|r| r.status == RecordState::MdProcessed));
    }
}
