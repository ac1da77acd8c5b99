//! Data: synthesis outputs built from the included records.

use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;

use super::{states_of, Operation, Outcome};
use crate::dataset::ProjectPaths;
use crate::error::Result;
use crate::process::{OperationsType, RecordState};
use crate::review_manager::ReviewManager;

/// Changed files an endpoint may have written.
fn output_paths(review_manager: &ReviewManager) -> Result<Vec<PathBuf>> {
    Ok(review_manager
        .git()
        .changed_paths()?
        .into_iter()
        .map(|c| c.path)
        .filter(|p| {
            p.starts_with("data/")
                && p != ProjectPaths::RECORDS_FILE
                && !p.starts_with(ProjectPaths::PDF_DIR)
                && !p.starts_with(ProjectPaths::SEARCH_DIR)
        })
        .map(PathBuf::from)
        .collect())
}

pub struct Data<'a> {
    operation: Operation<'a>,
}

impl<'a> Data<'a> {
    pub fn new(review_manager: &'a ReviewManager) -> Result<Self> {
        Ok(Self {
            operation: Operation::new(review_manager, OperationsType::Data)?,
        })
    }

    /// Records reported as synthesized by every data endpoint move to `rev_synthesized`.
    pub async fn run(&mut self) -> Result<Outcome> {
        let rm = self.operation.review_manager();
        let mut records = rm.dataset().load_records()?;
        let before = states_of(&records);
        let included: Vec<String> = records
            .values()
            .filter(|r| r.status == RecordState::RevIncluded)
            .map(|r| r.id.clone())
            .collect();

        let package_manager = rm.package_manager();
        let mut synthesized: Option<BTreeSet<String>> = None;
        let mut advice = Vec::new();
        for endpoint_settings in &rm.settings().data.data_package_endpoints {
            let endpoint = package_manager.load_data(endpoint_settings)?;
            self.operation.add_endpoint(endpoint.name());
            let done: BTreeSet<String> = endpoint.update_data(&records, &included).await?.into_iter().collect();
            info!("{}: {} records synthesized", endpoint.name(), done.len());
            synthesized = Some(match synthesized {
                None => done,
                Some(previous) => previous.intersection(&done).cloned().collect(),
            });
            advice.extend(endpoint.advice(&records));
        }

        let synthesized = synthesized.unwrap_or_default();
        for id in &synthesized {
            if let Some(record) = records.get_mut(id) {
                record.status = RecordState::RevSynthesized;
            }
        }
        rm.dataset().save_records(&records)?;
        let outputs = output_paths(rm)?;
        let summary = format!("{} records synthesized", synthesized.len());
        let mut outcome = self.operation.commit(&summary, &before, &records, &outputs)?;
        for message in advice {
            outcome = outcome.message(message);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::tests::processed_project;
    use crate::record::fields;
    use std::fs;

    #[tokio::test]
    async fn exports_and_synthesizes_included_records() {
        let (_dir, manager) = processed_project().await;
        let mut records = manager.dataset().load_records().unwrap();
        for record in records.values_mut() {
            record.status = RecordState::RevIncluded;
            record.set(fields::SCREENING_CRITERIA, "NA");
        }
        manager.dataset().save_records(&records).unwrap();
        manager.git().add_all().unwrap();
        manager.git().commit("Screened").unwrap();

        let outcome = Data::new(&manager).unwrap().run().await.unwrap();
        assert_eq!(outcome.transitions.count_to(RecordState::RevSynthesized), 2);
        assert!(outcome.commit.is_some());
        assert!(!manager.git().is_dirty().unwrap());

        let exported = fs::read_to_string(manager.paths().join("data/references.bib")).unwrap();
        assert!(exported.contains("Staehr"));
        let records = manager.dataset().load_records().unwrap();
        assert!(records.values().all(|r| r.status == RecordState::RevSynthesized));
    }
}
