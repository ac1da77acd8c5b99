//! Dedupe: merging duplicates and moving prepared records to `md_processed`.

use tracing::info;

use super::{states_of, Operation, Outcome};
use crate::error::Result;
use crate::process::{OperationsType, RecordState};
use crate::review_manager::ReviewManager;

pub struct Dedupe<'a> {
    operation: Operation<'a>,
}

impl<'a> Dedupe<'a> {
    pub fn new(review_manager: &'a ReviewManager) -> Result<Self> {
        Ok(Self {
            operation: Operation::new(review_manager, OperationsType::Dedupe)?,
        })
    }

    pub async fn run(&mut self) -> Result<Outcome> {
        let rm = self.operation.review_manager();
        let settings = rm.settings();
        let mut records = rm.dataset().load_records()?;
        let before = states_of(&records);
        let package_manager = rm.package_manager();

        let mut merged = Vec::new();
        for endpoint_settings in &settings.dedupe.dedupe_package_endpoints {
            let endpoint = package_manager.load_dedupe(endpoint_settings)?;
            self.operation.add_endpoint(endpoint.name());
            let candidates: Vec<String> = records
                .values()
                .filter(|r| matches!(r.status, RecordState::MdPrepared | RecordState::MdProcessed))
                .map(|r| r.id.clone())
                .collect();
            let pairs = endpoint.run_dedupe(&mut records, &candidates).await?;
            info!("{}: {} duplicates merged", endpoint.name(), pairs.len());
            merged.extend(pairs);
        }

        let mut processed = 0;
        for record in records.values_mut().filter(|r| r.status == RecordState::MdPrepared) {
            record.status = RecordState::MdProcessed;
            if let Err(e) = record.update_colrev_id(settings.project.colrev_id_authors) {
                self.operation.log_failure("colrev_id", &record.id, e.to_string());
            }
            processed += 1;
        }
        for (kept, removed) in &merged {
            info!("{removed} merged into {kept}");
        }

        let summary = format!("{} duplicates merged, {processed} records processed", merged.len());
        self.operation.save_and_commit(&summary, &before, &records, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::load::Load;
    use crate::ops::prep::Prep;
    use crate::ops::tests::project;
    use crate::ops::status::StatusStats;

    #[tokio::test]
    async fn merges_the_duplicate_pair() {
        let (_dir, manager) = project("literature_review");
        Load::new(&manager).unwrap().run(false).await.unwrap();
        Prep::new(&manager).unwrap().run().await.unwrap();

        let outcome = Dedupe::new(&manager).unwrap().run().await.unwrap();
        assert_eq!(outcome.transitions.removed.len(), 1);
        assert_eq!(outcome.transitions.count_to(RecordState::MdProcessed), 2);

        let records = manager.dataset().load_records().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.values().all(|r| r.status == RecordState::MdProcessed));
        let staehr = records.values().find(|r| r.id.starts_with("Staehr")).unwrap();
        assert_eq!(staehr.origin, vec!["refs.bib/r1".to_string(), "refs.bib/r2".to_string()]);

        let stats = StatusStats::load(&manager.paths().status_file()).unwrap().unwrap();
        assert_eq!(stats.md_duplicates_removed, 1);
        assert_eq!(stats.nr_origins, 3);
    }

    #[tokio::test]
    async fn refuses_to_run_before_prep() {
        let (_dir, manager) = project("literature_review");
        Load::new(&manager).unwrap().run(false).await.unwrap();
        assert!(Dedupe::new(&manager).is_err());
    }
}
