//! Prep: metadata preparation of imported records.

use futures::{stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{states_of, Cancellation, Operation, Outcome};
use crate::endpoints::PrepEndpoint;
use crate::error::Result;
use crate::matcher::record_similarity;
use crate::process::{OperationsType, RecordState};
use crate::record::quality::run_quality_model;
use crate::record::{fields, ColrevIdAuthors, DefectCode, Record};
use crate::report::progress_bar;
use crate::review_manager::ReviewManager;

struct LoadedRound {
    name: String,
    similarity: f64,
    endpoints: Vec<Arc<dyn PrepEndpoint>>,
}

/// A per-record problem, reported after the record is done.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Failure {
    endpoint: String,
    reason: String,
}

struct Prepared {
    record: Record,
    failures: Vec<Failure>,
}

struct PrepConfig {
    timeout: Duration,
    defects_to_ignore: Vec<String>,
    colrev_id_authors: ColrevIdAuthors,
}

/// Runs the rounds on one record.
///
/// A timeout leaves the record in its state with a `timeout` note; an
/// endpoint error skips that endpoint.
async fn prepare_record(original: Record, rounds: &[LoadedRound], config: &PrepConfig) -> Prepared {
    let mut record = original.clone();
    record.remove_provenance_note(fields::STATUS, DefectCode::Timeout.as_str());
    let mut failures = Vec::new();

    for round in rounds {
        for endpoint in &round.endpoints {
            if record.masterdata_is_curated() && !endpoint.always_apply_changes() {
                continue;
            }
            match tokio::time::timeout(config.timeout, endpoint.prepare(record.clone())).await {
                Err(_) => {
                    let mut unchanged = original;
                    unchanged.remove_provenance_note(fields::STATUS, DefectCode::Timeout.as_str());
                    unchanged.add_data_provenance_note(fields::STATUS, DefectCode::Timeout.as_str(), endpoint.name());
                    failures.push(Failure {
                        endpoint: endpoint.name().to_string(),
                        reason: format!("timeout after {}s", config.timeout.as_secs()),
                    });
                    return Prepared {
                        record: unchanged,
                        failures,
                    };
                }
                Ok(Err(e)) => failures.push(Failure {
                    endpoint: endpoint.name().to_string(),
                    reason: e.to_string(),
                }),
                Ok(Ok(prepared)) => {
                    let similarity = record_similarity(&record, &prepared);
                    if endpoint.always_apply_changes() || similarity >= round.similarity {
                        record = prepared;
                    } else {
                        debug!(
                            "{}: {} changes rejected in round {} (similarity {similarity:.2})",
                            record.id,
                            endpoint.name(),
                            round.name
                        );
                    }
                }
            }
        }
    }

    run_quality_model(&mut record);
    record.set_prep_status(&config.defects_to_ignore);
    if record.status == RecordState::MdPrepared {
        if let Err(e) = record.update_colrev_id(config.colrev_id_authors) {
            failures.push(Failure {
                endpoint: "colrev_id".to_string(),
                reason: e.to_string(),
            });
        }
    }
    Prepared { record, failures }
}

pub struct Prep<'a> {
    operation: Operation<'a>,
}

impl<'a> Prep<'a> {
    pub fn new(review_manager: &'a ReviewManager) -> Result<Self> {
        Ok(Self {
            operation: Operation::new(review_manager, OperationsType::Prep)?,
        })
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.operation = self.operation.with_cancellation(cancellation);
        self
    }

    fn load_rounds(&mut self) -> Result<Vec<LoadedRound>> {
        let rm = self.operation.review_manager();
        let package_manager = rm.package_manager();
        let mut rounds = Vec::new();
        for round in &rm.settings().prep.prep_rounds {
            let mut endpoints = Vec::new();
            for settings in &round.prep_package_endpoints {
                let endpoint = package_manager.load_prep(settings)?;
                self.operation.add_endpoint(endpoint.name());
                endpoints.push(endpoint);
            }
            rounds.push(LoadedRound {
                name: round.name.clone(),
                similarity: round.similarity,
                endpoints,
            });
        }
        Ok(rounds)
    }

    /// Prepares every record in `md_imported`, `cpu` records at a time.
    /// Results are applied in records-file order.
    pub async fn run(&mut self) -> Result<Outcome> {
        let rounds = self.load_rounds()?;
        let rm = self.operation.review_manager();
        let settings = rm.settings();
        let mut records = rm.dataset().load_records()?;
        let before = states_of(&records);
        let config = PrepConfig {
            timeout: Duration::from_secs(settings.prep.timeout_secs),
            defects_to_ignore: settings.prep.defects_to_ignore.clone(),
            colrev_id_authors: settings.project.colrev_id_authors,
        };

        let pending: Vec<Record> = records
            .values()
            .filter(|r| r.status == RecordState::MdImported)
            .cloned()
            .collect();
        info!("preparing {} records", pending.len());
        let pb = progress_bar(pending.len() as u64);
        let cancellation = self.operation.cancellation().clone();
        let rounds = &rounds;
        let config = &config;
        let results: Vec<Option<Prepared>> = stream::iter(pending)
            .map(|record| {
                let cancellation = cancellation.clone();
                async move {
                    if cancellation.is_cancelled() {
                        return None;
                    }
                    Some(prepare_record(record, rounds, config).await)
                }
            })
            .buffered(settings.prep.cpu.max(1))
            .inspect(|_| pb.inc(1))
            .collect()
            .await;
        pb.finish_with_message("Done!");

        let mut prepared_ids = Vec::new();
        for Prepared { record, failures } in results.into_iter().flatten() {
            for failure in &failures {
                self.operation.log_failure(&failure.endpoint, &record.id, &failure.reason);
            }
            if record.status != RecordState::MdImported {
                prepared_ids.push(record.id.clone());
            }
            records.insert(record.id.clone(), record);
        }
        if self.operation.is_cancelled() {
            info!("prep interrupted: committing {} prepared records", prepared_ids.len());
        }
        rm.dataset()
            .set_ids(&mut records, settings.project.id_pattern, Some(&prepared_ids))?;

        let prepared = records.values().filter(|r| r.status == RecordState::MdPrepared).count();
        let manual = records
            .values()
            .filter(|r| r.status == RecordState::MdNeedsManualPreparation)
            .count();
        let summary = format!("{prepared} records prepared, {manual} need manual preparation");
        self.operation.save_and_commit(&summary, &before, &records, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::{async_trait, EndpointError};
    use crate::ops::load::Load;
    use crate::ops::tests::project;

    struct Slow;

    #[async_trait]
    impl PrepEndpoint for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn source_correction_hint(&self) -> &'static str {
            ""
        }
        fn always_apply_changes(&self) -> bool {
            true
        }
        async fn prepare(&self, record: Record) -> Result<Record, EndpointError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(record)
        }
    }

    struct Renamer;

    #[async_trait]
    impl PrepEndpoint for Renamer {
        fn name(&self) -> &'static str {
            "renamer"
        }
        fn source_correction_hint(&self) -> &'static str {
            ""
        }
        fn always_apply_changes(&self) -> bool {
            false
        }
        async fn prepare(&self, mut record: Record) -> Result<Record, EndpointError> {
            record.set(fields::TITLE, "Something completely different");
            Ok(record)
        }
    }

    fn config(timeout: Duration) -> PrepConfig {
        PrepConfig {
            timeout,
            defects_to_ignore: Vec::new(),
            colrev_id_authors: ColrevIdAuthors::FirstAuthor,
        }
    }

    fn imported() -> Record {
        let mut record = Record::new("Doe2021", "inproceedings")
            .with(fields::AUTHOR, "Doe, John")
            .with(fields::TITLE, "A study of literature reviews")
            .with(fields::BOOKTITLE, "International Conference on Information Systems")
            .with(fields::YEAR, "2021");
        record.status = RecordState::MdImported;
        record
    }

    #[tokio::test]
    async fn timeout_leaves_record_with_note() {
        let rounds = vec![LoadedRound {
            name: "prep".into(),
            similarity: 0.8,
            endpoints: vec![Arc::new(Slow)],
        }];
        let result = prepare_record(imported(), &rounds, &config(Duration::from_millis(10))).await;
        assert_eq!(result.record.status, RecordState::MdImported);
        assert_eq!(result.failures.len(), 1);
        let note = result.record.data_provenance.get(fields::STATUS).unwrap();
        assert_eq!(note.source, "slow");
        assert!(note.notes().contains(&"timeout"));
    }

    #[tokio::test]
    async fn dissimilar_changes_are_rejected() {
        let rounds = vec![LoadedRound {
            name: "prep".into(),
            similarity: 0.8,
            endpoints: vec![Arc::new(Renamer)],
        }];
        let result = prepare_record(imported(), &rounds, &config(Duration::from_secs(5))).await;
        assert_eq!(result.record.get(fields::TITLE), Some("A study of literature reviews"));
        assert_eq!(result.record.status, RecordState::MdPrepared);
        assert_eq!(result.record.colrev_id.len(), 1);
    }

    #[tokio::test]
    async fn prepares_loaded_records() {
        let (_dir, manager) = project("literature_review");
        Load::new(&manager).unwrap().run(false).await.unwrap();
        let outcome = Prep::new(&manager).unwrap().run().await.unwrap();
        assert!(outcome.commit.is_some());

        let records = manager.dataset().load_records().unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.values().all(|r| r.status == RecordState::MdPrepared));
        assert!(records.values().all(|r| !r.colrev_id.is_empty()));
        // both spellings of the Staehr title end up with the same fingerprint
        let staehr: Vec<&Record> = records.values().filter(|r| r.id.starts_with("Staehr")).collect();
        assert_eq!(staehr.len(), 2);
        assert_eq!(staehr[0].colrev_id, staehr[1].colrev_id);
    }
}
