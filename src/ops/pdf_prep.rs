//! PDF-prep: checks of imported PDFs.

use futures::{stream, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{states_of, Cancellation, Operation, Outcome};
use crate::endpoints::{PdfPrepEndpoint, PdfPrepOutcome};
use crate::error::Result;
use crate::process::{OperationsType, RecordState};
use crate::record::{fields, Record};
use crate::report::progress_bar;
use crate::review_manager::ReviewManager;

struct Checked {
    id: String,
    /// `(endpoint, reason)` of the first failed check.
    problem: Option<(&'static str, String)>,
}

async fn check_pdf(record: Record, endpoints: &[Arc<dyn PdfPrepEndpoint>], timeout: Duration) -> Checked {
    let Some(file) = record.get(fields::FILE).map(PathBuf::from) else {
        return Checked {
            id: record.id,
            problem: Some(("pdf_prep", "no file linked".to_string())),
        };
    };
    for endpoint in endpoints {
        let problem = match tokio::time::timeout(timeout, endpoint.prep_pdf(&record, &file)).await {
            Ok(Ok(PdfPrepOutcome::Prepared)) => continue,
            Ok(Ok(PdfPrepOutcome::NeedsManualPreparation(reason))) => reason,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timeout after {}s", timeout.as_secs()),
        };
        return Checked {
            id: record.id,
            problem: Some((endpoint.name(), problem)),
        };
    }
    Checked {
        id: record.id,
        problem: None,
    }
}

pub struct PdfPrep<'a> {
    operation: Operation<'a>,
}

impl<'a> PdfPrep<'a> {
    pub fn new(review_manager: &'a ReviewManager) -> Result<Self> {
        Ok(Self {
            operation: Operation::new(review_manager, OperationsType::PdfPrep)?,
        })
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.operation = self.operation.with_cancellation(cancellation);
        self
    }

    pub async fn run(&mut self) -> Result<Outcome> {
        let rm = self.operation.review_manager();
        let settings = rm.settings();
        let package_manager = rm.package_manager();
        let mut endpoints = Vec::new();
        for endpoint_settings in &settings.pdf_prep.pdf_prep_package_endpoints {
            let endpoint = package_manager.load_pdf_prep(endpoint_settings)?;
            self.operation.add_endpoint(endpoint.name());
            endpoints.push(endpoint);
        }

        let mut records = rm.dataset().load_records()?;
        let before = states_of(&records);
        let pending: Vec<Record> = records
            .values()
            .filter(|r| r.status == RecordState::PdfImported)
            .cloned()
            .collect();
        info!("checking {} PDFs", pending.len());

        let timeout = Duration::from_secs(settings.prep.timeout_secs);
        let pb = progress_bar(pending.len() as u64);
        let cancellation = self.operation.cancellation().clone();
        let endpoints = &endpoints;
        let checked: Vec<Checked> = stream::iter(pending)
            .filter(|_| futures::future::ready(!cancellation.is_cancelled()))
            .map(|record| check_pdf(record, endpoints, timeout))
            .buffered(settings.prep.cpu.max(1))
            .inspect(|_| pb.inc(1))
            .collect()
            .await;
        pb.finish_with_message("Done!");

        let mut prepared = 0;
        for Checked { id, problem } in checked {
            let Some(record) = records.get_mut(&id) else {
                continue;
            };
            match problem {
                None => {
                    record.status = RecordState::PdfPrepared;
                    prepared += 1;
                }
                Some((endpoint, reason)) => {
                    self.operation.log_failure(endpoint, &id, reason);
                    record.status = RecordState::PdfNeedsManualPreparation;
                }
            }
        }

        let summary = format!("{prepared} PDFs prepared");
        self.operation.save_and_commit(&summary, &before, &records, &[])
    }
}
