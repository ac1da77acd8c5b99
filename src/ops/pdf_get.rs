//! PDF-get: linking PDFs to prescreen-included records.

use futures::{stream, StreamExt};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{states_of, Cancellation, Operation, Outcome};
use crate::dataset::ProjectPaths;
use crate::endpoints::pdf::colrev_pdf_id;
use crate::endpoints::PdfGetEndpoint;
use crate::error::Result;
use crate::process::{OperationsType, RecordState};
use crate::record::{fields, Record};
use crate::report::progress_bar;
use crate::review_manager::ReviewManager;
use crate::settings::PdfPathType;

/// Places `source` at `data/pdfs/<ID>.pdf` and records it in `file` and
/// `colrev_pdf_id`.
pub(crate) fn link_pdf(
    paths: &ProjectPaths,
    path_type: PdfPathType,
    record: &mut Record,
    source: &Path,
    provenance: &str,
) -> Result<()> {
    let pdf_dir = paths.pdf_dir();
    fs::create_dir_all(&pdf_dir)?;
    let target = pdf_dir.join(format!("{}.pdf", record.id));
    let source = fs::canonicalize(source)?;
    if fs::canonicalize(&target).ok().as_deref() != Some(source.as_path()) {
        if target.symlink_metadata().is_ok() {
            fs::remove_file(&target)?;
        }
        place(&source, &target, path_type)?;
    }
    record.update_field(fields::FILE, &paths.relative(&target), provenance, "")?;
    record.set(fields::PDF_ID, &colrev_pdf_id(&target)?);
    Ok(())
}

#[cfg(unix)]
fn place(source: &Path, target: &Path, path_type: PdfPathType) -> std::io::Result<()> {
    match path_type {
        PdfPathType::Symlink => std::os::unix::fs::symlink(source, target),
        PdfPathType::Copy => fs::copy(source, target).map(|_| ()),
    }
}

#[cfg(not(unix))]
fn place(source: &Path, target: &Path, _path_type: PdfPathType) -> std::io::Result<()> {
    fs::copy(source, target).map(|_| ())
}

struct Lookup {
    id: String,
    found: Option<(PathBuf, &'static str)>,
    failures: Vec<(&'static str, String)>,
}

/// Asks the endpoints in order until one finds a PDF.
async fn find_pdf(record: Record, endpoints: &[Arc<dyn PdfGetEndpoint>], timeout: Duration) -> Lookup {
    let mut failures = Vec::new();
    for endpoint in endpoints {
        match tokio::time::timeout(timeout, endpoint.get_pdf(&record)).await {
            Ok(Ok(Some(path))) => {
                return Lookup {
                    id: record.id,
                    found: Some((path, endpoint.name())),
                    failures,
                }
            }
            Ok(Ok(None)) => debug!("{}: no PDF from {}", record.id, endpoint.name()),
            Ok(Err(e)) => failures.push((endpoint.name(), e.to_string())),
            Err(_) => failures.push((endpoint.name(), format!("timeout after {}s", timeout.as_secs()))),
        }
    }
    Lookup {
        id: record.id,
        found: None,
        failures,
    }
}

pub struct PdfGet<'a> {
    operation: Operation<'a>,
}

impl<'a> PdfGet<'a> {
    pub fn new(review_manager: &'a ReviewManager) -> Result<Self> {
        Ok(Self {
            operation: Operation::new(review_manager, OperationsType::PdfGet)?,
        })
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.operation = self.operation.with_cancellation(cancellation);
        self
    }

    /// Records without a PDF go to `pdf_needs_manual_retrieval`, or skip the
    /// PDF stages when the project does not require PDFs.
    pub async fn run(&mut self) -> Result<Outcome> {
        let rm = self.operation.review_manager();
        let settings = rm.settings();
        let package_manager = rm.package_manager();
        let mut endpoints = Vec::new();
        for endpoint_settings in &settings.pdf_get.pdf_get_package_endpoints {
            let endpoint = package_manager.load_pdf_get(endpoint_settings)?;
            self.operation.add_endpoint(endpoint.name());
            endpoints.push(endpoint);
        }

        let mut records = rm.dataset().load_records()?;
        let before = states_of(&records);
        let pending: Vec<Record> = records
            .values()
            .filter(|r| r.status == RecordState::RevPrescreenIncluded)
            .cloned()
            .collect();
        info!("retrieving PDFs for {} records", pending.len());

        let timeout = Duration::from_secs(settings.prep.timeout_secs);
        let pb = progress_bar(pending.len() as u64);
        let cancellation = self.operation.cancellation().clone();
        let endpoints = &endpoints;
        let lookups: Vec<Lookup> = stream::iter(pending)
            .filter(|_| futures::future::ready(!cancellation.is_cancelled()))
            .map(|record| find_pdf(record, endpoints, timeout))
            .buffered(settings.prep.cpu.max(1))
            .inspect(|_| pb.inc(1))
            .collect()
            .await;
        pb.finish_with_message("Done!");

        let mut retrieved = 0;
        for lookup in lookups {
            for (endpoint, reason) in &lookup.failures {
                self.operation.log_failure(endpoint, &lookup.id, reason);
            }
            let Some(record) = records.get_mut(&lookup.id) else {
                continue;
            };
            match lookup.found {
                Some((path, endpoint)) => {
                    link_pdf(rm.paths(), settings.pdf_get.pdf_path_type, record, &path, endpoint)?;
                    record.status = RecordState::PdfImported;
                    retrieved += 1;
                }
                None if settings.pdf_get.pdf_required_for_screen_and_synthesis => {
                    record.status = RecordState::PdfNeedsManualRetrieval;
                }
                None => record.status = RecordState::PdfPrepared,
            }
        }

        let summary = format!("{retrieved} PDFs retrieved");
        self.operation.save_and_commit(&summary, &before, &records, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::prescreen::{ManualDecisions, Prescreen};
    use crate::ops::tests::processed_project;

    pub(crate) const PDF: &[u8] = b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\n%%EOF\n";

    #[test]
    fn links_and_identifies_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path().join("project"));
        let source = dir.path().join("download.pdf");
        fs::write(&source, PDF).unwrap();

        let mut record = Record::new("Doe2021", "article");
        link_pdf(&paths, PdfPathType::Copy, &mut record, &source, "colrev.pdfs_dir").unwrap();
        assert_eq!(record.get(fields::FILE), Some("data/pdfs/Doe2021.pdf"));
        assert!(record.get(fields::PDF_ID).unwrap().starts_with("cpid1:"));
        assert!(paths.pdf_dir().join("Doe2021.pdf").is_file());

        // linking the file in place keeps it
        let target = paths.pdf_dir().join("Doe2021.pdf");
        link_pdf(&paths, PdfPathType::Symlink, &mut record, &target, "manual").unwrap();
        assert_eq!(fs::read(&target).unwrap(), PDF);
    }

    #[tokio::test]
    async fn retrieves_from_the_pdf_directory() {
        let (_dir, manager) = processed_project().await;
        let manual = ManualDecisions {
            include_all: true,
            ..ManualDecisions::default()
        };
        Prescreen::new(&manager).unwrap().run(&manual).await.unwrap();

        let records = manager.dataset().load_records().unwrap();
        let staehr = records.keys().find(|id| id.starts_with("Staehr")).cloned().unwrap();
        fs::create_dir_all(manager.paths().pdf_dir()).unwrap();
        fs::write(manager.paths().pdf_dir().join(format!("{staehr}.pdf")), PDF).unwrap();

        let outcome = PdfGet::new(&manager).unwrap().run().await.unwrap();
        assert_eq!(outcome.transitions.count_to(RecordState::PdfImported), 1);
        assert_eq!(outcome.transitions.count_to(RecordState::PdfNeedsManualRetrieval), 1);
        let records = manager.dataset().load_records().unwrap();
        assert_eq!(records[&staehr].get(fields::FILE), Some(format!("data/pdfs/{staehr}.pdf").as_str()));
    }
}
