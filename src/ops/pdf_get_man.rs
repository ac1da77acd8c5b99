//! PDF-get-man: PDFs retrieved by hand, or marked as not available.

use std::path::PathBuf;

use super::pdf_get::link_pdf;
use super::{states_of, Operation, Outcome};
use crate::error::{ColrevError, Result};
use crate::process::{OperationsType, RecordState};
use crate::record::Record;
use crate::review_manager::ReviewManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdfRetrieval {
    Found { id: String, path: PathBuf },
    NotAvailable { id: String },
}

impl PdfRetrieval {
    fn id(&self) -> &str {
        match self {
            PdfRetrieval::Found { id, .. } | PdfRetrieval::NotAvailable { id } => id,
        }
    }
}

pub struct PdfGetMan<'a> {
    operation: Operation<'a>,
}

impl<'a> PdfGetMan<'a> {
    pub fn new(review_manager: &'a ReviewManager) -> Result<Self> {
        Ok(Self {
            operation: Operation::new(review_manager, OperationsType::PdfGetMan)?,
        })
    }

    pub fn pending(&self) -> Result<Vec<Record>> {
        let records = self.operation.review_manager().dataset().load_records()?;
        Ok(records
            .into_values()
            .filter(|r| r.status == RecordState::PdfNeedsManualRetrieval)
            .collect())
    }

    pub async fn run(&mut self, retrievals: &[PdfRetrieval]) -> Result<Outcome> {
        let rm = self.operation.review_manager();
        let mut records = rm.dataset().load_records()?;
        let before = states_of(&records);

        for retrieval in retrievals {
            let record = records
                .get_mut(retrieval.id())
                .filter(|r| r.status == RecordState::PdfNeedsManualRetrieval)
                .ok_or_else(|| {
                    ColrevError::InvalidInput(format!(
                        "{} is not in pdf_needs_manual_retrieval",
                        retrieval.id()
                    ))
                })?;
            match retrieval {
                PdfRetrieval::Found { path, .. } => {
                    let path = if path.is_absolute() {
                        path.clone()
                    } else {
                        rm.paths().root().join(path)
                    };
                    if !path.is_file() {
                        return Err(ColrevError::InvalidInput(format!("{} does not exist", path.display())));
                    }
                    link_pdf(rm.paths(), rm.settings().pdf_get.pdf_path_type, record, &path, "manual")?;
                    record.status = RecordState::PdfImported;
                }
                PdfRetrieval::NotAvailable { .. } => record.status = RecordState::PdfNotAvailable,
            }
        }
        self.operation.add_endpoint("manual");
        let found = retrievals
            .iter()
            .filter(|r| matches!(r, PdfRetrieval::Found { .. }))
            .count();
        let summary = format!(
            "{found} PDFs retrieved manually, {} not available",
            retrievals.len() - found
        );
        self.operation.save_and_commit(&summary, &before, &records, &[])
    }
}
