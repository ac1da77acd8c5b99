//! PDF-prep-man: PDFs fixed by hand.

use super::{states_of, Operation, Outcome};
use crate::endpoints::pdf::colrev_pdf_id;
use crate::error::{ColrevError, Result};
use crate::process::{OperationsType, RecordState};
use crate::record::{fields, Record};
use crate::review_manager::ReviewManager;

pub struct PdfPrepMan<'a> {
    operation: Operation<'a>,
}

impl<'a> PdfPrepMan<'a> {
    pub fn new(review_manager: &'a ReviewManager) -> Result<Self> {
        Ok(Self {
            operation: Operation::new(review_manager, OperationsType::PdfPrepMan)?,
        })
    }

    pub fn pending(&self) -> Result<Vec<Record>> {
        let records = self.operation.review_manager().dataset().load_records()?;
        Ok(records
            .into_values()
            .filter(|r| r.status == RecordState::PdfNeedsManualPreparation)
            .collect())
    }

    /// Marks the PDFs as prepared. The `colrev_pdf_id` is recomputed since
    /// the file was usually edited.
    pub async fn run(&mut self, ids: &[String]) -> Result<Outcome> {
        let rm = self.operation.review_manager();
        let mut records = rm.dataset().load_records()?;
        let before = states_of(&records);

        for id in ids {
            let record = records
                .get_mut(id)
                .filter(|r| r.status == RecordState::PdfNeedsManualPreparation)
                .ok_or_else(|| ColrevError::InvalidInput(format!("{id} is not in pdf_needs_manual_preparation")))?;
            let file = record
                .get(fields::FILE)
                .map(|f| rm.paths().root().join(f))
                .filter(|p| p.is_file())
                .ok_or_else(|| ColrevError::InvalidInput(format!("{id}: the linked PDF does not exist")))?;
            record.set(fields::PDF_ID, &colrev_pdf_id(&file)?);
            record.status = RecordState::PdfPrepared;
        }
        self.operation.add_endpoint("manual");
        let summary = format!("{} PDFs prepared manually", ids.len());
        self.operation.save_and_commit(&summary, &before, &records, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::pdf_get::PdfGet;
    use crate::ops::pdf_prep::PdfPrep;
    use crate::ops::prescreen::{ManualDecisions, Prescreen};
    use crate::ops::tests::processed_project;
    use std::fs;

    #[tokio::test]
    async fn marks_fixed_pdfs_prepared() {
        let (_dir, manager) = processed_project().await;
        let manual = ManualDecisions {
            include_all: true,
            ..ManualDecisions::default()
        };
        Prescreen::new(&manager).unwrap().run(&manual).await.unwrap();
        let ids: Vec<String> = manager.dataset().load_records().unwrap().into_keys().collect();
        fs::create_dir_all(manager.paths().pdf_dir()).unwrap();
        for id in &ids {
            fs::write(manager.paths().pdf_dir().join(format!("{id}.pdf")), b"scanned garbage").unwrap();
        }
        PdfGet::new(&manager).unwrap().run().await.unwrap();
        PdfPrep::new(&manager).unwrap().run().await.unwrap();

        let mut prep_man = PdfPrepMan::new(&manager).unwrap();
        assert_eq!(prep_man.pending().unwrap().len(), 2);
        let fixed = manager.paths().pdf_dir().join(format!("{}.pdf", ids[0]));
        fs::write(&fixed, b"%PDF-1.4\n%%EOF\n").unwrap();
        prep_man.run(&ids[..1]).await.unwrap();

        let records = manager.dataset().load_records().unwrap();
        assert_eq!(records[&ids[0]].status, RecordState::PdfPrepared);
        assert_eq!(records[&ids[0]].get(fields::PDF_ID), Some(colrev_pdf_id(&fixed).unwrap().as_str()));
        assert_eq!(records[&ids[1]].status, RecordState::PdfNeedsManualPreparation);
    }
}
