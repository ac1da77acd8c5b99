//! Prep-man: manual fixes of records the automated prep could not complete.

use tracing::info;

use super::{states_of, Operation, Outcome};
use crate::error::{ColrevError, Result};
use crate::process::{OperationsType, RecordState};
use crate::record::quality::run_quality_model;
use crate::record::{fields, DefectCode, Record};
use crate::review_manager::ReviewManager;

pub const MANUAL_SOURCE: &str = "manual";

/// Field edits for one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualEdit {
    pub id: String,
    pub set: Vec<(String, String)>,
    pub remove: Vec<String>,
    /// Fields whose current defects are accepted as they are.
    pub ignore_defects: Vec<String>,
}

impl ManualEdit {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.set.push((key.to_string(), value.to_string()));
        self
    }

    pub fn remove(mut self, key: &str) -> Self {
        self.remove.push(key.to_string());
        self
    }

    pub fn ignore(mut self, key: &str) -> Self {
        self.ignore_defects.push(key.to_string());
        self
    }

    /// Parses `key=value` pairs from the command line.
    pub fn parse_assignments(id: &str, assignments: &[String]) -> Result<Self> {
        let mut edit = Self::new(id);
        for assignment in assignments {
            let (key, value) = assignment.split_once('=').ok_or_else(|| {
                ColrevError::InvalidInput(format!("expected key=value, got '{assignment}'"))
            })?;
            edit = edit.set(key.trim(), value.trim());
        }
        Ok(edit)
    }
}

fn apply(record: &mut Record, edit: &ManualEdit) -> Result<()> {
    for (key, value) in &edit.set {
        record.update_field(key, value, MANUAL_SOURCE, "")?;
    }
    for key in &edit.remove {
        record.remove_field(key);
    }
    run_quality_model(record);
    for key in &edit.ignore_defects {
        let defects: Vec<DefectCode> = record
            .defects()
            .into_iter()
            .filter(|(field, _)| field == key)
            .map(|(_, d)| d)
            .collect();
        for defect in defects {
            let marker = format!("IGNORE:{defect}");
            if fields::is_masterdata(key) {
                record.add_masterdata_provenance_note(key, &marker, MANUAL_SOURCE);
            } else {
                record.add_data_provenance_note(key, &marker, MANUAL_SOURCE);
            }
        }
    }
    Ok(())
}

pub struct PrepMan<'a> {
    operation: Operation<'a>,
}

impl<'a> PrepMan<'a> {
    pub fn new(review_manager: &'a ReviewManager) -> Result<Self> {
        Ok(Self {
            operation: Operation::new(review_manager, OperationsType::PrepMan)?,
        })
    }

    /// Records waiting for manual preparation with their open defects.
    pub fn pending(&self) -> Result<Vec<(Record, Vec<(String, DefectCode)>)>> {
        let records = self.operation.review_manager().dataset().load_records()?;
        Ok(records
            .into_values()
            .filter(|r| r.status == RecordState::MdNeedsManualPreparation)
            .map(|r| {
                let defects = r.defects();
                (r, defects)
            })
            .collect())
    }

    /// Applies the edits. A record without remaining defects moves to
    /// `md_prepared`; the others stay where they are.
    pub async fn run(&mut self, edits: &[ManualEdit]) -> Result<Outcome> {
        let rm = self.operation.review_manager();
        let settings = rm.settings();
        let mut records = rm.dataset().load_records()?;
        let before = states_of(&records);

        let mut prepared = 0;
        for edit in edits {
            let record = records
                .get_mut(&edit.id)
                .ok_or_else(|| ColrevError::InvalidInput(format!("no record with ID {}", edit.id)))?;
            if record.status != RecordState::MdNeedsManualPreparation {
                return Err(ColrevError::InvalidInput(format!(
                    "{} is {}, not md_needs_manual_preparation",
                    edit.id, record.status
                )));
            }
            apply(record, edit)?;
            record.set_prep_status(&settings.prep.defects_to_ignore);
            if record.status == RecordState::MdPrepared {
                record.update_colrev_id(settings.project.colrev_id_authors)?;
                prepared += 1;
            } else {
                info!("{}: remaining defects {:?}", record.id, record.defects());
            }
        }
        self.operation.add_endpoint(MANUAL_SOURCE);
        let summary = format!("{prepared} of {} records prepared manually", edits.len());
        self.operation.save_and_commit(&summary, &before, &records, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::load::Load;
    use crate::ops::prep::Prep;
    use crate::ops::tests::project;
    use std::fs;

    const INCOMPLETE: &str = "@article{m1,\n  author = {Roe, Ann},\n  title = {Digital platforms},\n  journal = {MIS Quarterly},\n  year = {2019},\n}\n";

    #[test]
    fn ignore_marks_defects_as_accepted() {
        let mut record = Record::new("Roe2019", "article")
            .with(fields::AUTHOR, "Roe, Ann")
            .with(fields::TITLE, "Digital platforms")
            .with(fields::JOURNAL, "MIS Quarterly")
            .with(fields::YEAR, "2019")
            .with(fields::VOLUME, "43");
        run_quality_model(&mut record);
        assert!(record.has_quality_defects());

        apply(&mut record, &ManualEdit::new("Roe2019").ignore(fields::NUMBER)).unwrap();
        assert!(!record.has_quality_defects());
    }

    #[test]
    fn parses_assignments() {
        let edit = ManualEdit::parse_assignments("A", &["volume = 43".to_string()]).unwrap();
        assert_eq!(edit.set, vec![("volume".to_string(), "43".to_string())]);
        assert!(ManualEdit::parse_assignments("A", &["volume".to_string()]).is_err());
    }

    #[tokio::test]
    async fn completes_missing_fields() {
        let (_dir, manager) = project("literature_review");
        fs::write(manager.paths().search_dir().join("refs.bib"), INCOMPLETE).unwrap();
        manager.git().add_all().unwrap();
        manager.git().commit("Replace search results").unwrap();
        Load::new(&manager).unwrap().run(false).await.unwrap();
        Prep::new(&manager).unwrap().run().await.unwrap();

        let mut prep_man = PrepMan::new(&manager).unwrap();
        let pending = prep_man.pending().unwrap();
        assert_eq!(pending.len(), 1);
        let id = pending[0].0.id.clone();

        let edit = ManualEdit::new(&id).set(fields::VOLUME, "43").set(fields::NUMBER, "2");
        prep_man.run(&[edit]).await.unwrap();

        let record = manager.dataset().load_records().unwrap().remove(&id).unwrap();
        assert_eq!(record.status, RecordState::MdPrepared);
        assert_eq!(record.provenance_for(fields::VOLUME).unwrap().source, MANUAL_SOURCE);
        assert!(!record.colrev_id.is_empty());
    }

    #[tokio::test]
    async fn rejects_records_in_other_states() {
        let (_dir, manager) = project("literature_review");
        Load::new(&manager).unwrap().run(false).await.unwrap();
        Prep::new(&manager).unwrap().run().await.unwrap();
        assert!(PrepMan::new(&manager).is_err());

        let forced = manager.with_force(true);
        let id = forced.dataset().load_records().unwrap().keys().next().cloned().unwrap();
        let result = PrepMan::new(&forced).unwrap().run(&[ManualEdit::new(id)]).await;
        assert!(matches!(result, Err(ColrevError::InvalidInput(_))));
    }
}
