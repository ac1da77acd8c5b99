//! Status statistics, cached in `status.yaml`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::process::{ProcessModel, RecordState};
use crate::record::Records;
use crate::settings::ShareStatReq;

/// States a record only visits when automation fails; they are not
/// part of the main path and are counted as they are.
const SIDE_STATES: [RecordState; 3] = [
    RecordState::MdNeedsManualPreparation,
    RecordState::PdfNeedsManualRetrieval,
    RecordState::PdfNeedsManualPreparation,
];

/// States that end a record's path before synthesis.
const EXCLUSION_STATES: [RecordState; 3] = [
    RecordState::RevPrescreenExcluded,
    RecordState::PdfNotAvailable,
    RecordState::RevExcluded,
];

const TOTAL_ATOMIC_STEPS: usize = 8;

fn completed_steps(state: RecordState) -> usize {
    match state {
        RecordState::MdRetrieved => 0,
        RecordState::MdImported | RecordState::MdNeedsManualPreparation => 1,
        RecordState::MdPrepared => 2,
        RecordState::MdProcessed => 3,
        RecordState::RevPrescreenExcluded
        | RecordState::RevPrescreenIncluded
        | RecordState::PdfNeedsManualRetrieval => 4,
        RecordState::PdfImported | RecordState::PdfNotAvailable | RecordState::PdfNeedsManualPreparation => 5,
        RecordState::PdfPrepared => 6,
        RecordState::RevExcluded | RecordState::RevIncluded => 7,
        RecordState::RevSynthesized => 8,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusStats {
    /// Records per state.
    pub currently: BTreeMap<RecordState, usize>,
    /// Records that reached each state. Before `md_processed` this counts
    /// origins, since duplicates are still separate records there.
    pub overall: BTreeMap<RecordState, usize>,
    pub nr_records: usize,
    pub nr_origins: usize,
    pub md_duplicates_removed: usize,
    pub nr_curated_records: usize,
    pub non_completed: usize,
    pub completeness_condition: bool,
    pub atomic_steps: usize,
    pub completed_atomic_steps: usize,
}

impl StatusStats {
    pub fn compute(records: &Records) -> Self {
        let mut currently: BTreeMap<RecordState, usize> = RecordState::ALL.iter().map(|s| (*s, 0)).collect();
        for record in records.values() {
            *currently.entry(record.status).or_default() += 1;
        }

        let mut overall = BTreeMap::new();
        for state in RecordState::ALL {
            let count = if SIDE_STATES.contains(&state) {
                currently[&state]
            } else {
                records
                    .values()
                    .filter(|r| ProcessModel::is_reachable(state, r.status))
                    .map(|r| {
                        if state < RecordState::MdProcessed {
                            r.origin.len().max(1)
                        } else {
                            1
                        }
                    })
                    .sum()
            };
            overall.insert(state, count);
        }

        let md_duplicates_removed = records
            .values()
            .filter(|r| r.status.is_post_md_processed())
            .map(|r| r.origin.len().saturating_sub(1))
            .sum();
        let non_completed = records
            .values()
            .filter(|r| r.status != RecordState::RevSynthesized && !EXCLUSION_STATES.contains(&r.status))
            .count();

        let mut atomic_steps = 0;
        let mut completed_atomic_steps = 0;
        for record in records.values() {
            let done = completed_steps(record.status);
            completed_atomic_steps += done;
            atomic_steps += if EXCLUSION_STATES.contains(&record.status) {
                done
            } else {
                TOTAL_ATOMIC_STEPS
            };
        }

        Self {
            currently,
            overall,
            nr_records: records.len(),
            nr_origins: records.values().map(|r| r.origin.len()).sum(),
            md_duplicates_removed,
            nr_curated_records: records.values().filter(|r| r.masterdata_is_curated()).count(),
            non_completed,
            completeness_condition: non_completed == 0,
            atomic_steps,
            completed_atomic_steps,
        }
    }

    pub fn current(&self, state: RecordState) -> usize {
        self.currently.get(&state).copied().unwrap_or(0)
    }

    /// Records currently in a state before `state`.
    pub fn count_before(&self, state: RecordState) -> usize {
        self.currently
            .iter()
            .filter(|(s, _)| **s < state)
            .map(|(_, n)| n)
            .sum()
    }

    /// Records that still have to pass `screen`, ignoring excluded ones.
    pub fn screening_pending(&self) -> usize {
        self.currently
            .iter()
            .filter(|(s, _)| **s < RecordState::RevExcluded && !s.is_terminal())
            .map(|(_, n)| n)
            .sum()
    }

    /// Share of completed atomic steps, in percent.
    pub fn progress(&self) -> f64 {
        if self.atomic_steps == 0 {
            return 0.0;
        }
        self.completed_atomic_steps as f64 / self.atomic_steps as f64 * 100.0
    }

    /// Whether the project meets the completeness its collaborators agreed on
    /// before sharing.
    pub fn meets(&self, requirement: ShareStatReq) -> bool {
        match requirement {
            ShareStatReq::None => true,
            ShareStatReq::Processed => self.count_before(RecordState::MdProcessed) == 0,
            ShareStatReq::Screened => self.screening_pending() == 0,
            ShareStatReq::Completed => self.non_completed == 0,
        }
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(serde_yaml::from_str(&fs::read_to_string(path)?)?))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use tempfile::tempdir;

    fn record(id: &str, status: RecordState, origins: &[&str]) -> Record {
        let mut record = Record::new(id, "article");
        record.status = status;
        record.origin = origins.iter().map(|o| o.to_string()).collect();
        record
    }

    fn records(list: Vec<Record>) -> Records {
        list.into_iter().map(|r| (r.id.clone(), r)).collect()
    }

    #[test]
    fn counts_merged_origins_and_completion() {
        let records = records(vec![
            record("A", RecordState::RevSynthesized, &["s.bib/1", "s.bib/2"]),
            record("B", RecordState::RevPrescreenExcluded, &["s.bib/3"]),
            record("C", RecordState::PdfNeedsManualRetrieval, &["s.bib/4"]),
            record("D", RecordState::MdImported, &["s.bib/5"]),
        ]);
        let stats = StatusStats::compute(&records);

        assert_eq!(stats.nr_records, 4);
        assert_eq!(stats.nr_origins, 5);
        assert_eq!(stats.md_duplicates_removed, 1);
        assert_eq!(stats.current(RecordState::MdImported), 1);
        assert_eq!(stats.current(RecordState::MdPrepared), 0);
        // every origin was retrieved, three records were processed
        assert_eq!(stats.overall[&RecordState::MdRetrieved], 5);
        assert_eq!(stats.overall[&RecordState::MdPrepared], 4);
        assert_eq!(stats.overall[&RecordState::MdProcessed], 3);
        assert_eq!(stats.overall[&RecordState::RevPrescreenIncluded], 2);
        assert_eq!(stats.overall[&RecordState::PdfNeedsManualRetrieval], 1);
        assert_eq!(stats.non_completed, 2);
        assert!(!stats.completeness_condition);
        assert_eq!(stats.count_before(RecordState::MdProcessed), 1);
        assert_eq!(stats.screening_pending(), 2);
        assert!(stats.meets(ShareStatReq::None));
        assert!(!stats.meets(ShareStatReq::Processed));
        assert!(!stats.meets(ShareStatReq::Completed));
        // A: 8 of 8, B: 4 of 4, C: 4 of 8, D: 1 of 8
        assert_eq!(stats.atomic_steps, 28);
        assert_eq!(stats.completed_atomic_steps, 17);
    }

    #[test]
    fn saves_and_loads_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.yaml");
        assert_eq!(StatusStats::load(&path).unwrap(), None);

        let stats = StatusStats::compute(&records(vec![record("A", RecordState::RevIncluded, &["s.bib/1"])]));
        stats.save(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("rev_included: 1"));
        assert_eq!(StatusStats::load(&path).unwrap(), Some(stats));
    }
}
