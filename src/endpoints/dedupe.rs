//! Pairwise duplicate detection and merging.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::{async_trait, DedupeEndpoint, EndpointError};
use crate::environment::Environment;
use crate::local_index::DuplicateVerdict;
use crate::matcher::{record_similarity, years_compatible};
use crate::process::RecordState;
use crate::record::{Record, Records};
use crate::settings::EndpointSettings;

const DEFAULT_MERGE_THRESHOLD: f64 = 0.95;

pub struct Dedupe {
    environment: Arc<Environment>,
    merge_threshold: f64,
}

impl Dedupe {
    pub fn new(environment: Arc<Environment>, settings: &EndpointSettings) -> Self {
        let merge_threshold = settings
            .options
            .get("merge_threshold")
            .and_then(|v| v.as_f64())
            .unwrap_or(DEFAULT_MERGE_THRESHOLD);
        Self {
            environment,
            merge_threshold,
        }
    }

    fn is_duplicate(&self, a: &Record, b: &Record) -> bool {
        if shares_colrev_id(a, b) {
            return true;
        }
        // processed records were compared with each other before
        if a.status == RecordState::MdProcessed && b.status == RecordState::MdProcessed {
            return false;
        }
        match self.environment.local_index().is_duplicate(&a.colrev_id, &b.colrev_id) {
            DuplicateVerdict::Yes => true,
            DuplicateVerdict::No => false,
            DuplicateVerdict::Unknown => {
                years_compatible(a, b) && record_similarity(a, b) >= self.merge_threshold
            }
        }
    }
}

fn shares_colrev_id(a: &Record, b: &Record) -> bool {
    a.colrev_id.iter().any(|c| b.colrev_id.contains(c))
}

/// The record that survives a merge: better masterdata, then further along, then ID order.
fn keeps_first(a: &Record, b: &Record) -> bool {
    (a.masterdata_quality(), a.status, std::cmp::Reverse(&a.id))
        >= (b.masterdata_quality(), b.status, std::cmp::Reverse(&b.id))
}

#[async_trait]
impl DedupeEndpoint for Dedupe {
    fn name(&self) -> &'static str {
        "colrev.dedupe"
    }

    async fn run_dedupe(
        &self,
        records: &mut Records,
        candidates: &[String],
    ) -> Result<Vec<(String, String)>, EndpointError> {
        let mut removed: BTreeSet<String> = BTreeSet::new();
        let mut merged = Vec::new();

        for (i, id_a) in candidates.iter().enumerate() {
            for id_b in &candidates[i + 1..] {
                if removed.contains(id_a) {
                    break;
                }
                if removed.contains(id_b) {
                    continue;
                }
                let (Some(a), Some(b)) = (records.get(id_a), records.get(id_b)) else {
                    continue;
                };
                if !self.is_duplicate(a, b) {
                    continue;
                }
                let (keep, drop) = if keeps_first(a, b) { (id_a, id_b) } else { (id_b, id_a) };
                let Some(other) = records.get(drop).cloned() else {
                    continue;
                };
                let Some(main) = records.get_mut(keep) else {
                    continue;
                };
                match main.merge(&other, "colrev.dedupe") {
                    Ok(()) => {
                        debug!("merged {drop} into {keep}");
                        records.remove(drop);
                        removed.insert(drop.clone());
                        merged.push((keep.clone(), drop.clone()));
                    }
                    Err(e) => info!("not merging {keep} and {drop}: {e}"),
                }
            }
        }
        Ok(merged)
    }
}
