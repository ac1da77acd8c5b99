//! Git hooks: `check`, `format` and `share` run before a commit, `report`
//! extends the commit message.

use std::fs;
use std::path::Path;

use super::status::StatusStats;
use crate::error::Result;
use crate::process::RecordState;
use crate::review_manager::ReviewManager;
use crate::settings::COLREV_VERSION;

/// Outcome of a hook; a failed hook blocks the commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookResult {
    pub passed: bool,
    pub messages: Vec<String>,
}

impl HookResult {
    fn passed() -> Self {
        Self {
            passed: true,
            messages: Vec::new(),
        }
    }

    fn failed(messages: Vec<String>) -> Self {
        Self {
            passed: false,
            messages,
        }
    }
}

pub fn check(review_manager: &ReviewManager) -> Result<HookResult> {
    let failures = crate::dataset::checks::run_all(
        review_manager.dataset(),
        &review_manager.settings().screening_criteria(),
    )?;
    if failures.is_empty() {
        return Ok(HookResult::passed());
    }
    Ok(HookResult::failed(failures.iter().map(|f| f.to_string()).collect()))
}

/// Fails when the records file had to be reformatted; the user adds the
/// formatted file and commits again.
pub fn format(review_manager: &ReviewManager) -> Result<HookResult> {
    if review_manager.dataset().format_records_file()? {
        return Ok(HookResult::failed(vec![
            "records file reformatted: add the changes and commit again".to_string(),
        ]));
    }
    Ok(HookResult::passed())
}

/// Warns (without blocking) when the project is below its sharing requirement.
pub fn share(review_manager: &ReviewManager) -> Result<HookResult> {
    let requirement = review_manager.settings().project.share_stat_req;
    let records = review_manager.dataset().load_records()?;
    let stats = StatusStats::compute(&records);
    let mut result = HookResult::passed();
    if !stats.meets(requirement) {
        result.messages.push(format!(
            "the project does not meet share_stat_req {requirement:?} yet; do not push before it does"
        ));
    }
    Ok(result)
}

fn report_block(stats: &StatusStats) -> String {
    let mut block = String::from("\n\nReport\n");
    for state in RecordState::ALL {
        let n = stats.current(state);
        if n > 0 {
            block.push_str(&format!(" {state}: {n}\n"));
        }
    }
    block.push_str(&format!(
        " completed atomic steps: {}/{}\n\nSoftware\n colrev {COLREV_VERSION}\n",
        stats.completed_atomic_steps, stats.atomic_steps
    ));
    block
}

/// Appends the status report to a commit message that has none.
pub fn report(review_manager: &ReviewManager, message_file: &Path) -> Result<HookResult> {
    let message = fs::read_to_string(message_file)?;
    if message.contains("\nReport\n") {
        return Ok(HookResult::passed());
    }
    let records = review_manager.dataset().load_records()?;
    let mut extended = message.trim_end().to_string();
    extended.push_str(&report_block(&StatusStats::compute(&records)));
    fs::write(message_file, extended)?;
    Ok(HookResult::passed())
}
