//! Advisor: what to do next, for the review, the environment and the team.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::status::StatusStats;
use super::{corrections, env, states_of, TransitionReport};
use crate::dataset::{bibtex, ProjectPaths};
use crate::error::Result;
use crate::parser;
use crate::process::{OperationsType, ProcessModel, RecordState};
use crate::record::Records;
use crate::review_manager::ReviewManager;
use crate::settings::Settings;

/// Operations that move records, in the order of the review.
const REVIEW_OPERATIONS: [OperationsType; 11] = [
    OperationsType::Load,
    OperationsType::Prep,
    OperationsType::PrepMan,
    OperationsType::Dedupe,
    OperationsType::Prescreen,
    OperationsType::PdfGet,
    OperationsType::PdfGetMan,
    OperationsType::PdfPrep,
    OperationsType::PdfPrepMan,
    OperationsType::Screen,
    OperationsType::Data,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub msg: String,
    pub cmd: Option<String>,
    /// Finishes something already started.
    pub priority: bool,
}

impl Instruction {
    fn new(msg: impl Into<String>, cmd: Option<String>) -> Self {
        Self {
            msg: msg.into(),
            cmd,
            priority: false,
        }
    }

    fn priority(mut self) -> Self {
        self.priority = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advice {
    pub review: Vec<Instruction>,
    pub environment: Vec<Instruction>,
    pub collaboration: Vec<Instruction>,
}

/// Entries of the search files that are not yet in the records.
fn pending_search_records(review_manager: &ReviewManager, records: &Records) -> usize {
    let imported: BTreeSet<&String> = records.values().flat_map(|r| r.origin.iter()).collect();
    let mut prefixes: BTreeMap<String, std::path::PathBuf> = review_manager
        .settings()
        .sources
        .iter()
        .filter(|s| !s.is_md_source())
        .map(|s| (s.origin_prefix(), review_manager.paths().root().join(&s.filename)))
        .collect();
    if let Ok(entries) = std::fs::read_dir(review_manager.paths().search_dir()) {
        for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
            if path.extension().is_some_and(|e| e == "bib") {
                if let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) {
                    prefixes.entry(name).or_insert(path);
                }
            }
        }
    }

    let mut pending = 0;
    for (prefix, path) in prefixes {
        if !path.is_file() {
            continue;
        }
        match parser::parse_search_file(&path) {
            Ok(entries) => {
                pending += entries
                    .iter()
                    .filter(|e| !imported.contains(&format!("{prefix}/{}", e.key)))
                    .count();
            }
            Err(e) => debug!("{}: {e}", path.display()),
        }
    }
    pending
}

/// State transitions of the last commit that touched the records.
fn last_transitions(review_manager: &ReviewManager, current: &Records) -> Result<TransitionReport> {
    let git = review_manager.git();
    if !git.has_commits() {
        return Ok(TransitionReport::default());
    }
    let previous = match git.show_file("HEAD~1", ProjectPaths::RECORDS_FILE) {
        Ok(Some(content)) => bibtex::parse_records(&content)?,
        _ => Records::new(),
    };
    Ok(TransitionReport::between(&states_of(&previous), current))
}

/// An operation is in progress when the last commit moved records along one
/// of its transitions and records are still waiting in its source states.
fn in_progress(
    operation: OperationsType,
    last: &TransitionReport,
    present: &BTreeSet<RecordState>,
) -> bool {
    let moved = last
        .counts()
        .keys()
        .any(|(from, to)| ProcessModel::operation_for_transition(*from, *to) == Some(operation));
    moved
        && ProcessModel::source_states(operation)
            .iter()
            .any(|s| present.contains(s))
}

fn review_instructions(review_manager: &ReviewManager, committed: &Records) -> Result<Vec<Instruction>> {
    let records = if review_manager.dataset().records_file_exists() {
        review_manager.dataset().load_records()?
    } else {
        Records::new()
    };
    let mut instructions = Vec::new();

    let pending = pending_search_records(review_manager, &records);
    if records.is_empty() && pending == 0 {
        instructions.push(Instruction::new(
            "add a search source or place search results in data/search/",
            Some("colrev search --add colrev.local_index \"<query>\"".to_string()),
        ));
        return Ok(instructions);
    }
    if pending > 0 {
        instructions.push(Instruction::new(
            format!("{pending} records in the search files are not loaded yet"),
            Some("colrev load".to_string()),
        ));
    }

    let stats = StatusStats::compute(&records);
    let present: BTreeSet<RecordState> = records.values().map(|r| r.status).collect();
    let last = last_transitions(review_manager, committed)?;
    let delay = review_manager.settings().project.delay_automated_processing;

    for operation in REVIEW_OPERATIONS.iter().skip(1).copied() {
        let sources = ProcessModel::source_states(operation);
        let waiting: usize = sources.iter().map(|s| stats.current(*s)).sum();
        if waiting == 0 {
            continue;
        }
        if ProcessModel::check_operation_precondition(operation, &present, delay).is_err() {
            debug!("{operation}: blocked by earlier states");
            continue;
        }
        let cmd = Some(format!("colrev {}", operation.command()));
        let mut messages = Vec::new();
        if operation == OperationsType::Data {
            let package_manager = review_manager.package_manager();
            for endpoint_settings in &review_manager.settings().data.data_package_endpoints {
                if let Some(advice) = package_manager.load_data(endpoint_settings)?.advice(&records) {
                    messages.push(advice);
                }
            }
        }
        if messages.is_empty() {
            let states: Vec<&str> = sources
                .iter()
                .filter(|s| stats.current(**s) > 0)
                .map(|s| s.as_str())
                .collect();
            messages.push(format!("{waiting} records in {}", states.join(", ")));
        }
        let priority = in_progress(operation, &last, &present);
        for msg in messages {
            let instruction = Instruction::new(msg, cmd.clone());
            instructions.push(if priority { instruction.priority() } else { instruction });
        }
    }

    if stats.nr_records > 0 && stats.completeness_condition {
        instructions.push(Instruction::new("the review is complete", None));
    }
    Ok(instructions)
}

async fn environment_instructions(review_manager: &ReviewManager) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let corrections = corrections::pending(review_manager.paths());
    if !corrections.is_empty() {
        instructions.push(Instruction::new(
            format!("{} corrections of curated records are pending", corrections.len()),
            Some("colrev push --corrections".to_string()),
        ));
    }

    let environment = review_manager.environment();
    if environment.local_index().count()? == 0 {
        instructions.push(Instruction::new(
            "the local index is empty",
            Some("colrev env --index".to_string()),
        ));
    }

    for repo in env::status(environment).await? {
        let Some(remote) = repo.remote.filter(|r| r.behind > 0) else {
            continue;
        };
        let curated = Settings::load(&ProjectPaths::new(&repo.path).settings_file())
            .map(|s| s.project.curated_masterdata)
            .unwrap_or(false);
        if curated {
            instructions.push(Instruction::new(
                format!("curated repository {} is {} commits behind its remote", repo.name, remote.behind),
                Some(format!("git -C {} pull", repo.path.display())),
            ));
        }
    }
    Ok(instructions)
}

fn collaboration_instructions(review_manager: &ReviewManager, committed: &Records) -> Result<Vec<Instruction>> {
    let git = review_manager.git();
    let mut instructions = Vec::new();

    let unmerged = git.unmerged_paths()?;
    if !unmerged.is_empty() {
        instructions.push(
            Instruction::new(format!("resolve the merge conflicts in {}", unmerged.join(", ")), None).priority(),
        );
    }

    let Some(remote) = git.remote_status()? else {
        instructions.push(Instruction::new(
            "the project has no remote to share it with",
            Some("git remote add origin <url>".to_string()),
        ));
        return Ok(instructions);
    };
    if remote.behind > 0 {
        instructions.push(
            Instruction::new(
                format!("the remote has {} new commits", remote.behind),
                Some("colrev pull".to_string()),
            )
            .priority(),
        );
    }
    if remote.ahead > 0 {
        let requirement = review_manager.settings().project.share_stat_req;
        if StatusStats::compute(committed).meets(requirement) {
            instructions.push(Instruction::new(
                format!("{} local commits are ready to share", remote.ahead),
                Some("colrev push".to_string()),
            ));
        } else {
            instructions.push(Instruction::new(
                format!("the project does not meet share_stat_req {requirement:?}; complete it before pushing"),
                None,
            ));
        }
    }
    if remote.ahead == 0 && remote.behind == 0 {
        instructions.push(Instruction::new("up to date with the remote", None));
    }
    Ok(instructions)
}

pub async fn advise(review_manager: &ReviewManager) -> Result<Advice> {
    let committed = review_manager.dataset().committed_records()?;
    Ok(Advice {
        review: review_instructions(review_manager, &committed)?,
        environment: environment_instructions(review_manager).await?,
        collaboration: collaboration_instructions(review_manager, &committed)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::load::Load;
    use crate::ops::tests::{processed_project, project};

    #[tokio::test]
    async fn new_projects_are_told_to_load() {
        let (_dir, manager) = project("literature_review");
        let advice = advise(&manager).await.unwrap();
        assert_eq!(advice.review.len(), 1);
        assert_eq!(advice.review[0].msg, "3 records in the search files are not loaded yet");
        assert_eq!(advice.review[0].cmd.as_deref(), Some("colrev load"));
        assert!(advice
            .environment
            .iter()
            .any(|i| i.cmd.as_deref() == Some("colrev env --index")));
        assert_eq!(advice.collaboration.len(), 1);
    }

    #[tokio::test]
    async fn interrupted_prep_has_priority() {
        let (_dir, manager) = project("literature_review");
        Load::new(&manager).unwrap().run(false).await.unwrap();
        let mut records = manager.dataset().load_records().unwrap();
        let first = records.keys().next().cloned().unwrap();
        records.get_mut(&first).unwrap().status = RecordState::MdPrepared;
        manager.dataset().save_records(&records).unwrap();
        manager.git().add_all().unwrap();
        manager.git().commit("Prep: partial").unwrap();

        let advice = advise(&manager).await.unwrap();
        let prep = advice
            .review
            .iter()
            .find(|i| i.cmd.as_deref() == Some("colrev prep"))
            .unwrap();
        assert!(prep.priority);
        assert_eq!(prep.msg, "2 records in md_imported");
        // delayed processing: dedupe waits until every record is prepared
        assert!(!advice
            .review
            .iter()
            .any(|i| i.cmd.as_deref() == Some("colrev dedupe")));
    }

    #[tokio::test]
    async fn processed_projects_move_on_to_prescreen() {
        let (_dir, manager) = processed_project().await;
        let advice = advise(&manager).await.unwrap();
        assert_eq!(
            advice.review,
            vec![Instruction::new(
                "2 records in md_processed",
                Some("colrev prescreen".to_string())
            )]
        );
    }
}
