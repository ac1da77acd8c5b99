//! Operations: one stage of the review each, ending in at most one commit.

pub mod advisor;
pub mod corrections;
pub mod data;
pub mod dedupe;
pub mod distribute;
pub mod env;
pub mod explore;
pub mod hooks;
pub mod init;
pub mod load;
pub mod pdf_get;
pub mod pdf_get_man;
pub mod pdf_prep;
pub mod pdf_prep_man;
pub mod prep;
pub mod prep_man;
pub mod prescreen;
pub mod remote;
pub mod screen;
pub mod search;
pub mod settings;
pub mod status;
pub mod trace;
pub mod validate;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::dataset::{checks, ProjectPaths};
use crate::error::{ColrevError, Result};
use crate::process::{OperationsType, ProcessError, ProcessModel, RecordState};
use crate::record::Records;
use crate::report_log::LogEntry;
use crate::review_manager::ReviewManager;
use crate::settings::COLREV_VERSION;
use status::StatusStats;

/// Set when the user interrupts; operations finish the current record and commit.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels on Ctrl-C. Needs a running tokio runtime.
    pub fn watch_ctrl_c(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted: finishing the current record before committing");
                flag.cancel();
            }
        });
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State changes made by an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionReport {
    pub changes: Vec<(String, RecordState, RecordState)>,
    pub added: Vec<(String, RecordState)>,
    pub removed: Vec<String>,
}

impl TransitionReport {
    /// Compares the states before the operation with the records after it.
    pub fn between(before: &BTreeMap<String, RecordState>, after: &Records) -> Self {
        let mut report = Self::default();
        for record in after.values() {
            match before.get(&record.id) {
                Some(from) if *from != record.status => {
                    report.changes.push((record.id.clone(), *from, record.status));
                }
                Some(_) => {}
                None => report.added.push((record.id.clone(), record.status)),
            }
        }
        report.removed = before.keys().filter(|id| !after.contains_key(*id)).cloned().collect();
        report
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }

    /// `(from, to) -> count`; added records count as coming from `md_retrieved`.
    pub fn counts(&self) -> BTreeMap<(RecordState, RecordState), usize> {
        let mut counts = BTreeMap::new();
        for (_, from, to) in &self.changes {
            *counts.entry((*from, *to)).or_default() += 1;
        }
        for (_, to) in &self.added {
            *counts.entry((RecordState::MdRetrieved, *to)).or_default() += 1;
        }
        counts
    }

    pub fn count_to(&self, state: RecordState) -> usize {
        self.changes.iter().filter(|(_, _, to)| *to == state).count()
            + self.added.iter().filter(|(_, to)| *to == state).count()
    }
}

/// What an operation did.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub transitions: TransitionReport,
    pub commit: Option<String>,
    pub messages: Vec<String>,
}

impl Outcome {
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }
}

pub fn states_of(records: &Records) -> BTreeMap<String, RecordState> {
    records.values().map(|r| (r.id.clone(), r.status)).collect()
}

fn commit_title(operation: OperationsType) -> &'static str {
    match operation {
        OperationsType::Search => "Search",
        OperationsType::Load => "Load",
        OperationsType::Prep => "Prep",
        OperationsType::PrepMan => "Prep-man",
        OperationsType::Dedupe => "Dedupe",
        OperationsType::Prescreen => "Prescreen",
        OperationsType::PdfGet => "PDF-get",
        OperationsType::PdfGetMan => "PDF-get-man",
        OperationsType::PdfPrep => "PDF-prep",
        OperationsType::PdfPrepMan => "PDF-prep-man",
        OperationsType::Screen => "Screen",
        OperationsType::Data => "Data",
        OperationsType::Format => "Format",
        OperationsType::Check => "Check",
        OperationsType::Explore => "Explore",
    }
}

/// Paths an operation may leave changed in the working tree.
fn is_exempt(operation: OperationsType, path: &str) -> bool {
    if path == ProjectPaths::STATUS_FILE || path == ProjectPaths::REPORT_LOG {
        return true;
    }
    let under = |dir: &str| path.starts_with(&format!("{dir}/")) || path == dir;
    match operation {
        OperationsType::Search | OperationsType::Load => {
            under(ProjectPaths::SEARCH_DIR) || path == ProjectPaths::SETTINGS_FILE
        }
        OperationsType::PdfGet | OperationsType::PdfGetMan => under(ProjectPaths::PDF_DIR),
        OperationsType::PrepMan => path == ProjectPaths::RECORDS_FILE,
        _ => false,
    }
}

/// A running operation on a project.
pub struct Operation<'a> {
    review_manager: &'a ReviewManager,
    operation_type: OperationsType,
    endpoints: Vec<String>,
    cancellation: Cancellation,
}

impl<'a> Operation<'a> {
    /// Waits for other git processes and checks the preconditions unless in force mode.
    pub fn new(review_manager: &'a ReviewManager, operation_type: OperationsType) -> Result<Self> {
        review_manager.git().wait_for_index_lock()?;
        let operation = Self {
            review_manager,
            operation_type,
            endpoints: Vec::new(),
            cancellation: Cancellation::new(),
        };
        if review_manager.force_mode() {
            debug!("{}: skipping precondition checks (--force)", operation_type);
            return Ok(operation);
        }
        operation.check_clean_tree()?;
        if operation_type.transitions_records() {
            let present = review_manager.dataset().current_states()?;
            ProcessModel::check_operation_precondition(
                operation_type,
                &present,
                review_manager.settings().project.delay_automated_processing,
            )?;
        }
        Ok(operation)
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    fn check_clean_tree(&self) -> Result<()> {
        if matches!(self.operation_type, OperationsType::Screen | OperationsType::Data) {
            return Ok(());
        }
        let files: Vec<String> = self
            .review_manager
            .git()
            .changed_paths()?
            .into_iter()
            .map(|c| c.path)
            .filter(|p| !is_exempt(self.operation_type, p))
            .collect();
        if !files.is_empty() {
            return Err(ProcessError::UnstagedGitChanges { files }.into());
        }
        Ok(())
    }

    pub fn review_manager(&self) -> &'a ReviewManager {
        self.review_manager
    }

    pub fn operation_type(&self) -> OperationsType {
        self.operation_type
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Names an endpoint in the commit report.
    pub fn add_endpoint(&mut self, name: &str) {
        if !self.endpoints.iter().any(|e| e == name) {
            self.endpoints.push(name.to_string());
        }
    }

    /// Appends a line to `.report.log`.
    pub fn log_failure(&self, endpoint: &str, record: &str, reason: impl Into<String>) {
        let entry = LogEntry::warn(self.operation_type.as_str(), endpoint, record, reason);
        warn!("{record}: {} ({endpoint})", entry.reason);
        self.review_manager.report_log().record(&entry);
    }

    fn commit_message(&self, summary: &str, report: &TransitionReport) -> String {
        let mut message = format!("{}: {summary}\n\nReport\n", commit_title(self.operation_type));
        let counts = report.counts();
        if counts.is_empty() && report.removed.is_empty() {
            message.push_str(" no state transitions\n");
        }
        for ((from, to), n) in counts {
            message.push_str(&format!(" {from} -> {to}: {n}\n"));
        }
        if !report.removed.is_empty() {
            message.push_str(&format!(" removed (merged): {}\n", report.removed.len()));
        }
        message.push_str(&format!("\nSoftware\n colrev {COLREV_VERSION}\n"));
        if !self.endpoints.is_empty() {
            message.push_str(&format!(" endpoints: {}\n", self.endpoints.join(", ")));
        }
        message.push_str(&format!("\nCommand\n {}\n", self.review_manager.command_line()));
        message
    }

    /// Saves the records, updates `status.yaml`, runs the integrity checks
    /// and commits the changes with a report of the state transitions.
    pub fn save_and_commit(
        &self,
        summary: &str,
        before: &BTreeMap<String, RecordState>,
        records: &Records,
        extra_paths: &[PathBuf],
    ) -> Result<Outcome> {
        let dataset = self.review_manager.dataset();
        dataset.save_records(records)?;
        self.commit(summary, before, records, extra_paths)
    }

    /// Commits the saved records file and `extra_paths`.
    pub fn commit(
        &self,
        summary: &str,
        before: &BTreeMap<String, RecordState>,
        records: &Records,
        extra_paths: &[PathBuf],
    ) -> Result<Outcome> {
        let rm = self.review_manager;
        let paths = rm.paths();
        let transitions = TransitionReport::between(before, records);

        corrections::detect(rm.dataset(), records)?;
        StatusStats::compute(records).save(&paths.status_file())?;

        if !rm.force_mode() {
            let failures = checks::run_all(rm.dataset(), &rm.settings().screening_criteria())?;
            if !failures.is_empty() {
                for failure in &failures {
                    error!("{failure}");
                }
                return Err(ColrevError::CheckFailed(failures.len()));
            }
        }

        let mut to_add: Vec<PathBuf> = vec![PathBuf::from(ProjectPaths::STATUS_FILE)];
        if paths.records_file().is_file() {
            to_add.push(PathBuf::from(ProjectPaths::RECORDS_FILE));
        }
        if paths.report_log().is_file() {
            to_add.push(PathBuf::from(ProjectPaths::REPORT_LOG));
        }
        to_add.extend(extra_paths.iter().map(|p| {
            if p.is_absolute() {
                PathBuf::from(paths.relative(p))
            } else {
                p.clone()
            }
        }));
        let refs: Vec<&Path> = to_add.iter().map(PathBuf::as_path).collect();
        rm.git().add(&refs)?;

        let commit = rm.git().commit(&self.commit_message(summary, &transitions))?;
        match &commit {
            Some(sha) => info!("{}: {summary} ({})", self.operation_type, &sha[..sha.len().min(8)]),
            None => info!("{}: no changes to commit", self.operation_type),
        }
        Ok(Outcome {
            transitions,
            commit,
            messages: Vec::new(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dataset::git::tests::init_test_repo;
    use crate::environment::Environment;
    use crate::record::Record;
    use crate::settings::review_types;
    use std::fs;
    use tempfile::TempDir;

    pub(crate) const SEARCH_BIB: &str = r#"@article{r1,
  author = {Staehr, Lorraine},
  title = {Understanding the role of managerial agency in achieving business benefits from ERP systems},
  journal = {Information Systems Journal},
  volume = {20},
  number = {3},
  pages = {213--238},
  year = {2010},
}

@article{r2,
  author = {Staehr, Lorraine},
  title = {Understanding the Role of Managerial Agency in Achieving Business Benefits from ERP Systems},
  journal = {Information Systems Journal},
  volume = {20},
  number = {3},
  pages = {213--238},
  year = {2010},
}

@inproceedings{r3,
  author = {Doe, John and Smith, Jane},
  title = {A study of literature reviews},
  booktitle = {Proceedings of the International Conference on Information Systems},
  year = {2021},
}
"#;

    /// A committed project with offline settings and one search file.
    pub(crate) fn project(review_type: &str) -> (TempDir, ReviewManager) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("project");
        fs::create_dir_all(root.join("data/search")).unwrap();
        let git = init_test_repo(&root);

        let mut settings = review_types::initialize(review_type, "Test review").unwrap();
        settings.sources.push(review_types::unknown_source("refs.bib"));
        for round in &mut settings.prep.prep_rounds {
            round
                .prep_package_endpoints
                .retain(|e| !matches!(e.endpoint.as_str(), "colrev.crossref" | "colrev.dblp"));
        }
        settings.save(&root.join(ProjectPaths::SETTINGS_FILE)).unwrap();
        fs::write(root.join("data/search/refs.bib"), SEARCH_BIB).unwrap();
        fs::write(root.join(ProjectPaths::GITIGNORE), init::GITIGNORE).unwrap();
        git.add_all().unwrap();
        git.commit("Init").unwrap();

        let env = Environment::open_at(&dir.path().join("home")).unwrap();
        let manager = ReviewManager::open(&root, env).unwrap();
        (dir, manager)
    }

    /// [`project`] after load, prep and dedupe: two records in `md_processed`.
    pub(crate) async fn processed_project() -> (TempDir, ReviewManager) {
        let (dir, manager) = project("literature_review");
        load::Load::new(&manager).unwrap().run(false).await.unwrap();
        prep::Prep::new(&manager).unwrap().run().await.unwrap();
        dedupe::Dedupe::new(&manager).unwrap().run().await.unwrap();
        (dir, manager)
    }

    fn record(id: &str, status: RecordState) -> Record {
        let mut record = Record::new(id, "article");
        record.status = status;
        record
    }

    #[test]
    fn transition_report_counts() {
        let before: BTreeMap<String, RecordState> = [
            ("A".to_string(), RecordState::MdImported),
            ("B".to_string(), RecordState::MdImported),
            ("C".to_string(), RecordState::MdImported),
        ]
        .into_iter()
        .collect();
        let after: Records = [
            record("A", RecordState::MdPrepared),
            record("B", RecordState::MdImported),
            record("D", RecordState::MdImported),
        ]
        .into_iter()
        .map(|r| (r.id.clone(), r))
        .collect();

        let report = TransitionReport::between(&before, &after);
        assert_eq!(report.changes, vec![("A".into(), RecordState::MdImported, RecordState::MdPrepared)]);
        assert_eq!(report.added, vec![("D".into(), RecordState::MdImported)]);
        assert_eq!(report.removed, vec!["C".to_string()]);
        assert_eq!(report.count_to(RecordState::MdImported), 1);
        assert_eq!(
            report.counts().get(&(RecordState::MdRetrieved, RecordState::MdImported)),
            Some(&1)
        );
    }

    #[test]
    fn exemptions_per_operation() {
        assert!(is_exempt(OperationsType::Load, "data/search/new.bib"));
        assert!(is_exempt(OperationsType::Load, "settings.json"));
        assert!(!is_exempt(OperationsType::Prep, "data/search/new.bib"));
        assert!(is_exempt(OperationsType::PdfGet, "data/pdfs/A.pdf"));
        assert!(is_exempt(OperationsType::PrepMan, "data/records.bib"));
        assert!(is_exempt(OperationsType::Dedupe, "status.yaml"));
        assert_eq!(commit_title(OperationsType::PdfGetMan), "PDF-get-man");
    }

    #[test]
    fn dirty_tree_blocks_operations() {
        let (_dir, manager) = project("literature_review");
        fs::write(manager.paths().join("notes.txt"), "draft").unwrap();
        let err = Operation::new(&manager, OperationsType::Load).err().unwrap();
        assert!(matches!(
            err,
            ColrevError::Process(ProcessError::UnstagedGitChanges { ref files }) if files == &vec!["notes.txt".to_string()]
        ));
        assert_eq!(err.exit_code(), 1);

        let forced = manager.with_force(true);
        assert!(Operation::new(&forced, OperationsType::Load).is_ok());
    }

    #[test]
    fn prep_without_records_is_a_precondition_error() {
        let (_dir, manager) = project("literature_review");
        assert!(matches!(
            Operation::new(&manager, OperationsType::Prep),
            Err(ColrevError::Process(ProcessError::NoRecords { .. }))
        ));
    }

    #[test]
    fn cancellation_flag() {
        let cancellation = Cancellation::new();
        let shared = cancellation.clone();
        assert!(!shared.is_cancelled());
        cancellation.cancel();
        assert!(shared.is_cancelled());
    }
}
