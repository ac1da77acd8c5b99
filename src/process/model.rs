use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Processing state of a record.
///
/// Declaration order follows the lifecycle DAG, so `Ord` answers
/// "which of two states is less advanced".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    MdRetrieved,
    MdImported,
    MdNeedsManualPreparation,
    MdPrepared,
    MdProcessed,
    RevPrescreenExcluded,
    RevPrescreenIncluded,
    PdfNeedsManualRetrieval,
    PdfImported,
    PdfNotAvailable,
    PdfNeedsManualPreparation,
    PdfPrepared,
    RevExcluded,
    RevIncluded,
    RevSynthesized,
}

impl RecordState {
    pub const ALL: [RecordState; 15] = [
        RecordState::MdRetrieved,
        RecordState::MdImported,
        RecordState::MdNeedsManualPreparation,
        RecordState::MdPrepared,
        RecordState::MdProcessed,
        RecordState::RevPrescreenExcluded,
        RecordState::RevPrescreenIncluded,
        RecordState::PdfNeedsManualRetrieval,
        RecordState::PdfImported,
        RecordState::PdfNotAvailable,
        RecordState::PdfNeedsManualPreparation,
        RecordState::PdfPrepared,
        RecordState::RevExcluded,
        RecordState::RevIncluded,
        RecordState::RevSynthesized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::MdRetrieved => "md_retrieved",
            RecordState::MdImported => "md_imported",
            RecordState::MdNeedsManualPreparation => "md_needs_manual_preparation",
            RecordState::MdPrepared => "md_prepared",
            RecordState::MdProcessed => "md_processed",
            RecordState::RevPrescreenExcluded => "rev_prescreen_excluded",
            RecordState::RevPrescreenIncluded => "rev_prescreen_included",
            RecordState::PdfNeedsManualRetrieval => "pdf_needs_manual_retrieval",
            RecordState::PdfImported => "pdf_imported",
            RecordState::PdfNotAvailable => "pdf_not_available",
            RecordState::PdfNeedsManualPreparation => "pdf_needs_manual_preparation",
            RecordState::PdfPrepared => "pdf_prepared",
            RecordState::RevExcluded => "rev_excluded",
            RecordState::RevIncluded => "rev_included",
            RecordState::RevSynthesized => "rev_synthesized",
        }
    }

    /// States a record can no longer leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordState::RevPrescreenExcluded
                | RecordState::PdfNotAvailable
                | RecordState::RevExcluded
                | RecordState::RevSynthesized
        )
    }

    /// At or beyond `md_processed`: the ID may have been cited downstream.
    pub fn is_post_md_processed(&self) -> bool {
        *self >= RecordState::MdProcessed
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown record state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for RecordState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordState::ALL
            .iter()
            .find(|state| state.as_str() == s.trim())
            .copied()
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

/// Named operations. The first eleven move records along the DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationsType {
    Search,
    Load,
    Prep,
    PrepMan,
    Dedupe,
    Prescreen,
    PdfGet,
    PdfGetMan,
    PdfPrep,
    PdfPrepMan,
    Screen,
    Data,
    Format,
    Check,
    Explore,
}

impl OperationsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationsType::Search => "search",
            OperationsType::Load => "load",
            OperationsType::Prep => "prep",
            OperationsType::PrepMan => "prep_man",
            OperationsType::Dedupe => "dedupe",
            OperationsType::Prescreen => "prescreen",
            OperationsType::PdfGet => "pdf_get",
            OperationsType::PdfGetMan => "pdf_get_man",
            OperationsType::PdfPrep => "pdf_prep",
            OperationsType::PdfPrepMan => "pdf_prep_man",
            OperationsType::Screen => "screen",
            OperationsType::Data => "data",
            OperationsType::Format => "format",
            OperationsType::Check => "check",
            OperationsType::Explore => "explore",
        }
    }

    /// The CLI spelling (`prep-man`, `pdf-get`, ...).
    pub fn command(&self) -> String {
        self.as_str().replace('_', "-")
    }

    /// Whether the operation changes `colrev_status` at all.
    pub fn transitions_records(&self) -> bool {
        !matches!(
            self,
            OperationsType::Search
                | OperationsType::Format
                | OperationsType::Check
                | OperationsType::Explore
        )
    }
}

impl fmt::Display for OperationsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub trigger: OperationsType,
    pub source: RecordState,
    pub dest: RecordState,
}

const fn t(trigger: OperationsType, source: RecordState, dest: RecordState) -> Transition {
    Transition {
        trigger,
        source,
        dest,
    }
}

pub const TRANSITIONS: &[Transition] = &[
    t(OperationsType::Load, RecordState::MdRetrieved, RecordState::MdImported),
    t(OperationsType::Prep, RecordState::MdImported, RecordState::MdNeedsManualPreparation),
    t(OperationsType::Prep, RecordState::MdImported, RecordState::MdPrepared),
    t(OperationsType::PrepMan, RecordState::MdNeedsManualPreparation, RecordState::MdPrepared),
    t(OperationsType::Dedupe, RecordState::MdPrepared, RecordState::MdProcessed),
    t(OperationsType::Prescreen, RecordState::MdProcessed, RecordState::RevPrescreenExcluded),
    t(OperationsType::Prescreen, RecordState::MdProcessed, RecordState::RevPrescreenIncluded),
    t(OperationsType::PdfGet, RecordState::RevPrescreenIncluded, RecordState::PdfImported),
    t(OperationsType::PdfGet, RecordState::RevPrescreenIncluded, RecordState::PdfNeedsManualRetrieval),
    t(OperationsType::PdfGetMan, RecordState::PdfNeedsManualRetrieval, RecordState::PdfNotAvailable),
    t(OperationsType::PdfGetMan, RecordState::PdfNeedsManualRetrieval, RecordState::PdfImported),
    t(OperationsType::PdfPrep, RecordState::PdfImported, RecordState::PdfNeedsManualPreparation),
    t(OperationsType::PdfPrep, RecordState::PdfImported, RecordState::PdfPrepared),
    t(OperationsType::PdfPrepMan, RecordState::PdfNeedsManualPreparation, RecordState::PdfPrepared),
    t(OperationsType::Screen, RecordState::PdfPrepared, RecordState::RevExcluded),
    t(OperationsType::Screen, RecordState::PdfPrepared, RecordState::RevIncluded),
    t(OperationsType::Data, RecordState::RevIncluded, RecordState::RevSynthesized),
];

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("no records to process for {operation}")]
    NoRecords { operation: OperationsType },
    #[error(
        "{operation} requires every record to have reached {state}; still in {}: run colrev {} first",
        join_states(.violating),
        remedial_command(.violating)
    )]
    ProcessOrderViolation {
        operation: OperationsType,
        state: RecordState,
        violating: Vec<RecordState>,
    },
    #[error("unstaged git changes in {}: commit or stash them, or use --force", .files.join(", "))]
    UnstagedGitChanges { files: Vec<String> },
}

fn join_states(states: &[RecordState]) -> String {
    states
        .iter()
        .map(RecordState::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn remedial_command(states: &[RecordState]) -> String {
    states
        .iter()
        .min()
        .and_then(|earliest| ProcessModel::operation_for_source(*earliest))
        .map(|op| op.command())
        .unwrap_or_else(|| "status".to_string())
}

/// Lookups over the transitions table.
pub struct ProcessModel;

impl ProcessModel {
    pub fn transitions(operation: OperationsType) -> impl Iterator<Item = &'static Transition> {
        TRANSITIONS.iter().filter(move |tr| tr.trigger == operation)
    }

    /// States whose records the operation may touch, in table order.
    pub fn source_states(operation: OperationsType) -> Vec<RecordState> {
        let mut states = Vec::new();
        for tr in Self::transitions(operation) {
            if !states.contains(&tr.source) {
                states.push(tr.source);
            }
        }
        states
    }

    pub fn dest_states(operation: OperationsType) -> Vec<RecordState> {
        Self::transitions(operation).map(|tr| tr.dest).collect()
    }

    pub fn is_transition(operation: OperationsType, from: RecordState, to: RecordState) -> bool {
        Self::transitions(operation).any(|tr| tr.source == from && tr.dest == to)
    }

    /// The operation that moves records out of `state`.
    pub fn operation_for_source(state: RecordState) -> Option<OperationsType> {
        TRANSITIONS
            .iter()
            .find(|tr| tr.source == state)
            .map(|tr| tr.trigger)
    }

    /// The operation that produced `(from, to)`, if it is a single step.
    pub fn operation_for_transition(from: RecordState, to: RecordState) -> Option<OperationsType> {
        TRANSITIONS
            .iter()
            .find(|tr| tr.source == from && tr.dest == to)
            .map(|tr| tr.trigger)
    }

    /// All states from which `state` can be reached.
    pub fn preceding_states(state: RecordState) -> BTreeSet<RecordState> {
        let mut preceding = BTreeSet::new();
        let mut frontier = vec![state];
        while let Some(current) = frontier.pop() {
            for tr in TRANSITIONS.iter().filter(|tr| tr.dest == current) {
                if tr.source != state && preceding.insert(tr.source) {
                    frontier.push(tr.source);
                }
            }
        }
        preceding
    }

    /// Forward reachability along the DAG (zero steps included).
    pub fn is_reachable(from: RecordState, to: RecordState) -> bool {
        from == to || Self::preceding_states(to).contains(&from)
    }

    /// Checks the stage ordering for `operation` against the states present
    /// in the records file.
    pub fn check_operation_precondition(
        operation: OperationsType,
        present_states: &BTreeSet<RecordState>,
        delay_automated_processing: bool,
    ) -> Result<(), ProcessError> {
        let sources = Self::source_states(operation);
        let Some(start) = sources.first().copied() else {
            return Ok(());
        };

        if delay_automated_processing {
            let violating: Vec<RecordState> = Self::preceding_states(start)
                .intersection(present_states)
                .copied()
                .collect();
            if !violating.is_empty() {
                return Err(ProcessError::ProcessOrderViolation {
                    operation,
                    state: start,
                    violating,
                });
            }
        }

        if operation != OperationsType::Load && !sources.iter().any(|s| present_states.contains(s)) {
            return Err(ProcessError::NoRecords { operation });
        }
        Ok(())
    }
}
