//! Crate-level error and its classification.

use thiserror::Error;

use crate::cache::CacheError;
use crate::dataset::git::GitError;
use crate::dataset::DatasetError;
use crate::endpoints::EndpointError;
use crate::environment::registry::RegistryError;
use crate::environment::services::ServiceError;
use crate::local_index::LocalIndexError;
use crate::parser::ParseError;
use crate::process::ProcessError;
use crate::record::RecordError;
use crate::settings::SettingsError;

/// How a failure is handled by the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fail before any mutation; the message names the remedial command.
    Precondition,
    /// Records file inconsistent; blocks the commit.
    DataIntegrity,
    /// Per-record identity problem.
    Identity,
    /// Network or container service failure.
    ExternalService,
    Fatal,
}

#[derive(Error, Debug)]
pub enum ColrevError {
    #[error("repository setup error: {0}")]
    RepoSetup(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0} check(s) failed")]
    CheckFailed(usize),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    LocalIndex(#[from] LocalIndexError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ColrevError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ColrevError::Process(_) => ErrorKind::Precondition,
            ColrevError::Git(GitError::IndexLocked(..)) => ErrorKind::Precondition,
            ColrevError::CheckFailed(_) => ErrorKind::DataIntegrity,
            ColrevError::Dataset(e) => match e {
                DatasetError::Parse { .. }
                | DatasetError::StatusFieldValue { .. }
                | DatasetError::DuplicateIds(_) => ErrorKind::DataIntegrity,
                DatasetError::Record(e) => record_kind(e),
                _ => ErrorKind::Fatal,
            },
            ColrevError::Record(e) => record_kind(e),
            ColrevError::Endpoint(_) | ColrevError::Service(_) => ErrorKind::ExternalService,
            _ => ErrorKind::Fatal,
        }
    }

    /// 1 when the user has to act on the project, 2 for unrecoverable errors.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Precondition | ErrorKind::DataIntegrity => 1,
            _ => 2,
        }
    }
}

fn record_kind(error: &RecordError) -> ErrorKind {
    match error {
        RecordError::FieldValue { .. } => ErrorKind::DataIntegrity,
        _ => ErrorKind::Identity,
    }
}

pub type Result<T, E = ColrevError> = std::result::Result<T, E>;
