//! Git-backed lifecycle of bibliographic records in collaborative literature reviews.
//!
//! Records live in `data/records.bib` and move through the states of
//! [`process::RecordState`]; every operation in [`ops`] ends in one commit.

pub mod cache;
pub mod dataset;
pub mod endpoints;
pub mod environment;
pub mod error;
pub mod local_index;
pub mod matcher;
pub mod ops;
pub mod parser;
pub mod process;
pub mod record;
pub mod report;
pub mod report_log;
pub mod review_manager;
pub mod settings;

pub use environment::Environment;
pub use error::{ColrevError, ErrorKind, Result};
pub use process::{OperationsType, RecordState};
pub use record::{Record, Records};
pub use review_manager::ReviewManager;
