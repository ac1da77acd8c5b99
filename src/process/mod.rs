pub mod model;

pub use model::{OperationsType, ProcessError, ProcessModel, RecordState, Transition};
