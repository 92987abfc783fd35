//! Measurement logging.
pub mod storage;

pub use storage::{CsvLog, Sample};
