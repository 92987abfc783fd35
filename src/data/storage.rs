//! CSV measurement log.
//!
//! One row per monitor sample: `timestamp,voltage,current`. A failed reading leaves
//! its cell empty. Rows are flushed as they are written so the file is usable while a
//! monitor is still running.
use crate::error::{PsuError, PsuResult};
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Timestamp format of the `timestamp` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One voltage/current reading pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// When the pair was read
    pub timestamp: DateTime<Local>,
    /// Measured voltage (V), `None` if the reading failed
    pub voltage: Option<f64>,
    /// Measured current (A), `None` if the reading failed
    pub current: Option<f64>,
}

/// A writer for CSV measurement logs.
pub struct CsvLog {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvLog {
    /// Create `bk1697b_log_<YYYY-mm-dd-HH-MM-SS>.csv` inside `dir`, creating `dir` if needed.
    pub fn create(dir: &Path) -> PsuResult<Self> {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| PsuError::Storage(e.to_string()))?;
        }
        let file_name = format!(
            "bk1697b_log_{}.csv",
            Local::now().format("%Y-%m-%d-%H-%M-%S")
        );
        Self::open(dir.join(file_name))
    }

    /// Open `path` for appending. The header is written only when the file is new or empty.
    pub fn open(path: impl Into<PathBuf>) -> PsuResult<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| PsuError::Storage(format!("Failed to create CSV file: {}", e)))?;
        let is_empty = file
            .metadata()
            .map_err(|e| PsuError::Storage(e.to_string()))?
            .len()
            == 0;

        let mut writer = csv::Writer::from_writer(file);
        if is_empty {
            writer.write_record(["timestamp", "voltage", "current"])?;
            writer
                .flush()
                .map_err(|e| PsuError::Storage(e.to_string()))?;
        }
        tracing::info!("CSV log at '{}'", path.display());

        Ok(Self { path, writer })
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row and flush it to disk.
    pub fn append(&mut self, sample: &Sample) -> PsuResult<()> {
        let cell = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        self.writer.write_record([
            sample.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            cell(sample.voltage),
            cell(sample.current),
        ])?;
        self.writer
            .flush()
            .map_err(|e| PsuError::Storage(e.to_string()))
    }
}
