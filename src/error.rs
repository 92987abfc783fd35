//! Custom error types for the driver.
//!
//! This module defines `PsuError`, the single error type returned by the driver layer,
//! and `ExtractionError`, the reason a numeric reply could not be turned into a value.
//! Both are built with `thiserror`.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment` while loading the TOML file or environment.
//! - **`Configuration`**: Semantic problems in a configuration that parsed correctly
//!   (zero baud rate, unknown log level, negative thresholds).
//! - **`Connection`**: The serial port could not be opened. Fatal to that attempt; the
//!   driver never retries on its own.
//! - **`NotOpen`**: An operation was attempted on a closed or never-opened link. This is a
//!   caller bug rather than a device problem.
//! - **`Io`**: A write or flush on an open port failed.
//! - **`Extraction`**: A numeric query produced no usable value (timeout, undecodable bytes,
//!   or no numeric literal in the reply).
//! - **`UnexpectedResponse`**: The device answered with something the protocol does not allow,
//!   e.g. a non-integer output state.
//! - **`Storage`**: Writing the CSV measurement log failed.
//!
//! A timed-out read is deliberately *not* an error at the transport level: it is an empty reply.
//! Only when a numeric value was required does it surface, as `ExtractionError::NoData`.

use std::num::ParseFloatError;
use std::str::Utf8Error;
use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type PsuResult<T> = std::result::Result<T, PsuError>;

#[derive(Error, Debug)]
pub enum PsuError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Failed to open serial port {port}: {source}")]
    Connection {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Serial port is not open")]
    NotOpen,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to extract value: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Unexpected response from device: {0:?}")]
    UnexpectedResponse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Device lock poisoned by a panicked thread")]
    LockPoisoned,
}

/// Why a reply could not be converted to a number.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("no data received")]
    NoData,

    #[error("reply {raw:?} is not valid text: {source}")]
    Decode {
        raw: Vec<u8>,
        #[source]
        source: Utf8Error,
    },

    #[error("no numeric value in {0:?}")]
    NoNumber(String),

    #[error("could not parse {text:?}: {source}")]
    Parse {
        text: String,
        #[source]
        source: ParseFloatError,
    },
}

impl PsuError {
    /// Whether the caller can reasonably retry the same operation on the same link.
    ///
    /// Garbled or missing replies are transient; a link that cannot be opened, a closed
    /// link and an invalid configuration are not going to fix themselves.
    pub fn is_recoverable(&self) -> bool {
        match self {
            PsuError::Extraction(_) | PsuError::UnexpectedResponse(_) => true,
            PsuError::Storage(_) => true,
            PsuError::Config(_)
            | PsuError::Configuration(_)
            | PsuError::Connection { .. }
            | PsuError::NotOpen
            | PsuError::Io(_)
            | PsuError::LockPoisoned => false,
        }
    }
}

impl From<figment::Error> for PsuError {
    fn from(value: figment::Error) -> Self {
        PsuError::Config(Box::new(value))
    }
}

impl From<csv::Error> for PsuError {
    fn from(value: csv::Error) -> Self {
        PsuError::Storage(value.to_string())
    }
}
