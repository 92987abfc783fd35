//! # BK 1697B Power Supply Library
//!
//! Driver for the BK Precision 1697B bench DC power supply over its serial SCPI-style
//! interface, plus the small amount of tooling built around it: configuration
//! loading, tracing setup, background monitoring with CSV logging and threshold alerts.
//! The `bk_psu` binary is a thin command-line front end over this library.
//!
//! ## Crate Structure
//!
//! - **`instrument`**: The driver. Response correction and value extraction, the
//!   `Transport` seam (serial and mock), the `CommandEngine` that runs the timed
//!   request/response protocol, and the `Bk1697b` instrument facade.
//! - **`config`**: `PsuConfig`, loaded from TOML and `BK_PSU_` environment variables with
//!   `figment`. Holds the serial `LinkConfig`, the protocol settle delays and monitor settings.
//! - **`error`**: `PsuError` and `ExtractionError`, the crate's error types.
//! - **`logging`**: `tracing-subscriber` initialization for binaries.
//! - **`monitor`**: `SharedSupply` (mutex-serialized device access) and `Monitor`
//!   (background polling, alerting).
//! - **`data`**: The CSV measurement log written by the monitor.

pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod monitor;
