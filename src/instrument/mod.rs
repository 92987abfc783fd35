//! Device driver layer for the BK Precision 1697B.
//!
//! Layers, bottom up:
//! - [`correction`]: repairs the firmware's malformed numeric replies
//! - [`extract`]: turns raw reply bytes into a number
//! - [`transport`]: byte-level link ([`SerialTransport`], [`MockTransport`])
//! - [`engine`]: owns the link and runs write / query / numeric query with settle delays
//! - [`bk1697b`]: instrument operations (set voltage, measure current, output on/off, limits)

pub mod bk1697b;
pub mod correction;
pub mod engine;
pub mod extract;
pub mod mock;
pub mod transport;

pub use bk1697b::{Bk1697b, OutputState, SupplyStatus};
pub use engine::CommandEngine;
pub use extract::{extract_or_sentinel, extract_value, SENTINEL_FAILURE};
pub use mock::MockTransport;
pub use transport::{SerialTransport, Transport};
