//! Command/query engine: owns the link and runs the request/response protocol.
//!
//! Protocol Overview:
//! - Format: ASCII SCPI-style commands, one per line
//! - Terminator: LF (`\n`) on both commands and replies
//! - No framing, checksum or acknowledgment
//!
//! Because nothing confirms that a command was processed, correctness rests on the
//! settle delays in [`ProtocolTiming`]. Every exchange is:
//!
//! ```text
//! clear input -> write command + LF -> flush -> sleep(delay) [-> read one line]
//! ```
//!
//! A read that times out yields an empty reply rather than an error.

use super::extract::extract_value;
use super::transport::{SerialTransport, Transport, LINE_TERMINATOR};
use crate::config::{LinkConfig, ProtocolTiming};
use crate::error::{PsuError, PsuResult};
use std::time::Duration;
use tracing::{info, trace, warn};

/// Exclusive owner of one open link.
///
/// Not safe to share between threads without external locking: interleaved
/// exchanges would pair commands with the wrong replies. See
/// [`SharedSupply`](crate::monitor::SharedSupply).
pub struct CommandEngine<T: Transport = SerialTransport> {
    transport: Option<T>,
    port_name: String,
    timing: ProtocolTiming,
}

impl CommandEngine<SerialTransport> {
    /// Open the serial link and wait for it to settle.
    ///
    /// # Errors
    /// `PsuError::Connection` if the port cannot be opened. No retry is attempted.
    pub fn open(link: &LinkConfig, timing: ProtocolTiming) -> PsuResult<Self> {
        link.validate()?;
        let transport = SerialTransport::open(link)?;
        Self::with_transport(transport, link.path.clone(), timing)
    }
}

impl<T: Transport> CommandEngine<T> {
    /// Take ownership of an already opened transport.
    ///
    /// Waits `timing.warmup`, then clears both buffers, exactly like a fresh serial open.
    pub fn with_transport(
        mut transport: T,
        port_name: impl Into<String>,
        timing: ProtocolTiming,
    ) -> PsuResult<Self> {
        let port_name = port_name.into();
        std::thread::sleep(timing.warmup);
        transport.clear_input()?;
        transport.clear_output()?;
        info!("Connected to {}", port_name);

        Ok(Self {
            transport: Some(transport),
            port_name,
            timing,
        })
    }

    /// Whether the link is open.
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Name of the port this engine was opened on.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Settle delays in use.
    pub fn timing(&self) -> ProtocolTiming {
        self.timing
    }

    /// Send a command that produces no reply, then wait `delay`.
    ///
    /// # Errors
    /// `PsuError::NotOpen` before `open` or after `close`; `PsuError::Io` if the port
    /// rejects the write.
    pub fn write(&mut self, command: &str, delay: Duration) -> PsuResult<()> {
        self.transmit(command)?;
        std::thread::sleep(delay);
        Ok(())
    }

    /// Send a query and return the raw reply line (empty on timeout).
    pub fn query_raw(&mut self, command: &str, delay: Duration) -> PsuResult<Vec<u8>> {
        let transport = self.transmit(command)?;
        std::thread::sleep(delay);
        let raw = transport.read_line()?;
        trace!(
            "Received reply from {}: '{}'",
            self.port_name,
            raw.escape_ascii()
        );
        Ok(raw)
    }

    /// Send a query and return the trimmed text reply.
    ///
    /// `None` means the device sent nothing (read timeout or a bare terminator) or sent
    /// bytes that are not valid UTF-8; the latter is logged.
    pub fn query(&mut self, command: &str, delay: Duration) -> PsuResult<Option<String>> {
        let raw = self.query_raw(command, delay)?;
        match std::str::from_utf8(&raw) {
            Ok(text) => {
                let text = text.trim();
                Ok((!text.is_empty()).then(|| text.to_string()))
            }
            Err(e) => {
                warn!(raw = ?raw, "Unreadable response from {}: {}", self.port_name, e);
                Ok(None)
            }
        }
    }

    /// Send a query and extract a numeric value from the raw reply.
    ///
    /// # Errors
    /// `PsuError::Extraction` when the reply is empty, undecodable or holds no number,
    /// in addition to the errors of [`write`](Self::write).
    pub fn numeric_query(&mut self, command: &str, delay: Duration) -> PsuResult<f64> {
        let raw = self.query_raw(command, delay)?;
        Ok(extract_value(&raw)?)
    }

    /// Close the link. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            info!("Closed serial port {}", self.port_name);
        }
    }

    /// Clear input, write the terminated command and flush.
    fn transmit(&mut self, command: &str) -> PsuResult<&mut T> {
        let transport = self.transport.as_mut().ok_or(PsuError::NotOpen)?;

        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        if line.last() != Some(&LINE_TERMINATOR) {
            line.push(LINE_TERMINATOR);
        }
        trace!(
            "Sending command to {}: '{}'",
            self.port_name,
            line.escape_ascii()
        );

        transport.clear_input()?;
        transport.write_all(&line)?;
        transport.flush()?;
        Ok(transport)
    }
}

impl<T: Transport> Drop for CommandEngine<T> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionError;
    use crate::instrument::mock::{MockEventKind, MockTransport};

    fn engine(mock: &MockTransport) -> CommandEngine<MockTransport> {
        CommandEngine::with_transport(mock.clone(), "mock", ProtocolTiming::immediate()).unwrap()
    }

    #[test]
    fn test_open_clears_both_buffers() {
        let mock = MockTransport::new();
        let engine = engine(&mock);
        assert!(engine.is_open());
        assert_eq!(
            mock.event_kinds(),
            vec![MockEventKind::ClearInput, MockEventKind::ClearOutput]
        );
    }

    #[test]
    fn test_write_appends_terminator_once() {
        let mock = MockTransport::new();
        let mut engine = engine(&mock);
        engine.write("OUTP 0", Duration::ZERO).unwrap();
        engine.write("OUTP 1\n", Duration::ZERO).unwrap();
        assert_eq!(mock.written(), vec!["OUTP 0\n", "OUTP 1\n"]);
    }

    #[test]
    fn test_write_never_reads() {
        let mock = MockTransport::new();
        let mut engine = engine(&mock);
        mock.clear_log();

        engine.write("VOLT 1.00V", Duration::ZERO).unwrap();
        assert_eq!(
            mock.event_kinds(),
            vec![
                MockEventKind::ClearInput,
                MockEventKind::Write,
                MockEventKind::Flush
            ]
        );
    }

    #[test]
    fn test_query_trims_and_maps_empty_to_none() {
        let mock = MockTransport::new();
        mock.push_reply(b"  BK PRECISION,1697B\r\n");
        mock.push_reply(b"\n");
        let mut engine = engine(&mock);

        assert_eq!(
            engine.query("*IDN?", Duration::ZERO).unwrap().as_deref(),
            Some("BK PRECISION,1697B")
        );
        assert_eq!(engine.query("*IDN?", Duration::ZERO).unwrap(), None);
        // nothing queued: timeout
        assert_eq!(engine.query("*IDN?", Duration::ZERO).unwrap(), None);
    }

    #[test]
    fn test_query_undecodable_is_none() {
        let mock = MockTransport::new();
        mock.push_reply(&[0xc3, 0x28, b'\n']);
        let mut engine = engine(&mock);
        assert_eq!(engine.query("SYST:VER?", Duration::ZERO).unwrap(), None);
    }

    #[test]
    fn test_numeric_query_failure_is_typed() {
        let mock = MockTransport::new();
        mock.push_reply(b"-1.00V\n");
        mock.push_reply(b"ERR\n");
        let mut engine = engine(&mock);

        // a genuine -1 reading is a success, not a failure
        assert_eq!(engine.numeric_query("VOLT?", Duration::ZERO).unwrap(), -1.0);
        assert!(matches!(
            engine.numeric_query("VOLT?", Duration::ZERO),
            Err(PsuError::Extraction(ExtractionError::NoNumber(_)))
        ));
        assert!(matches!(
            engine.numeric_query("VOLT?", Duration::ZERO),
            Err(PsuError::Extraction(ExtractionError::NoData))
        ));
    }

    #[test]
    fn test_operations_after_close_fail() {
        let mock = MockTransport::new();
        let mut engine = engine(&mock);
        engine.close();
        assert!(!engine.is_open());
        assert!(matches!(
            engine.write("OUTP 1", Duration::ZERO),
            Err(PsuError::NotOpen)
        ));
        assert!(matches!(
            engine.query("OUTP?", Duration::ZERO),
            Err(PsuError::NotOpen)
        ));
    }

    #[test]
    fn test_close_is_idempotent_and_drop_closes_once() {
        let mock = MockTransport::new();
        let mut engine = engine(&mock);
        engine.close();
        engine.close();
        drop(engine);

        let closes = mock
            .event_kinds()
            .into_iter()
            .filter(|k| *k == MockEventKind::Close)
            .count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_write_error_propagates() {
        let mock = MockTransport::new();
        let mut engine = engine(&mock);
        mock.trigger_write_failure();
        assert!(matches!(
            engine.write("VOLT 1.00V", Duration::ZERO),
            Err(PsuError::Io(_))
        ));
    }
}
