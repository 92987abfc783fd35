//! Byte-level link to the supply.
//!
//! [`Transport`] is the seam between the command engine and the physical port. The
//! engine only ever needs to clear buffers, write, flush and read one line, so that
//! is all the trait asks for. [`SerialTransport`] implements it on top of the
//! `serialport` crate; [`MockTransport`](super::mock::MockTransport) implements it
//! for tests.

use crate::config::LinkConfig;
use crate::error::{PsuError, PsuResult};
use serialport::{ClearBuffer, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

/// Line terminator of every command and reply.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Synchronous line-oriented transport.
///
/// Implementations are exclusively owned by one engine; they need not be `Sync`.
pub trait Transport: Send {
    /// Discard bytes received but not yet read.
    fn clear_input(&mut self) -> PsuResult<()>;

    /// Discard bytes written but not yet transmitted.
    fn clear_output(&mut self) -> PsuResult<()>;

    /// Write the whole buffer.
    fn write_all(&mut self, data: &[u8]) -> PsuResult<()>;

    /// Block until written bytes have been handed to the device.
    fn flush(&mut self) -> PsuResult<()>;

    /// Read up to and including the next line terminator.
    ///
    /// Returns whatever arrived before the read timeout; an empty vector means the
    /// device sent nothing. A timeout is not an error.
    fn read_line(&mut self) -> PsuResult<Vec<u8>>;

    /// Release the underlying resource. Called once by the engine.
    fn close(&mut self) {}
}

/// `serialport`-backed transport.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    timeout: Duration,
}

impl SerialTransport {
    /// Open the port described by `link`.
    ///
    /// # Errors
    /// `PsuError::Connection` if the port cannot be opened, `PsuError::Configuration` for an
    /// unsupported byte size.
    pub fn open(link: &LinkConfig) -> PsuResult<Self> {
        let port = serialport::new(&link.path, link.baud)
            .data_bits(link.data_bits()?)
            .parity(link.parity.into())
            .stop_bits(link.stop_bits.into())
            .flow_control(serialport::FlowControl::None)
            .timeout(link.timeout)
            .open()
            .map_err(|source| PsuError::Connection {
                port: link.path.clone(),
                source,
            })?;

        Ok(Self {
            port,
            timeout: link.timeout,
        })
    }

    fn clear(&mut self, which: ClearBuffer) -> PsuResult<()> {
        self.port
            .clear(which)
            .map_err(|e| PsuError::Io(std::io::Error::new(ErrorKind::Other, e)))
    }
}

impl Transport for SerialTransport {
    fn clear_input(&mut self) -> PsuResult<()> {
        self.clear(ClearBuffer::Input)
    }

    fn clear_output(&mut self) -> PsuResult<()> {
        self.clear(ClearBuffer::Output)
    }

    fn write_all(&mut self, data: &[u8]) -> PsuResult<()> {
        self.port.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> PsuResult<()> {
        self.port.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> PsuResult<Vec<u8>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        let start = Instant::now();

        while start.elapsed() < self.timeout {
            match self.port.read(&mut byte) {
                Ok(1) => {
                    line.push(byte[0]);
                    if byte[0] == LINE_TERMINATOR {
                        break;
                    }
                }
                Ok(_) => continue,
                Err(ref e) if e.kind() == ErrorKind::TimedOut => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(line)
    }
}
