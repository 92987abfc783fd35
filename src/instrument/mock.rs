//! Scripted transport for testing without a supply attached.
//!
//! `MockTransport` provides:
//! - Replay of queued raw replies (one per `read_line`)
//! - A log of every command written
//! - A timestamped event log for checking write/flush/read ordering and settle delays
//! - Controllable failure injection
//!
//! Handles are cheap clones sharing the same state, so a test can keep one while the
//! engine owns the other.

use super::transport::Transport;
use crate::error::{PsuError, PsuResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// One observed transport operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockEventKind {
    /// `clear_input`
    ClearInput,
    /// `clear_output`
    ClearOutput,
    /// `write_all`
    Write,
    /// `flush`
    Flush,
    /// `read_line`
    ReadLine,
    /// `close`
    Close,
}

/// Event with the instant it happened.
#[derive(Debug, Clone, Copy)]
pub struct MockEvent {
    /// What happened
    pub kind: MockEventKind,
    /// When it happened
    pub at: Instant,
}

#[derive(Default)]
struct MockState {
    replies: VecDeque<Vec<u8>>,
    written: Vec<String>,
    events: Vec<MockEvent>,
}

/// Mock transport for testing
///
/// # Example
///
/// ```
/// use bk_psu::instrument::{MockTransport, Transport};
///
/// let mock = MockTransport::new();
/// mock.push_reply(b"9.00V\n");
///
/// let mut transport = mock.clone();
/// transport.write_all(b"VOLT?\n").unwrap();
/// assert_eq!(transport.read_line().unwrap(), b"9.00V\n".to_vec());
/// assert_eq!(mock.written(), vec!["VOLT?\n".to_string()]);
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    fail_next_write: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a mock with no queued replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw reply. Replies are handed out in order; when the queue is empty
    /// `read_line` behaves like a timeout and returns no bytes.
    pub fn push_reply(&self, raw: &[u8]) {
        self.lock().replies.push_back(raw.to_vec());
    }

    /// Make the next `write_all` fail with a broken-pipe error.
    pub fn trigger_write_failure(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Commands written so far, decoded lossily.
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    /// Full event log.
    pub fn events(&self) -> Vec<MockEvent> {
        self.lock().events.clone()
    }

    /// Event kinds only, for ordering assertions.
    pub fn event_kinds(&self) -> Vec<MockEventKind> {
        self.lock().events.iter().map(|e| e.kind).collect()
    }

    /// Number of replies still queued.
    pub fn pending_replies(&self) -> usize {
        self.lock().replies.len()
    }

    /// Forget written commands and events; queued replies are kept.
    pub fn clear_log(&self) {
        let mut state = self.lock();
        state.written.clear();
        state.events.clear();
    }

    fn record(&self, kind: MockEventKind) {
        self.lock().events.push(MockEvent {
            kind,
            at: Instant::now(),
        });
    }

    // A panicking test thread must not hide the log from the remaining assertions.
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for MockTransport {
    fn clear_input(&mut self) -> PsuResult<()> {
        self.record(MockEventKind::ClearInput);
        Ok(())
    }

    fn clear_output(&mut self) -> PsuResult<()> {
        self.record(MockEventKind::ClearOutput);
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> PsuResult<()> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(PsuError::Io(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )));
        }
        self.record(MockEventKind::Write);
        self.lock()
            .written
            .push(String::from_utf8_lossy(data).into_owned());
        Ok(())
    }

    fn flush(&mut self) -> PsuResult<()> {
        self.record(MockEventKind::Flush);
        Ok(())
    }

    fn read_line(&mut self) -> PsuResult<Vec<u8>> {
        self.record(MockEventKind::ReadLine);
        Ok(self.lock().replies.pop_front().unwrap_or_default())
    }

    fn close(&mut self) {
        self.record(MockEventKind::Close);
    }
}
