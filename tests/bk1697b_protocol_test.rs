//! Integration tests for the 1697B driver against a scripted transport.
//!
//! These tests drive the public API end to end: facade -> engine -> transport, and
//! check both the bytes on the wire and the timing of each exchange.

use bk_psu::config::ProtocolTiming;
use bk_psu::error::{ExtractionError, PsuError};
use bk_psu::instrument::mock::MockEventKind;
use bk_psu::instrument::{Bk1697b, CommandEngine, MockTransport, OutputState};
use std::time::{Duration, Instant};

fn open(mock: &MockTransport, timing: ProtocolTiming) -> Bk1697b<MockTransport> {
    let engine = CommandEngine::with_transport(mock.clone(), "mock", timing).unwrap();
    Bk1697b::new(engine)
}

// =============================================================================
// Wire protocol
// =============================================================================

#[test]
fn test_set_then_read_back_voltage() {
    let mock = MockTransport::new();
    mock.push_reply(b"9.00V\n");
    let mut psu = open(&mock, ProtocolTiming::immediate());

    psu.set_voltage(9.0).unwrap();
    let setting = psu.voltage_setting().unwrap();

    assert_eq!(setting, 9.0);
    assert_eq!(mock.written(), vec!["VOLT 9.00V\n", "VOLT?\n"]);
}

#[test]
fn test_identification_and_version() {
    let mock = MockTransport::new();
    mock.push_reply(b"B&K Precision,1697B,123456,1.10\r\n");
    mock.push_reply(b"1999.0\n");
    let mut psu = open(&mock, ProtocolTiming::immediate());

    assert_eq!(
        psu.identification().unwrap().as_deref(),
        Some("B&K Precision,1697B,123456,1.10")
    );
    assert_eq!(psu.version().unwrap().as_deref(), Some("1999.0"));
    assert_eq!(mock.written(), vec!["*IDN?\n", "SYST:VER?\n"]);
}

#[test]
fn test_settings_queries() {
    let mock = MockTransport::new();
    mock.push_reply(b"2.50A\n");
    let mut psu = open(&mock, ProtocolTiming::immediate());

    assert_eq!(psu.current_setting().unwrap(), 2.5);
    assert_eq!(mock.written(), vec!["CURR?\n"]);
}

#[test]
fn test_corrupted_reading_is_repaired() {
    let mock = MockTransport::new();
    // firmware quirk: a stray byte after the decimal point
    mock.push_reply(b"1.#250A\n");
    let mut psu = open(&mock, ProtocolTiming::immediate());

    assert_eq!(psu.measure_current().unwrap(), 1.25);
}

#[test]
fn test_measurement_failure_is_distinct_from_minus_one() {
    let mock = MockTransport::new();
    mock.push_reply(b"-1.000V\n");
    mock.push_reply(b"\xff\xfe\n");
    let mut psu = open(&mock, ProtocolTiming::immediate());

    assert_eq!(psu.measure_voltage().unwrap(), -1.0);
    let err = psu.measure_voltage().unwrap_err();
    assert!(matches!(
        err,
        PsuError::Extraction(ExtractionError::Decode { .. })
    ));
    assert!(err.is_recoverable());
}

// =============================================================================
// Output state machine
// =============================================================================

#[test]
fn test_output_state_round_trip() {
    let mock = MockTransport::new();
    mock.push_reply(b"1\n"); // initially off
    mock.push_reply(b"0\n"); // on after turn_on
    let mut psu = open(&mock, ProtocolTiming::immediate());

    assert_eq!(psu.output_state().unwrap(), OutputState::Off);
    psu.turn_on().unwrap();
    assert_eq!(psu.output_state().unwrap(), OutputState::On);
    assert_eq!(mock.written(), vec!["OUTP?\n", "OUTP 0\n", "OUTP?\n"]);
}

#[test]
fn test_silent_device_reads_as_off() {
    let mock = MockTransport::new();
    let mut psu = open(&mock, ProtocolTiming::immediate());
    assert_eq!(psu.output_state().unwrap(), OutputState::Off);
}

// =============================================================================
// Timing
// =============================================================================

#[test]
fn test_no_read_before_query_delay_elapses() {
    let timing = ProtocolTiming {
        warmup: Duration::ZERO,
        write_delay: Duration::from_millis(20),
        query_delay: Duration::from_millis(60),
    };
    let mock = MockTransport::new();
    mock.push_reply(b"5.00V\n");
    let mut psu = open(&mock, timing);
    mock.clear_log();

    psu.measure_voltage().unwrap();

    let events = mock.events();
    let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            MockEventKind::ClearInput,
            MockEventKind::Write,
            MockEventKind::Flush,
            MockEventKind::ReadLine
        ]
    );
    let settle = events[3].at.duration_since(events[2].at);
    assert!(
        settle >= timing.query_delay,
        "read {:?} after flush, expected at least {:?}",
        settle,
        timing.query_delay
    );
}

#[test]
fn test_write_blocks_for_write_delay() {
    let timing = ProtocolTiming {
        warmup: Duration::ZERO,
        write_delay: Duration::from_millis(40),
        query_delay: Duration::ZERO,
    };
    let mock = MockTransport::new();
    let mut psu = open(&mock, timing);

    let start = Instant::now();
    psu.turn_off().unwrap();
    assert!(start.elapsed() >= timing.write_delay);
}

#[test]
fn test_open_waits_for_warmup() {
    let timing = ProtocolTiming {
        warmup: Duration::from_millis(50),
        ..ProtocolTiming::immediate()
    };
    let start = Instant::now();
    let _psu = open(&MockTransport::new(), timing);
    assert!(start.elapsed() >= timing.warmup);
}

#[test]
fn test_default_delays_are_protocol_constants() {
    let timing = ProtocolTiming::default();
    assert_eq!(timing.warmup, Duration::from_secs(2));
    assert_eq!(timing.write_delay, Duration::from_millis(100));
    assert_eq!(timing.query_delay, Duration::from_millis(500));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_close_twice_is_harmless() {
    let mock = MockTransport::new();
    let mut psu = open(&mock, ProtocolTiming::immediate());

    psu.close();
    assert!(!psu.is_open());
    psu.close();
    assert!(!psu.is_open());

    assert!(matches!(psu.measure_power(), Err(PsuError::NotOpen)));
    assert!(matches!(psu.turn_on(), Err(PsuError::NotOpen)));
}

#[test]
fn test_dropping_supply_closes_transport() {
    let mock = MockTransport::new();
    drop(open(&mock, ProtocolTiming::immediate()));
    assert_eq!(mock.event_kinds().last(), Some(&MockEventKind::Close));
}
