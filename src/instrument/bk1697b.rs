//! BK Precision 1697B DC Power Supply Driver
//!
//! Protocol Overview:
//! - Format: SCPI-style ASCII commands (enable SCPI on the front panel first:
//!   shift/clear, 4, select Y)
//! - Baud: 115200 by default, 8N1, no flow control
//! - Terminator: LF (`\n`)
//! - Units: V for voltage, A for current, W for power
//!
//! # Important Notes
//!
//! - Output state is encoded inverted on the wire: `0` means ON, `1` means OFF.
//!   [`OutputState`] hides this; callers never see wire values.
//! - Setters are not acknowledged. Re-query after a settle delay if certainty is needed.
//! - Nothing is cached: every getter goes to the device.
//!
//! # Example Usage
//!
//! ```no_run
//! use bk_psu::config::{LinkConfig, ProtocolTiming};
//! use bk_psu::instrument::Bk1697b;
//!
//! fn main() -> bk_psu::error::PsuResult<()> {
//!     let mut psu = Bk1697b::open(&LinkConfig::new("/dev/ttyACM0"), ProtocolTiming::default())?;
//!
//!     psu.set_voltage(9.0)?;
//!     psu.set_current(2.5)?;
//!     psu.turn_on()?;
//!
//!     println!("Measured: {:.3} V", psu.measure_voltage()?);
//!
//!     psu.turn_off()?;
//!     psu.close();
//!     Ok(())
//! }
//! ```

use super::engine::CommandEngine;
use super::transport::{SerialTransport, Transport};
use crate::config::{LinkConfig, ProtocolTiming};
use crate::error::{PsuError, PsuResult};
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Command strings understood by the 1697B.
pub mod cmds {
    /// Identification string
    pub const IDN: &str = "*IDN?";
    /// SCPI version
    pub const VERSION: &str = "SYST:VER?";
    /// Program output voltage (prefix of `VOLT <v>V`)
    pub const SET_VOLT: &str = "VOLT";
    /// Program output current (prefix of `CURR <i>A`)
    pub const SET_CURR: &str = "CURR";
    /// Programmed voltage
    pub const GET_VOLT: &str = "VOLT?";
    /// Programmed current
    pub const GET_CURR: &str = "CURR?";
    /// Measured output voltage
    pub const MEAS_VOLT: &str = "MEAS:VOLT?";
    /// Measured output current
    pub const MEAS_CURR: &str = "MEAS:SCAL:CURR:DC?";
    /// Measured output power
    pub const MEAS_POW: &str = "MEAS:POW?";
    /// Output switch (prefix of `OUTP 0|1`)
    pub const OUTP: &str = "OUTP";
    /// Output state
    pub const GET_OUTP: &str = "OUTP?";
    /// Upper voltage limit (prefix of `VOLT:LIM <v>V`)
    pub const SET_VOLT_LIM: &str = "VOLT:LIM";
    /// Upper current limit (prefix of `CURR:LIM <i>A`)
    pub const SET_CURR_LIM: &str = "CURR:LIM";
    /// Programmed upper voltage limit
    pub const GET_VOLT_LIM: &str = "VOLT:LIM?";
    /// Programmed upper current limit
    pub const GET_CURR_LIM: &str = "CURR:LIM?";
}

/// Whether the supply output is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// Output enabled
    On,
    /// Output disabled
    Off,
}

impl OutputState {
    /// Decode the device's inverted wire value (`0` = ON, `1` = OFF).
    ///
    /// Any non-zero integer is treated as OFF.
    pub fn from_wire(value: i64) -> Self {
        if value == 0 {
            OutputState::On
        } else {
            OutputState::Off
        }
    }

    /// Wire value to send for this state.
    pub fn wire_value(self) -> u8 {
        match self {
            OutputState::On => 0,
            OutputState::Off => 1,
        }
    }

    /// `true` for `On`.
    pub fn is_on(self) -> bool {
        self == OutputState::On
    }

    /// The other state.
    pub fn toggled(self) -> Self {
        match self {
            OutputState::On => OutputState::Off,
            OutputState::Off => OutputState::On,
        }
    }
}

impl fmt::Display for OutputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputState::On => write!(f, "ON"),
            OutputState::Off => write!(f, "OFF"),
        }
    }
}

/// Everything [`Bk1697b::status`] reads in one pass.
///
/// Fields are `None` when that particular reading failed; the failure is logged.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplyStatus {
    /// Output switch
    pub output: Option<OutputState>,
    /// Programmed voltage (V)
    pub voltage_setting: Option<f64>,
    /// Programmed current (A)
    pub current_setting: Option<f64>,
    /// Measured voltage (V)
    pub voltage: Option<f64>,
    /// Measured current (A)
    pub current: Option<f64>,
    /// Measured power (W)
    pub power: Option<f64>,
    /// Upper voltage limit (V)
    pub voltage_limit: Option<f64>,
    /// Upper current limit (A)
    pub current_limit: Option<f64>,
}

/// Driver for the BK Precision 1697B.
pub struct Bk1697b<T: Transport = SerialTransport> {
    engine: CommandEngine<T>,
}

impl Bk1697b<SerialTransport> {
    /// Open the supply on a serial link.
    ///
    /// # Errors
    /// Returns error if the serial port cannot be opened
    pub fn open(link: &LinkConfig, timing: ProtocolTiming) -> PsuResult<Self> {
        Ok(Self {
            engine: CommandEngine::open(link, timing)?,
        })
    }
}

impl<T: Transport> Bk1697b<T> {
    /// Drive the supply through an existing engine.
    pub fn new(engine: CommandEngine<T>) -> Self {
        Self { engine }
    }

    fn query_delay(&self) -> Duration {
        self.engine.timing().query_delay
    }

    fn write_delay(&self) -> Duration {
        self.engine.timing().write_delay
    }

    fn fquery(&mut self, command: &str) -> PsuResult<f64> {
        let delay = self.query_delay();
        self.engine.numeric_query(command, delay)
    }

    fn write_value(&mut self, prefix: &str, value: f64, unit: char) -> PsuResult<()> {
        if !value.is_finite() {
            return Err(PsuError::Configuration(format!(
                "{} value must be finite, got {}",
                prefix, value
            )));
        }
        let delay = self.write_delay();
        self.engine
            .write(&format!("{} {:.2}{}", prefix, value, unit), delay)
    }

    /// Identification string.
    pub fn identification(&mut self) -> PsuResult<Option<String>> {
        let delay = self.query_delay();
        self.engine.query(cmds::IDN, delay)
    }

    /// SCPI version reported by the firmware.
    pub fn version(&mut self) -> PsuResult<Option<String>> {
        let delay = self.query_delay();
        self.engine.query(cmds::VERSION, delay)
    }

    /// Set output voltage in volts (sent with two decimals).
    pub fn set_voltage(&mut self, volts: f64) -> PsuResult<()> {
        self.write_value(cmds::SET_VOLT, volts, 'V')
    }

    /// Set output current limit in amps (sent with two decimals).
    pub fn set_current(&mut self, amps: f64) -> PsuResult<()> {
        self.write_value(cmds::SET_CURR, amps, 'A')
    }

    /// Programmed voltage.
    pub fn voltage_setting(&mut self) -> PsuResult<f64> {
        self.fquery(cmds::GET_VOLT)
    }

    /// Programmed current.
    pub fn current_setting(&mut self) -> PsuResult<f64> {
        self.fquery(cmds::GET_CURR)
    }

    /// Measured output voltage.
    pub fn measure_voltage(&mut self) -> PsuResult<f64> {
        self.fquery(cmds::MEAS_VOLT)
    }

    /// Measured output current.
    pub fn measure_current(&mut self) -> PsuResult<f64> {
        self.fquery(cmds::MEAS_CURR)
    }

    /// Measured output power.
    pub fn measure_power(&mut self) -> PsuResult<f64> {
        self.fquery(cmds::MEAS_POW)
    }

    /// Set the upper voltage limit in volts.
    pub fn set_upper_limit_voltage(&mut self, volts: f64) -> PsuResult<()> {
        self.write_value(cmds::SET_VOLT_LIM, volts, 'V')
    }

    /// Set the upper current limit in amps.
    pub fn set_upper_limit_current(&mut self, amps: f64) -> PsuResult<()> {
        self.write_value(cmds::SET_CURR_LIM, amps, 'A')
    }

    /// Programmed upper voltage limit.
    pub fn upper_limit_voltage(&mut self) -> PsuResult<f64> {
        self.fquery(cmds::GET_VOLT_LIM)
    }

    /// Programmed upper current limit.
    pub fn upper_limit_current(&mut self) -> PsuResult<f64> {
        self.fquery(cmds::GET_CURR_LIM)
    }

    /// Switch the output on. Not acknowledged by the device.
    pub fn turn_on(&mut self) -> PsuResult<()> {
        self.set_output(OutputState::On)
    }

    /// Switch the output off. Not acknowledged by the device.
    pub fn turn_off(&mut self) -> PsuResult<()> {
        self.set_output(OutputState::Off)
    }

    /// Command the given output state.
    pub fn set_output(&mut self, state: OutputState) -> PsuResult<()> {
        let delay = self.write_delay();
        self.engine
            .write(&format!("{} {}", cmds::OUTP, state.wire_value()), delay)
    }

    /// Current output state.
    ///
    /// An empty reply (timeout, unplugged device) is reported as `Off`: an unknown
    /// output is treated as disabled. This can make a disconnected supply look safe, so
    /// it is logged at `warn`.
    ///
    /// # Errors
    /// `PsuError::UnexpectedResponse` if the reply is not an integer.
    pub fn output_state(&mut self) -> PsuResult<OutputState> {
        let delay = self.query_delay();
        match self.engine.query(cmds::GET_OUTP, delay)? {
            Some(reply) => reply
                .parse::<i64>()
                .map(OutputState::from_wire)
                .map_err(|_| PsuError::UnexpectedResponse(reply)),
            None => {
                warn!("No reply to {}; reporting output as OFF", cmds::GET_OUTP);
                Ok(OutputState::Off)
            }
        }
    }

    /// Query the output state and command the opposite. Returns the state commanded.
    pub fn toggle_output(&mut self) -> PsuResult<OutputState> {
        let next = self.output_state()?.toggled();
        self.set_output(next)?;
        Ok(next)
    }

    /// Read every setting and measurement once.
    ///
    /// Individual failures, including an unreadable output state, become `None`; a
    /// closed link or I/O error aborts.
    pub fn status(&mut self) -> PsuResult<SupplyStatus> {
        Ok(SupplyStatus {
            output: recoverable(self.output_state())?,
            voltage_setting: recoverable(self.voltage_setting())?,
            current_setting: recoverable(self.current_setting())?,
            voltage: recoverable(self.measure_voltage())?,
            current: recoverable(self.measure_current())?,
            power: recoverable(self.measure_power())?,
            voltage_limit: recoverable(self.upper_limit_voltage())?,
            current_limit: recoverable(self.upper_limit_current())?,
        })
    }

    /// Whether the link is open.
    pub fn is_open(&self) -> bool {
        self.engine.is_open()
    }

    /// Close the link. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.engine.close();
    }
}

/// Turn a recoverable failure into `None`, keep fatal ones as errors.
fn recoverable<V>(result: PsuResult<V>) -> PsuResult<Option<V>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_recoverable() => {
            warn!("Status reading failed: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::MockTransport;

    fn supply(mock: &MockTransport) -> Bk1697b<MockTransport> {
        let engine =
            CommandEngine::with_transport(mock.clone(), "mock", ProtocolTiming::immediate())
                .unwrap();
        Bk1697b::new(engine)
    }

    #[test]
    fn test_output_state_wire_encoding_is_inverted() {
        assert_eq!(OutputState::from_wire(0), OutputState::On);
        assert_eq!(OutputState::from_wire(1), OutputState::Off);
        assert_eq!(OutputState::On.wire_value(), 0);
        assert_eq!(OutputState::Off.wire_value(), 1);
    }

    #[test]
    fn test_output_state_query() {
        let mock = MockTransport::new();
        mock.push_reply(b"0\n");
        mock.push_reply(b"1\n");
        let mut psu = supply(&mock);

        assert!(psu.output_state().unwrap().is_on());
        assert!(!psu.output_state().unwrap().is_on());
        // no reply at all: fail-safe OFF
        assert_eq!(psu.output_state().unwrap(), OutputState::Off);
        assert_eq!(mock.written(), vec!["OUTP?\n"; 3]);
    }

    #[test]
    fn test_output_state_garbage_is_error() {
        let mock = MockTransport::new();
        mock.push_reply(b"ON\n");
        let mut psu = supply(&mock);
        assert!(matches!(
            psu.output_state(),
            Err(PsuError::UnexpectedResponse(reply)) if reply == "ON"
        ));
    }

    #[test]
    fn test_setters_format_two_decimals_with_unit() {
        let mock = MockTransport::new();
        let mut psu = supply(&mock);

        psu.set_voltage(9.0).unwrap();
        psu.set_current(2.5).unwrap();
        psu.set_upper_limit_voltage(14.0).unwrap();
        psu.set_upper_limit_current(0.3).unwrap();

        assert_eq!(
            mock.written(),
            vec![
                "VOLT 9.00V\n",
                "CURR 2.50A\n",
                "VOLT:LIM 14.00V\n",
                "CURR:LIM 0.30A\n",
            ]
        );
    }

    #[test]
    fn test_non_finite_setpoint_is_rejected_before_sending() {
        let mock = MockTransport::new();
        let mut psu = supply(&mock);
        assert!(psu.set_voltage(f64::NAN).is_err());
        assert!(mock.written().is_empty());
    }

    #[test]
    fn test_turn_on_off_wire_values() {
        let mock = MockTransport::new();
        let mut psu = supply(&mock);
        psu.turn_on().unwrap();
        psu.turn_off().unwrap();
        assert_eq!(mock.written(), vec!["OUTP 0\n", "OUTP 1\n"]);
    }

    #[test]
    fn test_toggle_output() {
        let mock = MockTransport::new();
        mock.push_reply(b"1\n");
        let mut psu = supply(&mock);

        assert_eq!(psu.toggle_output().unwrap(), OutputState::On);
        assert_eq!(mock.written(), vec!["OUTP?\n", "OUTP 0\n"]);
    }

    #[test]
    fn test_measurement_commands() {
        let mock = MockTransport::new();
        let replies: [&[u8]; 5] = [b"9.000V\n", b"0.500A\n", b"4.500W\n", b"15.00V\n", b"3.000A\n"];
        for reply in replies {
            mock.push_reply(reply);
        }
        let mut psu = supply(&mock);

        assert_eq!(psu.measure_voltage().unwrap(), 9.0);
        assert_eq!(psu.measure_current().unwrap(), 0.5);
        assert_eq!(psu.measure_power().unwrap(), 4.5);
        assert_eq!(psu.upper_limit_voltage().unwrap(), 15.0);
        assert_eq!(psu.upper_limit_current().unwrap(), 3.0);
        assert_eq!(
            mock.written(),
            vec![
                "MEAS:VOLT?\n",
                "MEAS:SCAL:CURR:DC?\n",
                "MEAS:POW?\n",
                "VOLT:LIM?\n",
                "CURR:LIM?\n",
            ]
        );
    }

    #[test]
    fn test_status_tolerates_individual_failures() {
        let mock = MockTransport::new();
        mock.push_reply(b"0\n"); // OUTP?
        mock.push_reply(b"9.00V\n"); // VOLT?
        mock.push_reply(b"junk\n"); // CURR?
        let mut psu = supply(&mock);

        let status = psu.status().unwrap();
        assert_eq!(status.output, Some(OutputState::On));
        assert_eq!(status.voltage_setting, Some(9.0));
        assert_eq!(status.current_setting, None);
        // remaining queries timed out
        assert_eq!(status.power, None);
    }

    #[test]
    fn test_status_survives_unreadable_output_state() {
        let mock = MockTransport::new();
        mock.push_reply(b"ON\n"); // OUTP?
        mock.push_reply(b"12.00V\n"); // VOLT?
        mock.push_reply(b"1.50A\n"); // CURR?
        let mut psu = supply(&mock);

        let status = psu.status().unwrap();
        assert_eq!(status.output, None);
        assert_eq!(status.voltage_setting, Some(12.0));
        assert_eq!(status.current_setting, Some(1.5));
        assert_eq!(mock.written().len(), 8);
    }

    #[test]
    fn test_status_on_closed_link_fails() {
        let mock = MockTransport::new();
        let mut psu = supply(&mock);
        psu.close();
        assert!(matches!(psu.status(), Err(PsuError::NotOpen)));
    }
}
