//! Protocol constants for Zketech EBC/EBD serial communication.
//!
//! This module defines the constants used by the Zketech wire protocol:
//! frame markers, frame lengths, action codes, status codes and the
//! base-240 encoding parameters, plus the serial link configuration.

/// First byte of every request and response frame
pub const BEGIN_MARKER: u8 = 0xFA;

/// Last byte of every request and response frame
pub const END_MARKER: u8 = 0xF8;

/// Base used for the hi/lo split of 16-bit quantities and as the
/// checksum modulus. Payload bytes therefore never collide with the
/// frame markers (0xFA/0xF8).
pub const WIRE_BASE: u16 = 240;

/// Largest raw value representable as a base-240 hi/lo pair
pub const MAX_RAW: u16 = WIRE_BASE * WIRE_BASE - 1;

/// Request frame length in bytes
pub const REQUEST_LEN: usize = 10;

/// Response frame length in bytes
pub const RESPONSE_LEN: usize = 19;

/// Default baud rate of the vendor link (8 data bits, even parity, 1 stop bit)
pub const DEFAULT_BAUD: u32 = 9600;

/// Read timeout in milliseconds. The device emits a status frame roughly
/// every two seconds while in PC-link mode, so three seconds is enough
/// slack for one full period plus transmission time.
pub const READ_TIMEOUT_MS: u64 = 3000;

/// Longest accepted test duration in minutes
pub const MAX_DURATION_MIN: u16 = 999;

/// Largest current accepted for an internal resistance measurement, in mA
pub const MAX_RESISTANCE_CURRENT_MA: u16 = 30_000;

// Action codes, carried in bits 3..0 of the request code byte.
// Bits 6..4 carry the program (mode) for the actions that need one.

/// Start the configured test
pub const ACTION_START: u8 = 0x01;
/// Stop the running test
pub const ACTION_STOP: u8 = 0x02;
/// Calibrate a measurement channel
pub const ACTION_CALIBRATE: u8 = 0x04;
/// Enter PC-link mode / request a status frame
pub const ACTION_LINK_ON: u8 = 0x05;
/// Leave PC-link mode
pub const ACTION_LINK_OFF: u8 = 0x06;
/// Set or update test parameters without starting
pub const ACTION_SET_PARAMS: u8 = 0x07;
/// Start an automated charge-discharge-charge cycle
pub const ACTION_START_AUTO: u8 = 0x08;
/// Measure the internal resistance of the battery
pub const ACTION_MEASURE_RESISTANCE: u8 = 0x09;

// Status codes. The response status byte packs `state * 10 + sub`,
// where `sub` is the program code while testing and the step ordinal
// while auto-cycling.

/// No test running (also reported once all auto steps are finished)
pub const STATE_IDLE: u8 = 0;
/// A test is running; sub-field carries the program code
pub const STATE_TESTING: u8 = 1;
/// A test is in its final step; sub-field carries the program code
pub const STATE_ENDING: u8 = 2;
/// An auto cycle is running; sub-field carries the step ordinal (1-based)
pub const STATE_AUTO: u8 = 3;
/// Device has just powered on and has no program selected yet
pub const STATE_INIT: u8 = 10;
