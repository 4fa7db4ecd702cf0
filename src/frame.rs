//! Wire frame encoding and decoding.
//!
//! Requests are 10 bytes: begin marker, request code, three base-240
//! parameter pairs, checksum, end marker. Responses are 19 bytes: begin
//! marker, status code, four base-240 measurement pairs (current mA,
//! voltage mV, capacity mAh, elapsed minutes), three parameter-echo pairs,
//! the device model code, checksum, end marker. The checksum is the XOR of
//! every byte between the markers, reduced modulo 240.
//!
//! Decoding is strict: a frame with the wrong length, bad markers, a bad
//! checksum or an unknown status or model code is rejected without being
//! interpreted any further.

use crate::constants::{
    BEGIN_MARKER, END_MARKER, MAX_RAW, REQUEST_LEN, RESPONSE_LEN, STATE_AUTO, STATE_ENDING,
    STATE_IDLE, STATE_INIT, STATE_TESTING, WIRE_BASE,
};
use crate::error::{Result, ZkError};
use crate::types::DeviceModel;

/// XOR of all bytes, reduced modulo 240.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b) % WIRE_BASE as u8
}

/// Split a raw value into its base-240 hi/lo pair.
pub fn split(value: u16) -> (u8, u8) {
    ((value / WIRE_BASE) as u8, (value % WIRE_BASE) as u8)
}

/// Join a base-240 hi/lo pair back into a raw value.
pub fn join(hi: u8, lo: u8) -> u16 {
    hi as u16 * WIRE_BASE + lo as u16
}

/// One outbound command frame: request code plus three raw parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Request code byte (program bits 6..4, action bits 3..0)
    pub code: u8,
    /// Raw parameter values, already scaled per the mode layout
    pub params: [u16; 3],
}

impl Request {
    /// Build a request, rejecting parameters the wire cannot carry.
    pub fn new(code: u8, params: [u16; 3]) -> Result<Self> {
        for p in params {
            if p > MAX_RAW {
                return Err(ZkError::InvalidParameter(format!(
                    "raw value {p} exceeds the wire maximum of {MAX_RAW}"
                )));
            }
        }
        Ok(Request { code, params })
    }

    /// Serialize into the 10-byte frame, checksum included.
    pub fn encode(&self) -> [u8; REQUEST_LEN] {
        let mut frame = [0u8; REQUEST_LEN];
        frame[0] = BEGIN_MARKER;
        frame[1] = self.code;
        for (i, p) in self.params.iter().enumerate() {
            let (hi, lo) = split(*p);
            frame[2 + i * 2] = hi;
            frame[3 + i * 2] = lo;
        }
        frame[REQUEST_LEN - 2] = checksum(&frame[1..REQUEST_LEN - 2]);
        frame[REQUEST_LEN - 1] = END_MARKER;
        frame
    }
}

/// One decoded status frame, still in raw wire units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    /// State part of the status byte (code / 10)
    pub state: u8,
    /// Sub part of the status byte (code % 10): program while testing,
    /// step ordinal while auto-cycling
    pub sub: u8,
    /// Measured current in mA
    pub current_ma: u16,
    /// Measured voltage in mV
    pub voltage_mv: u16,
    /// Accumulated capacity in mAh
    pub capacity_mah: u16,
    /// Minutes since the test started
    pub elapsed_min: u16,
    /// First parameter echo; active program code while auto-cycling
    pub p1: u16,
    /// Second parameter echo
    pub p2: u16,
    /// Third parameter echo; accumulated energy in mWh while a test runs
    pub p3: u16,
    /// Reporting device model
    pub model: DeviceModel,
}

impl Response {
    /// Validate and decode a 19-byte response frame.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != RESPONSE_LEN {
            return Err(ZkError::MalformedFrame(format!(
                "expected {RESPONSE_LEN} bytes, got {}",
                buf.len()
            )));
        }
        if buf[0] != BEGIN_MARKER {
            return Err(ZkError::MalformedFrame(format!(
                "bad begin marker {:#04x}",
                buf[0]
            )));
        }
        if buf[RESPONSE_LEN - 1] != END_MARKER {
            return Err(ZkError::MalformedFrame(format!(
                "bad end marker {:#04x}",
                buf[RESPONSE_LEN - 1]
            )));
        }
        let computed = checksum(&buf[1..RESPONSE_LEN - 2]);
        let received = buf[RESPONSE_LEN - 2];
        if computed != received {
            return Err(ZkError::Checksum { computed, received });
        }

        let state = buf[1] / 10;
        let sub = buf[1] % 10;
        if !matches!(
            state,
            STATE_IDLE | STATE_TESTING | STATE_ENDING | STATE_AUTO | STATE_INIT
        ) {
            return Err(ZkError::MalformedFrame(format!(
                "unknown status code {}",
                buf[1]
            )));
        }
        let model = DeviceModel::from_code(buf[16]).ok_or_else(|| {
            ZkError::MalformedFrame(format!("unknown device model code {}", buf[16]))
        })?;

        Ok(Response {
            state,
            sub,
            current_ma: join(buf[2], buf[3]),
            voltage_mv: join(buf[4], buf[5]),
            capacity_mah: join(buf[6], buf[7]),
            elapsed_min: join(buf[8], buf[9]),
            p1: join(buf[10], buf[11]),
            p2: join(buf[12], buf[13]),
            p3: join(buf[14], buf[15]),
            model,
        })
    }
}

/// Build a syntactically valid response frame. Test scaffolding for the
/// frame and protocol tests; the fields mirror [`Response`].
#[cfg(test)]
#[allow(clippy::too_many_arguments)]
pub(crate) fn build_response(
    status_code: u8,
    current_ma: u16,
    voltage_mv: u16,
    capacity_mah: u16,
    elapsed_min: u16,
    p1: u16,
    p2: u16,
    p3: u16,
    model_code: u8,
) -> Vec<u8> {
    let mut frame = vec![0u8; RESPONSE_LEN];
    frame[0] = BEGIN_MARKER;
    frame[1] = status_code;
    for (i, v) in [current_ma, voltage_mv, capacity_mah, elapsed_min, p1, p2, p3]
        .into_iter()
        .enumerate()
    {
        let (hi, lo) = split(v);
        frame[2 + i * 2] = hi;
        frame[3 + i * 2] = lo;
    }
    frame[16] = model_code;
    frame[17] = checksum(&frame[1..17]);
    frame[18] = END_MARKER;
    frame
}
