//! Byte-level serial transport.
//!
//! The transport is a thin pipe: it writes whole frames, reads an exact
//! number of bytes under a per-call deadline, and nothing else. Retry
//! policy lives in the protocol engine, which knows which operations are
//! idempotent.

use std::io::{Read, Write};
use std::time::Duration;

use log::debug;
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};

use crate::constants::RESPONSE_LEN;
use crate::error::{Result, ZkError};

/// Byte-level exchange over a serial connection.
///
/// Implemented by [`SerialTransport`] for real hardware; tests supply a
/// scripted implementation.
pub trait Transport {
    /// Write a full frame. Fails with `ZkError::Io` on partial write or
    /// disconnect.
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Read exactly `len` bytes, waiting at most `timeout`. Fails with
    /// `ZkError::Timeout` when the deadline elapses and `ZkError::Io` on
    /// disconnect. A timeout leaves the connection usable.
    fn receive(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Release the connection. Idempotent; later calls are no-ops.
    fn close(&mut self) -> Result<()>;
}

/// [`Transport`] over a physical serial port.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Open and claim a serial port with the vendor link settings
    /// (8 data bits, even parity, 1 stop bit).
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::Even)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(crate::constants::READ_TIMEOUT_MS))
            .open()?;
        debug!("opened serial port {port_name} at {baud_rate} baud");
        Ok(SerialTransport { port: Some(port) })
    }

    /// List available serial ports.
    pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
        Ok(serialport::available_ports()?)
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or_else(|| {
            ZkError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "serial port is closed",
            ))
        })
    }
}

/// Serial failures after a successful open are session failures the
/// caller must reopen on, not connect failures.
fn into_io(e: serialport::Error) -> ZkError {
    ZkError::Io(e.into())
}

impl Transport for SerialTransport {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        // The device streams status frames continuously in link mode;
        // drop anything stale so the next read starts on a fresh frame.
        if port.bytes_to_read().map_err(into_io)? as usize > RESPONSE_LEN {
            port.clear(ClearBuffer::Input).map_err(into_io)?;
        }
        port.write_all(frame)?;
        port.flush()?;
        Ok(())
    }

    fn receive(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let port = self.port_mut()?;
        port.set_timeout(timeout).map_err(into_io)?;
        let mut buf = vec![0u8; len];
        match port.read_exact(&mut buf) {
            Ok(()) => Ok(buf),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(ZkError::Timeout),
            Err(e) => Err(ZkError::Io(e)),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!("serial port closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mid_session_serial_errors_surface_as_io() {
        let e = serialport::Error::new(serialport::ErrorKind::Unknown, "device unplugged");
        assert!(matches!(into_io(e), ZkError::Io(_)));
    }
}
