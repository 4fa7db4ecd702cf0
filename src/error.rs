//! Error types for Zketech protocol operations.

use thiserror::Error;

/// Result type alias for Zketech operations.
pub type Result<T> = std::result::Result<T, ZkError>;

/// Error types for Zketech battery tester communication.
///
/// Retryable conditions (`Timeout`, `Checksum`, `MalformedFrame`) leave the
/// session state untouched, so the caller can simply poll again. The other
/// variants are either fatal for the session or indicate a caller bug.
#[derive(Error, Debug)]
pub enum ZkError {
    /// Serial port could not be opened or claimed
    #[error("serial port error: {0}")]
    Connection(#[from] serialport::Error),

    /// Read or write failure mid-session; the caller must reopen
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No response within the deadline; safe to retry status polls
    #[error("communication timeout")]
    Timeout,

    /// Response checksum did not match its trailing checksum byte
    #[error("checksum mismatch: computed {computed:#04x}, frame carries {received:#04x}")]
    Checksum {
        /// Checksum computed over the received frame body
        computed: u8,
        /// Checksum byte carried in the frame trailer
        received: u8,
    },

    /// Response had the wrong length, bad markers or an unknown code
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Operation attempted in the wrong session state; fix the call order
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// Session state it was attempted in
        state: String,
    },

    /// A test parameter is outside the device's documented range
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}
