//! Error types for c2flash.

use std::io;

use thiserror::Error;

use crate::device::DeviceIdentity;

/// Result type for c2flash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the physical link. The operator has to check the cable and
/// power-cycle the bridge.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The serial port could not be opened.
    #[error("cannot open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Nothing arrived before the read timeout elapsed.
    #[error("timeout waiting for response to command 0x{opcode:02x}")]
    Timeout { opcode: u8 },
}

/// Violations of the bridge's request/response pairing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The first response byte is not the acknowledgement of the request.
    #[error("unexpected ack for command 0x{opcode:02x}: expected 0x{expected:02x}, got {}", fmt_received(.received))]
    UnexpectedAck {
        opcode: u8,
        expected: u8,
        received: Option<u8>,
    },

    /// The response was acknowledged but carried too few payload bytes.
    #[error("short response for command 0x{opcode:02x}: expected {expected} payload bytes, got {actual}")]
    ShortResponse {
        opcode: u8,
        expected: usize,
        actual: usize,
    },
}

fn fmt_received(received: &Option<u8>) -> String {
    match received {
        Some(b) => format!("0x{b:02x}"),
        None => "nothing".to_string(),
    }
}

/// Malformed firmware record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {
    #[error("record does not start with ':'")]
    MissingMarker,

    #[error("record is truncated")]
    Truncated,

    #[error("invalid hex digits in record: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("record declares {declared} data bytes but carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("record of {0} bytes exceeds the 250 byte frame limit")]
    RecordTooLarge(usize),

    #[error("record address 0x{0:x} does not fit in 16 bits")]
    AddressTooLarge(u32),
}

/// Error type for c2flash operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A device other than the expected one is attached.
    #[error("wrong device attached: expected id 0x{expected:02x}, found {found}")]
    IdentityMismatch { expected: u8, found: DeviceIdentity },

    #[error(transparent)]
    Format(#[from] FormatError),

    /// A line of a firmware file could not be parsed.
    #[error("line {line}: {source} ({content:?})")]
    Record {
        line: usize,
        content: String,
        #[source]
        source: FormatError,
    },

    /// Read-back after a write did not match what was written. The device
    /// must be assumed partially flashed.
    #[error("verification failed at 0x{address:04x}: wrote {expected}, read back {actual}")]
    Verification {
        address: u16,
        expected: String,
        actual: String,
    },

    #[error("{operation} not allowed in session state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: crate::session::SessionState,
    },

    #[error("address range 0x{start:x}+0x{size:x} is outside the readable space")]
    AddressOutOfRange { start: u32, size: u32 },

    #[error("frame encoding error: {0}")]
    Encode(#[from] scroll::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Errors after which the bridge can no longer be trusted to pair
    /// requests with responses.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::InvalidState { .. } | Error::Config(_) | Error::AddressOutOfRange { .. }
        )
    }
}
