//! The underlying binary protocol of the C2 bridge.
//!
//! Every request is `opcode, length, length bytes...`; the bridge answers
//! with `opcode | 0x80` followed by a command-specific payload.

use std::fmt;

use scroll::Pwrite;

use crate::constants::{MAX_ADDRESS, MAX_RECORD_LEN, commands};
use crate::error::{Error, FormatError, ProtocolError, Result};

/// C2 bridge command
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Liveness probe, answered with `0x80` in any state.
    Ping,
    /// Run the C2 programming-interface init sequence on the target.
    Connect,
    /// Leave programming mode.
    Reset,
    /// Program `data` at a 16-bit address.
    ///
    /// `checksum` is the bridge's own check: the modulo-256 sum of both
    /// address bytes and the data. The bridge answers `0x43` if it differs.
    Write {
        address: u16,
        checksum: u8,
        data: Vec<u8>,
    },
    /// Erase the whole code flash.
    Erase,
    /// Read `len` bytes starting at a 24-bit address.
    Read { address: u32, len: u8 },
    /// Device id and revision of the target.
    DeviceInfo,
}

impl Command {
    pub fn ping() -> Self {
        Command::Ping
    }

    pub fn connect() -> Self {
        Command::Connect
    }

    pub fn reset() -> Self {
        Command::Reset
    }

    pub fn erase() -> Self {
        Command::Erase
    }

    pub fn device_info() -> Self {
        Command::DeviceInfo
    }

    pub fn read(address: u32, len: u8) -> Self {
        Command::Read { address, len }
    }

    pub fn write(address_hi: u8, address_lo: u8, data: Vec<u8>, checksum: u8) -> Self {
        Command::Write {
            address: u16::from_be_bytes([address_hi, address_lo]),
            checksum,
            data,
        }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Command::Ping => commands::PING,
            Command::Connect => commands::CONNECT,
            Command::Reset => commands::RESET,
            Command::Write { .. } => commands::WRITE,
            Command::Erase => commands::ERASE,
            Command::Read { .. } => commands::READ,
            Command::DeviceInfo => commands::DEVICE_INFO,
        }
    }

    /// Acknowledgement byte the bridge answers this command with.
    pub fn ack(&self) -> u8 {
        ack_for(self.opcode())
    }

    /// Number of bytes following the status byte in the response.
    pub fn response_payload_len(&self) -> usize {
        match self {
            Command::DeviceInfo => 2,
            Command::Read { len, .. } => *len as usize,
            _ => 0,
        }
    }

    pub fn into_frame(self) -> Result<Frame> {
        let opcode = self.opcode();
        match self {
            Command::Ping
            | Command::Connect
            | Command::Reset
            | Command::Erase
            | Command::DeviceInfo => Ok(Frame::new(vec![opcode, 0x00], Vec::new())),
            Command::Read { address, len } => {
                if address > MAX_ADDRESS {
                    return Err(Error::AddressOutOfRange {
                        start: address,
                        size: len as u32,
                    });
                }
                // CMD, SIZE, LEN, ADDR[3], PADDING
                let mut buf = [opcode, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00];
                // the top byte of the BE u32 lands on LEN and is overwritten
                buf.pwrite_with(address, 2, scroll::BE)?;
                buf[2] = len;
                Ok(Frame::new(buf.to_vec(), Vec::new()))
            }
            Command::Write {
                address,
                checksum,
                data,
            } => {
                if data.len() > MAX_RECORD_LEN {
                    return Err(FormatError::RecordTooLarge(data.len()).into());
                }
                // CMD, SIZE, LEN, PADDING, ADDR[2], CHECKSUM; DATA is sent separately
                let len = data.len() as u8;
                let mut buf = [opcode, len + 5, len, 0x00, 0x00, 0x00, checksum];
                buf.pwrite_with(address, 4, scroll::BE)?;
                Ok(Frame::new(buf.to_vec(), data))
            }
        }
    }
}

pub const fn ack_for(opcode: u8) -> u8 {
    opcode | commands::ACK_BIT
}

/// Checksum the bridge recomputes over a write request.
pub fn write_checksum(address_hi: u8, address_lo: u8, data: &[u8]) -> u8 {
    data.iter()
        .fold(address_hi.wrapping_add(address_lo), |acc, &b| acc.wrapping_add(b))
}

/// An encoded request. The payload, if any, is written to the link as a
/// second write right after the head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    head: Vec<u8>,
    payload: Vec<u8>,
}

impl Frame {
    fn new(head: Vec<u8>, payload: Vec<u8>) -> Self {
        Frame { head, payload }
    }

    pub fn opcode(&self) -> u8 {
        self.head[0]
    }

    pub fn head(&self) -> &[u8] {
        &self.head
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Raw bytes received for a command: status byte then payload. May be empty
/// if the read timed out.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Response(Vec<u8>);

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status() {
            Some(status) => write!(f, "STATUS({:02x})[{}]", status, hex::encode(self.payload())),
            None => write!(f, "EMPTY"),
        }
    }
}

impl Response {
    pub fn from_raw(raw: Vec<u8>) -> Self {
        Response(raw)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn status(&self) -> Option<u8> {
        self.0.first().copied()
    }

    pub fn payload(&self) -> &[u8] {
        self.0.get(1..).unwrap_or_default()
    }
}

/// Check that the first received byte is the `expected` acknowledgement.
pub fn decode_ack(expected: u8, received: &[u8]) -> std::result::Result<(), ProtocolError> {
    match received.first() {
        Some(&b) if b == expected => Ok(()),
        other => Err(ProtocolError::UnexpectedAck {
            opcode: expected & !commands::ACK_BIT,
            expected,
            received: other.copied(),
        }),
    }
}

/// Result of one read command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Payload following the status byte. Shorter than requested if the
    /// bridge stopped sending early.
    Chunk { status: u8, data: Vec<u8> },
    /// The bridge sent at most the status byte: nothing readable here.
    EndOfRange,
}

impl ReadOutcome {
    pub fn from_response(resp: Response) -> Self {
        if resp.len() <= 1 {
            return ReadOutcome::EndOfRange;
        }
        let mut raw = resp.0;
        let status = raw.remove(0);
        ReadOutcome::Chunk { status, data: raw }
    }
}
