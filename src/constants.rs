
/// Largest data record the bridge accepts: the write frame's length byte
/// carries `len + 5`.
pub const MAX_RECORD_LEN: usize = 250;

pub const DEFAULT_CHUNK_SIZE: u8 = 0x10;
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_SETTLE_MS: u64 = 2000;

pub const DEFAULT_DEVICE_ID: u8 = 0x39;
pub const DEFAULT_READ_START: u32 = 0x0000;
pub const DEFAULT_READ_SIZE: u32 = 0x1840;

/// Highest address the read command can carry (3 address bytes).
pub const MAX_ADDRESS: u32 = 0x00ff_ffff;

pub mod commands {
    pub const PING: u8 = 0x00;
    pub const CONNECT: u8 = 0x01;
    pub const RESET: u8 = 0x02;
    pub const WRITE: u8 = 0x03;
    pub const ERASE: u8 = 0x04;
    pub const READ: u8 = 0x05;
    pub const DEVICE_INFO: u8 = 0x08;

    /// Set on the opcode to form its acknowledgement.
    pub const ACK_BIT: u8 = 0x80;

    /// Sent by the bridge instead of the write ack when the frame checksum
    /// does not match the payload.
    pub const WRITE_CHECKSUM_NAK: u8 = 0x43;
}

pub mod records {
    pub const MARKER: char = ':';

    pub const DATA: u8 = 0x00;
    pub const END_OF_FILE: u8 = 0x01;
}
