//! C2 bridge programming protocol implementation.

pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod format;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod verify;

pub use self::config::{Config, LinkConfig, ProtocolConfig};
pub use self::device::DeviceIdentity;
pub use self::error::{Error, Result};
pub use self::format::FirmwareRecord;
pub use self::protocol::{Command, ReadOutcome, Response};
pub use self::session::{DeviceSession, SessionState};
pub use self::transport::Transport;
