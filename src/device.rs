//! Identity of the MCU attached behind the bridge.
use crate::error::{Error, Result};

/// Device id and revision, as reported by the C2 device-info command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub id: u8,
    pub revision: u8,
}

impl ::std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        write!(f, "0x{:02x}(rev 0x{:02x})", self.id, self.revision)
    }
}

impl DeviceIdentity {
    pub(crate) fn from_payload(payload: &[u8]) -> Option<Self> {
        match payload {
            [id, revision, ..] => Some(DeviceIdentity {
                id: *id,
                revision: *revision,
            }),
            _ => None,
        }
    }

    /// Gate a session on the attached hardware. Only the device id is
    /// compared; any revision is accepted.
    pub fn ensure_matches(&self, expected_id: u8) -> Result<()> {
        if self.id != expected_id {
            return Err(Error::IdentityMismatch {
                expected: expected_id,
                found: *self,
            });
        }
        Ok(())
    }
}
