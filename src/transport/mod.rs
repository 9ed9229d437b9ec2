//! Abstract bridge transport interface.
use crate::error::{LinkError, Result};
use crate::protocol::{Command, Response};

pub use self::serial::SerialTransport;

mod serial;

/// Abstraction of the byte link to the bridge.
/// A serial port in practice, an emulator in tests.
pub trait Transport {
    fn send_raw(&mut self, raw: &[u8]) -> std::result::Result<(), LinkError>;

    /// Read up to `max` bytes. Returns fewer, possibly none, once the link's
    /// read timeout elapses.
    fn recv_raw(&mut self, max: usize) -> std::result::Result<Vec<u8>, LinkError>;

    /// Drop any input still pending on the link.
    fn discard(&mut self) -> std::result::Result<(), LinkError> {
        Ok(())
    }

    /// One half-duplex exchange: the frame head, then its payload as a
    /// second write, then the whole response.
    fn transfer(&mut self, cmd: Command) -> Result<Response> {
        let expected = 1 + cmd.response_payload_len();
        let frame = cmd.into_frame()?;

        log::debug!("=> {}", hex::encode(frame.head()));
        self.send_raw(frame.head())?;
        if !frame.payload().is_empty() {
            log::debug!("=> {}", hex::encode(frame.payload()));
            self.send_raw(frame.payload())?;
        }

        let resp = self.recv_raw(expected)?;
        log::debug!("<= {}", hex::encode(&resp));
        Ok(Response::from_raw(resp))
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_raw(&mut self, raw: &[u8]) -> std::result::Result<(), LinkError> {
        (**self).send_raw(raw)
    }

    fn recv_raw(&mut self, max: usize) -> std::result::Result<Vec<u8>, LinkError> {
        (**self).recv_raw(max)
    }

    fn discard(&mut self) -> std::result::Result<(), LinkError> {
        (**self).discard()
    }
}
