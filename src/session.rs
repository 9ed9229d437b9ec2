//! Programming session logic.

use crate::config::{ProtocolConfig, check_read_range};
use crate::constants::{commands, records};
use crate::device::DeviceIdentity;
use crate::error::{Error, LinkError, ProtocolError, Result};
use crate::format::{FirmwareRecord, encode_line};
use crate::protocol::{Command, ReadOutcome, Response, decode_ack, write_checksum};
use crate::transport::Transport;
use crate::verify::ensure_verified;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connected,
    Identified,
    /// Code flash erased, ready for writes.
    Erased,
    Writing,
    /// Reset sent; the bridge is back in its idle state.
    Reset,
    /// A fatal error happened. Only `reset` is allowed.
    Failed,
}

/// Counters of a completed write pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub records_written: usize,
    pub records_skipped: usize,
    pub bytes_written: usize,
}

pub struct DeviceSession<T: Transport> {
    transport: T,
    config: ProtocolConfig,
    state: SessionState,
    identity: Option<DeviceIdentity>,
}

impl<T: Transport> DeviceSession<T> {
    pub fn new(transport: T, config: ProtocolConfig) -> Result<Self> {
        config.validate()?;
        Ok(DeviceSession {
            transport,
            config,
            state: SessionState::Disconnected,
            identity: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.identity
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Probe the bridge. Only a failure changes the session state.
    pub fn ping(&mut self) -> Result<()> {
        if self.state == SessionState::Failed {
            return Err(Error::InvalidState {
                operation: "ping",
                state: self.state,
            });
        }
        let r = self.command(Command::ping());
        self.guard(r)?;
        log::info!("Bridge is alive");
        Ok(())
    }

    /// Put the target into programming mode. A failure here means the
    /// bridge is wedged and has to be power-cycled.
    pub fn connect(&mut self) -> Result<()> {
        self.ensure_state(
            "connect",
            &[SessionState::Disconnected, SessionState::Reset],
        )?;
        let r = self.command(Command::connect());
        if let Err(e) = &r {
            log::error!("Could not establish connection - try resetting the bridge: {}", e);
        }
        self.guard(r)?;

        self.state = SessionState::Connected;
        log::info!("Connected to interface");
        Ok(())
    }

    /// Read id and revision, and stop the session unless the id is the
    /// configured one.
    pub fn identify(&mut self) -> Result<DeviceIdentity> {
        self.ensure_state("identify", &[SessionState::Connected, SessionState::Identified])?;
        let r = self.command(Command::device_info()).and_then(|resp| {
            DeviceIdentity::from_payload(resp.payload()).ok_or_else(|| {
                ProtocolError::ShortResponse {
                    opcode: commands::DEVICE_INFO,
                    expected: 2,
                    actual: resp.payload().len(),
                }
                .into()
            })
        });
        let identity = self.guard(r)?;
        log::info!("Device:   0x{:02x}", identity.id);
        log::info!("Revision: 0x{:02x}", identity.revision);
        self.identity = Some(identity);

        let r = identity.ensure_matches(self.config.expected_device_id);
        if r.is_err() {
            log::error!("Correct device not detected, check the wiring to the target");
        }
        self.guard(r)?;

        self.state = SessionState::Identified;
        Ok(identity)
    }

    /// Issue one read command. A response of at most the status byte is
    /// reported as `EndOfRange`, not as an error.
    pub fn read_chunk(&mut self, address: u32, len: u8) -> Result<ReadOutcome> {
        self.ensure_state(
            "read",
            &[SessionState::Identified, SessionState::Erased, SessionState::Writing],
        )?;
        let r = self.transport.transfer(Command::read(address, len));
        let outcome = ReadOutcome::from_response(self.guard(r)?);
        if let ReadOutcome::Chunk { status, data } = &outcome {
            log::trace!(
                "read 0x{:06x}: status 0x{:02x}, {} bytes",
                address,
                status,
                data.len()
            );
        }
        Ok(outcome)
    }

    /// Lazily read `[start, start + total_size)` in `chunk_size` strides.
    /// The caller appends the end-of-file record.
    pub fn read_all(
        &mut self,
        start: u32,
        total_size: u32,
        chunk_size: u8,
    ) -> Result<ReadRecords<'_, T>> {
        self.ensure_state(
            "read",
            &[SessionState::Identified, SessionState::Erased, SessionState::Writing],
        )?;
        check_read_range(start, total_size)?;
        if chunk_size == 0 {
            return Err(Error::Config("chunk size must not be zero".to_string()));
        }
        Ok(ReadRecords {
            session: self,
            next: start,
            end: start + total_size,
            chunk_size,
            done: false,
        })
    }

    /// `read_all` over the configured range and chunk size.
    pub fn read_configured(&mut self) -> Result<ReadRecords<'_, T>> {
        let ProtocolConfig {
            read_start,
            read_size,
            chunk_size,
            ..
        } = self.config;
        self.read_all(read_start, read_size, chunk_size)
    }

    pub fn erase_all(&mut self) -> Result<()> {
        self.ensure_state("erase", &[SessionState::Identified])?;
        let r = self.command(Command::erase());
        self.guard(r)?;

        self.state = SessionState::Erased;
        log::info!("Device erased");
        Ok(())
    }

    /// Program one record and verify it by reading it back.
    /// Returns `false` for records that are not programmed.
    pub fn write_record(&mut self, record: &FirmwareRecord) -> Result<bool> {
        self.ensure_state("write", &[SessionState::Erased, SessionState::Writing])?;
        if !record.is_data() {
            log::debug!("Skipping record of type 0x{:02x}", record.record_type);
            return Ok(false);
        }
        if record.data.is_empty() {
            log::debug!("Skipping empty data record at 0x{:04x}", record.address);
            return Ok(false);
        }
        self.state = SessionState::Writing;

        let r = self.write_and_verify(record);
        self.guard(r)?;
        Ok(true)
    }

    fn write_and_verify(&mut self, record: &FirmwareRecord) -> Result<()> {
        let expected = record.to_line()?;
        let (hi, lo) = record.address_bytes();
        log::info!(
            "0x{:04X}, Bytes: {:02X}, Data: {}",
            record.address,
            record.data.len(),
            hex::encode(&record.data)
        );

        let checksum = write_checksum(hi, lo, &record.data);
        let r = self.command(Command::write(hi, lo, record.data.clone(), checksum));
        if let Err(Error::Protocol(ProtocolError::UnexpectedAck {
            received: Some(commands::WRITE_CHECKSUM_NAK),
            ..
        })) = &r
        {
            log::error!("Bridge rejected the checksum of record at 0x{:04X}", record.address);
        }
        r?;

        let len = record.data.len() as u8;
        let actual = match self.read_chunk(record.address as u32, len)? {
            ReadOutcome::Chunk { data, .. } => encode_line(len, record.address, records::DATA, &data)?,
            ReadOutcome::EndOfRange => String::new(),
        };
        ensure_verified(record.address, &expected, &actual).inspect_err(|_| {
            log::error!("Response at address 0x{:04X} did not match", record.address);
        })
    }

    /// Program every data record in order, stopping at the first failure.
    pub fn write_all<'r, I>(&mut self, records: I) -> Result<WriteSummary>
    where
        I: IntoIterator<Item = &'r FirmwareRecord>,
    {
        self.write_all_with(records, |_| ())
    }

    /// `write_all`, calling `on_record` after each record is handled.
    pub fn write_all_with<'r, I, F>(&mut self, records: I, mut on_record: F) -> Result<WriteSummary>
    where
        I: IntoIterator<Item = &'r FirmwareRecord>,
        F: FnMut(&FirmwareRecord),
    {
        let mut summary = WriteSummary::default();
        for record in records {
            if self.write_record(record)? {
                summary.records_written += 1;
                summary.bytes_written += record.data.len();
            } else {
                summary.records_skipped += 1;
            }
            on_record(record);
        }
        log::info!(
            "Wrote {} records ({} bytes), skipped {}",
            summary.records_written,
            summary.bytes_written,
            summary.records_skipped
        );
        Ok(summary)
    }

    /// Leave programming mode. Allowed in every state; after a failure the
    /// pending input is dropped first.
    pub fn reset(&mut self) -> Result<()> {
        if self.state == SessionState::Failed {
            if let Err(e) = self.transport.discard() {
                log::warn!("Failed to discard pending input: {}", e);
            }
        }
        let r = self.command(Command::reset());
        self.guard(r)?;

        self.state = SessionState::Reset;
        log::info!("Device reset");
        Ok(())
    }

    /// Always attempt a reset, then return `result`. A reset failure only
    /// surfaces if `result` was a success.
    pub fn finish<R>(mut self, result: Result<R>) -> Result<R> {
        let reset = self.reset();
        match (result, reset) {
            (Err(e), Err(reset_err)) => {
                log::warn!("Reset after failure also failed: {}", reset_err);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(v), Ok(())) => Ok(v),
        }
    }

    /// Give up on the session mid-flight: drop pending input and mark the
    /// session unusable.
    pub fn abort(&mut self) {
        if let Err(e) = self.transport.discard() {
            log::warn!("Failed to discard pending input: {}", e);
        }
        self.state = SessionState::Failed;
    }

    /// Send a command that answers with its ack and a fixed-size payload.
    fn command(&mut self, cmd: Command) -> Result<Response> {
        let opcode = cmd.opcode();
        let ack = cmd.ack();
        let payload_len = cmd.response_payload_len();

        let resp = self.transport.transfer(cmd)?;
        if resp.is_empty() {
            return Err(LinkError::Timeout { opcode }.into());
        }
        decode_ack(ack, resp.as_bytes())?;
        if resp.payload().len() < payload_len {
            return Err(ProtocolError::ShortResponse {
                opcode,
                expected: payload_len,
                actual: resp.payload().len(),
            }
            .into());
        }
        Ok(resp)
    }

    fn ensure_state(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        if !allowed.contains(&self.state) {
            return Err(Error::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn guard<R>(&mut self, r: Result<R>) -> Result<R> {
        if let Err(e) = &r {
            if e.is_fatal() {
                self.state = SessionState::Failed;
            }
        }
        r
    }
}

/// Records produced by [`DeviceSession::read_all`]. Stops at the end of the
/// range, at the first short chunk, or after the first error.
pub struct ReadRecords<'a, T: Transport> {
    session: &'a mut DeviceSession<T>,
    next: u32,
    end: u32,
    chunk_size: u8,
    done: bool,
}

impl<T: Transport> Iterator for ReadRecords<'_, T> {
    type Item = Result<FirmwareRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.next >= self.end {
            return None;
        }
        let address = self.next;
        let len = (self.end - address).min(self.chunk_size as u32) as u8;

        match self.session.read_chunk(address, len) {
            Ok(ReadOutcome::Chunk { data, .. }) => {
                if data.len() < len as usize {
                    log::warn!(
                        "Short read at 0x{:04x}: {} of {} bytes, stopping",
                        address,
                        data.len(),
                        len
                    );
                    self.done = true;
                }
                self.next = address + len as u32;
                Some(Ok(FirmwareRecord::data(address as u16, data)))
            }
            Ok(ReadOutcome::EndOfRange) => {
                log::debug!("End of readable range at 0x{:04x}", address);
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<T: Transport> std::iter::FusedIterator for ReadRecords<'_, T> {}
