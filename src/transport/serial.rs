//! Serial Transportation.
use std::{
    io::{self, Read, Write},
    thread::sleep,
    time::Duration,
};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::Transport;
use crate::config::LinkConfig;
use crate::error::{Error, LinkError, Result};

pub struct SerialTransport {
    serial_port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(config: &LinkConfig) -> Result<Self> {
        let port = config
            .port
            .as_deref()
            .ok_or_else(|| Error::Config("no serial port given".to_string()))?;

        log::info!("Opening serial port: \"{}\" @ {} baud", port, config.baudrate);
        let serial_port = serialport::new(port, config.baudrate)
            .timeout(Duration::from_millis(config.timeout_ms))
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|source| LinkError::Open {
                port: port.to_string(),
                source,
            })?;

        // Opening the port toggles DTR, which reboots an Arduino-based bridge
        if config.settle_ms > 0 {
            log::debug!("Waiting {}ms for the bridge to boot", config.settle_ms);
            sleep(Duration::from_millis(config.settle_ms));
        }

        let mut transport = SerialTransport { serial_port };
        transport.discard()?;
        Ok(transport)
    }
}

impl Transport for SerialTransport {
    fn send_raw(&mut self, raw: &[u8]) -> std::result::Result<(), LinkError> {
        self.serial_port.write_all(raw)?;
        self.serial_port.flush()?;
        Ok(())
    }

    fn recv_raw(&mut self, max: usize) -> std::result::Result<Vec<u8>, LinkError> {
        let mut buf = vec![0u8; max];
        let mut filled = 0;
        while filled < max {
            match self.serial_port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn discard(&mut self) -> std::result::Result<(), LinkError> {
        self.serial_port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}
