//! In-memory C2 bridge used by the session tests.
#![allow(dead_code)]

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use c2flash::{Transport, error::LinkError};

pub const FLASH_SIZE: usize = 0x2000;

/// Emulates the bridge firmware: collects `opcode, len, len bytes` messages
/// and answers them the way the bridge does.
pub struct Bridge {
    pub flash: Vec<u8>,
    /// Reads at or above this address answer with the status byte only.
    pub readable: usize,
    pub device_id: u8,
    pub revision: u8,
    /// Flip the lowest bit of the first byte of every read.
    pub corrupt_reads: bool,
    /// Never answer anything.
    pub silent: bool,
    /// Ignore the checksum sent with writes and answer as if it failed.
    pub reject_writes: bool,
    /// Answer device-info with the ack and the id only.
    pub short_info: bool,

    /// Every `send_raw` call, as written.
    pub writes: Vec<Vec<u8>>,
    /// Every complete message the bridge has handled.
    pub messages: Vec<Vec<u8>>,

    pub(crate) rx: Vec<u8>,
    pub(crate) tx: VecDeque<u8>,
    pub(crate) discarded: usize,
}

impl Default for Bridge {
    fn default() -> Self {
        Bridge {
            flash: vec![0xFF; FLASH_SIZE],
            readable: FLASH_SIZE,
            device_id: 0x39,
            revision: 0x01,
            corrupt_reads: false,
            silent: false,
            reject_writes: false,
            short_info: false,
            writes: Vec::new(),
            messages: Vec::new(),
            rx: Vec::new(),
            tx: VecDeque::new(),
            discarded: 0,
        }
    }
}

impl Bridge {
    fn feed(&mut self, byte: u8) {
        self.rx.push(byte);
        if self.rx.len() >= 2 && self.rx.len() == 2 + self.rx[1] as usize {
            let message = std::mem::take(&mut self.rx);
            self.handle(&message);
            self.messages.push(message);
        }
    }

    fn handle(&mut self, m: &[u8]) {
        if self.silent {
            return;
        }
        match m[0] {
            0x00 => self.tx.push_back(0x80),
            0x01 => self.tx.push_back(0x81),
            0x02 => self.tx.push_back(0x82),
            0x03 => {
                let len = m[2] as usize;
                let address = ((m[4] as usize) << 8) | m[5] as usize;
                let data = &m[7..7 + len];
                let crc = data
                    .iter()
                    .fold(m[4].wrapping_add(m[5]), |acc, &b| acc.wrapping_add(b));
                if self.reject_writes || crc != m[6] {
                    self.tx.push_back(0x43);
                    return;
                }
                self.flash[address..address + len].copy_from_slice(data);
                self.tx.push_back(0x83);
            }
            0x04 => {
                self.flash.fill(0xFF);
                self.tx.push_back(0x84);
            }
            0x05 => {
                let count = m[2] as usize;
                let address = ((m[3] as usize) << 16) | ((m[4] as usize) << 8) | m[5] as usize;
                self.tx.push_back(0x85);
                if address >= self.readable {
                    return;
                }
                let end = (address + count).min(self.readable);
                let mut data = self.flash[address..end].to_vec();
                if self.corrupt_reads {
                    data[0] ^= 0x01;
                }
                self.tx.extend(data);
            }
            0x08 if self.short_info => self.tx.extend([0x88, self.device_id]),
            0x08 => self.tx.extend([0x88, self.device_id, self.revision]),
            _ => {}
        }
    }

    /// Write requests as `(address, data)`, in the order received.
    pub fn write_requests(&self) -> Vec<(u16, Vec<u8>)> {
        self.messages
            .iter()
            .filter(|m| m[0] == 0x03)
            .map(|m| {
                let len = m[2] as usize;
                (u16::from_be_bytes([m[4], m[5]]), m[7..7 + len].to_vec())
            })
            .collect()
    }

    pub fn opcodes(&self) -> Vec<u8> {
        self.messages.iter().map(|m| m[0]).collect()
    }

    pub fn discarded(&self) -> usize {
        self.discarded
    }
}

/// Shared handle so tests can inspect the bridge after the session is gone.
#[derive(Clone, Default)]
pub struct BridgeHandle(pub Rc<RefCell<Bridge>>);

impl BridgeHandle {
    pub fn new(bridge: Bridge) -> Self {
        BridgeHandle(Rc::new(RefCell::new(bridge)))
    }

    pub fn borrow(&self) -> std::cell::Ref<'_, Bridge> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> std::cell::RefMut<'_, Bridge> {
        self.0.borrow_mut()
    }
}

impl Transport for BridgeHandle {
    fn send_raw(&mut self, raw: &[u8]) -> Result<(), LinkError> {
        let mut bridge = self.0.borrow_mut();
        bridge.writes.push(raw.to_vec());
        for &b in raw {
            bridge.feed(b);
        }
        Ok(())
    }

    fn recv_raw(&mut self, max: usize) -> Result<Vec<u8>, LinkError> {
        let mut bridge = self.0.borrow_mut();
        let n = max.min(bridge.tx.len());
        Ok(bridge.tx.drain(..n).collect())
    }

    fn discard(&mut self) -> Result<(), LinkError> {
        let mut bridge = self.0.borrow_mut();
        let pending = bridge.tx.len();
        bridge.discarded += pending;
        bridge.tx.clear();
        Ok(())
    }
}
