//! Register-level chip model for the test suites. Replays a script of tag
//! exchanges, injects device and transport failures, and captures every
//! frame the driver pushes through the FIFO.

use crate::crc::Crc16;
use crate::hal::Hal;
use crate::register::{Command, Register};
use std::collections::VecDeque;
use thiserror::Error;

/// One scripted tag exchange, consumed when the driver issues Transceive.
pub enum Exchange {
    /// The tag answered with `bytes`, of which `bits` are valid.
    Reply { bytes: Vec<u8>, bits: usize },
    /// The chip timer expired: nothing in the field answered.
    Timeout,
    /// No interrupt at all; the driver's poll budget runs out.
    Silent,
    /// The chip error register reports these raw bits.
    DeviceError(u8),
}

#[derive(Debug, Error)]
#[error("mock bus failure")]
pub struct MockHalError;

pub struct MockHal {
    /// Value of the version register; zero simulates a dead chip.
    pub version: u8,
    /// Fail every bus operation from the nth one on.
    pub fail_after: Option<usize>,
    /// Frames the driver loaded into the FIFO, one per transceive.
    pub frames: Vec<Vec<u8>>,
    /// Every register write as (register, value).
    pub register_writes: Vec<(u8, u8)>,
    /// Levels driven onto the reset line, in order.
    pub reset_levels: Vec<bool>,
    script: VecDeque<Exchange>,
    current: Option<Exchange>,
    fifo: VecDeque<u8>,
    pending_tx: Vec<u8>,
    ops: usize,
}

impl MockHal {
    pub fn new() -> MockHal {
        MockHal {
            version: 0x92,
            fail_after: None,
            frames: Vec::new(),
            register_writes: Vec::new(),
            reset_levels: Vec::new(),
            script: VecDeque::new(),
            current: None,
            fifo: VecDeque::new(),
            pending_tx: Vec::new(),
            ops: 0,
        }
    }

    pub fn script(&mut self, exchange: Exchange) {
        self.script.push_back(exchange);
    }

    fn check_budget(&mut self) -> Result<(), MockHalError> {
        if let Some(limit) = self.fail_after {
            if self.ops >= limit {
                return Err(MockHalError);
            }
        }

        self.ops += 1;
        Ok(())
    }

    fn write_register(&mut self, address: u8, value: u8) {
        let reg = address >> 1;
        self.register_writes.push((reg, value));

        if reg == Register::FIFODataReg as u8 {
            self.pending_tx.push(value);
        } else if reg == Register::FIFOLevelReg as u8 && value & 0x80 != 0 {
            self.fifo.clear();
            self.pending_tx.clear();
        } else if reg == Register::CommandReg as u8 && value == Command::Transceive as u8 {
            self.frames.push(std::mem::take(&mut self.pending_tx));
            self.current = self.script.pop_front();

            if let Some(Exchange::Reply { bytes, .. }) = &self.current {
                self.fifo = bytes.iter().copied().collect();
            }
        }
    }

    fn read_register(&mut self, address: u8) -> u8 {
        let reg = (address & 0x7F) >> 1;

        if reg == Register::VersionReg as u8 {
            self.version
        } else if reg == Register::ComIrqReg as u8 {
            match &self.current {
                Some(Exchange::Reply { .. }) => 0x20,
                Some(Exchange::Timeout) => 0x01,
                Some(Exchange::DeviceError(_)) => 0x10,
                Some(Exchange::Silent) | None => 0x00,
            }
        } else if reg == Register::ErrorReg as u8 {
            match &self.current {
                Some(Exchange::DeviceError(bits)) => *bits,
                _ => 0,
            }
        } else if reg == Register::FIFOLevelReg as u8 {
            self.fifo.len() as u8
        } else if reg == Register::ControlReg as u8 {
            match &self.current {
                Some(Exchange::Reply { bits, .. }) => (bits % 8) as u8,
                _ => 0,
            }
        } else if reg == Register::FIFODataReg as u8 {
            self.fifo.pop_front().unwrap_or(0)
        } else {
            0
        }
    }
}

impl Hal for MockHal {
    type Error = MockHalError;

    fn transfer(&mut self, tx: &[u8]) -> Result<(), MockHalError> {
        self.check_budget()?;

        if let [address, value] = tx {
            self.write_register(*address, *value);
        }

        Ok(())
    }

    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), MockHalError> {
        self.check_budget()?;

        if tx.len() == 2 && tx[0] & 0x80 != 0 {
            rx[1] = self.read_register(tx[0]);
        }

        Ok(())
    }

    fn set_reset(&mut self, high: bool) -> Result<(), MockHalError> {
        self.reset_levels.push(high);
        Ok(())
    }

    fn delay_us(&mut self, _micros: u64) {}
}

// Canned responses for a well-behaved NTAG21x with NFCID
// 04 E1 5C F2 01 57 68.

pub fn atqa() -> Exchange {
    Exchange::Reply {
        bytes: vec![0x44, 0x00],
        bits: 16,
    }
}

pub fn sdd_res_cl1() -> Exchange {
    // cascade tag, NFCID0..2, BCC
    Exchange::Reply {
        bytes: vec![0x88, 0x04, 0xE1, 0x5C, 0x88 ^ 0x04 ^ 0xE1 ^ 0x5C],
        bits: 40,
    }
}

pub fn sdd_res_cl2() -> Exchange {
    // NFCID3..6, BCC
    Exchange::Reply {
        bytes: vec![0xF2, 0x01, 0x57, 0x68, 0xF2 ^ 0x01 ^ 0x57 ^ 0x68],
        bits: 40,
    }
}

pub fn sel_res(sak: u8) -> Exchange {
    data_reply(&[sak])
}

pub fn ack() -> Exchange {
    Exchange::Reply {
        bytes: vec![0x0A],
        bits: 4,
    }
}

pub fn nak(code: u8) -> Exchange {
    Exchange::Reply {
        bytes: vec![code],
        bits: 4,
    }
}

/// A payload with its CRC_A trailer, all bits valid.
pub fn data_reply(data: &[u8]) -> Exchange {
    let crc = Crc16::new();
    let mut bytes = data.to_vec();
    bytes.extend_from_slice(&crc.compute(data));

    Exchange::Reply {
        bits: bytes.len() * 8,
        bytes,
    }
}

fn version_res(storage_size: u8) -> Exchange {
    // vendor NXP, NTAG type, storage size at offset 6
    data_reply(&[0x00, 0x04, 0x04, 0x02, 0x01, 0x00, storage_size, 0x03])
}

/// Queue the full happy-path select conversation; returns the NFCID the
/// driver should report.
pub fn script_select(hal: &mut MockHal, storage_size: u8) -> [u8; 7] {
    hal.script(atqa());
    hal.script(sdd_res_cl1());
    hal.script(sel_res(0x04));
    hal.script(sdd_res_cl2());
    hal.script(sel_res(0x00));
    hal.script(version_res(storage_size));

    [0x04, 0xE1, 0x5C, 0xF2, 0x01, 0x57, 0x68]
}
