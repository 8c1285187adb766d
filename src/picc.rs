// Tag-facing wire constants.
//
// NTAG21x data sheet, section 9: command set.
// NFC Digital Protocol spec, section 4: SDD framing, cascade levels.

use crate::crc::Crc16;

#[derive(Clone, Copy)]
pub enum PiccCommand {
    /// REQA wake-up, transmitted as a 7-bit short frame.
    ReqA = 0x26,
    /// Anti-collision/select, cascade level 1.
    SelCl1 = 0x93,
    /// Anti-collision/select, cascade level 2.
    SelCl2 = 0x95,
    /// Read four pages (16 bytes).
    Read = 0x30,
    /// Write one page (4 bytes).
    Write = 0xA2,
    /// Product information, used for tag-kind detection.
    GetVersion = 0x60,
    /// Password authentication.
    PwdAuth = 0x1B,
}

impl From<PiccCommand> for u8 {
    fn from(command: PiccCommand) -> u8 {
        command as u8
    }
}

/// REQA is a short frame: 7 bits, no trailer.
pub const REQA_BITS: usize = 7;

/// NVB byte requesting the full 5-byte SDD response.
pub const SDD_REQ: u8 = 0x20;
/// NVB byte for a full select (all 40 NFCID bits known).
pub const SEL_REQ: u8 = 0x70;

/// First SDD byte at cascade level 1 when another level follows.
pub const CASCADE_TAG: u8 = 0x88;
/// SAK bit indicating the NFCID is not complete yet.
pub const SAK_CASCADE_BIT: u8 = 0x04;

// NTAG21x data sheet, section 9.3: 4-bit ACK/NAK responses.
pub const ACKNAK_BITS: usize = 4;
pub const ACKNAK_MASK: u8 = 0xF;
pub const ACK: u8 = 0xA;

/// GET_VERSION response offset holding the storage size byte.
pub const VERSION_STORAGE_SIZE_BYTE: usize = 6;
pub const STORAGE_SIZE_213: u8 = 0x0F;
pub const STORAGE_SIZE_215: u8 = 0x11;
pub const STORAGE_SIZE_216: u8 = 0x13;

/// A tag-facing frame under construction. Produces the identical wire
/// layout the commands are specified with, while keeping the opcode,
/// fields, and CRC_A trailer from drifting apart by hand-counted offsets.
pub struct Frame {
    buffer: Vec<u8>,
}

impl Frame {
    pub fn new(command: PiccCommand) -> Frame {
        Frame {
            buffer: vec![command.into()],
        }
    }

    pub fn byte(mut self, value: u8) -> Frame {
        self.buffer.push(value);
        self
    }

    pub fn bytes(mut self, values: &[u8]) -> Frame {
        self.buffer.extend_from_slice(values);
        self
    }

    /// Finish without a trailer. SDD requests carry no end-of-data
    /// checksum (NFC Digital Protocol section 4.5).
    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }

    /// Append the CRC_A trailer over everything pushed so far.
    pub fn finish_with_crc(mut self, crc: &Crc16) -> Vec<u8> {
        let trailer = crc.compute(&self.buffer);
        self.buffer.extend_from_slice(&trailer);
        self.buffer
    }
}
