//! NTAG21x command layer on top of the transceive engine: wake-up and
//! two-level anti-collision selection, then the page commands.
//!
//! Data sheets/references:
//! NTAG21x: https://www.nxp.com/docs/en/data-sheet/NTAG213_215_216.pdf
//! NFC Digital Protocol: https://its-wiki.no/images/3/3b/NFC_forum_digital_protocol.pdf

use crate::{
    hal::Hal,
    mfrc522::{Error, Mfrc522},
    picc::{self, Frame, PiccCommand},
};
use std::fmt;

/// NTAG21x NFCIDs are double-size: 7 bytes over two cascade levels.
pub const NFCID_LEN: usize = 7;
/// A single READ returns four pages.
pub const READ_LEN: usize = 16;
/// A single WRITE covers one page.
pub const WRITE_LEN: usize = 4;
pub const PWD_LEN: usize = 4;
pub const PACK_LEN: usize = 2;

/// Tag family member, detected from the GET_VERSION storage size byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Ntag213,
    Ntag215,
    Ntag216,
}

impl TagKind {
    fn from_storage_size(byte: u8) -> Option<TagKind> {
        match byte {
            picc::STORAGE_SIZE_213 => Some(TagKind::Ntag213),
            picc::STORAGE_SIZE_215 => Some(TagKind::Ntag215),
            picc::STORAGE_SIZE_216 => Some(TagKind::Ntag216),
            _ => None,
        }
    }

    /// First page of the configuration block (CFG0); PWD, PACK, AUTH0 and
    /// ACCESS all live at fixed offsets from here (NTAG21x section 8.5).
    fn config_page(self) -> u8 {
        match self {
            TagKind::Ntag213 => 0x29,
            TagKind::Ntag215 => 0x83,
            TagKind::Ntag216 => 0xE3,
        }
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TagKind::Ntag213 => write!(f, "NTAG213"),
            TagKind::Ntag215 => write!(f, "NTAG215"),
            TagKind::Ntag216 => write!(f, "NTAG216"),
        }
    }
}

/// Identity of the currently selected tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub nfcid: [u8; NFCID_LEN],
    pub kind: TagKind,
}

/// NAK sub-codes (NTAG21x section 9.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NakCode {
    #[error("invalid command argument")]
    InvalidArgument,
    #[error("parity or CRC error")]
    CrcError,
    #[error("authentication counter overflow")]
    AuthCounterOverflow,
    #[error("write error")]
    WriteError,
    #[error("unspecified code {0:#03x}")]
    Other(u8),
}

impl From<u8> for NakCode {
    fn from(code: u8) -> NakCode {
        match code {
            0x0 => NakCode::InvalidArgument,
            0x1 => NakCode::CrcError,
            0x2 => NakCode::AuthCounterOverflow,
            0x3 => NakCode::WriteError,
            code => NakCode::Other(code),
        }
    }
}

/// What the PROT bit protects once a password is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectMode {
    /// Writes to the protected pages require authentication; reads stay open.
    WriteOnly,
    /// Reads and writes both require authentication.
    ReadWrite,
}

// A 4-bit response that is not the ACK code is an explicit rejection.
// Responses of any other length are judged by the command's own framing
// rules, so this is not an error for them.
fn check_nak<E>(rx: &[u8], rx_bits: usize) -> Result<(), Error<E>> {
    if rx_bits == picc::ACKNAK_BITS {
        let code = rx[0] & picc::ACKNAK_MASK;

        if code != picc::ACK {
            return Err(Error::TagNak(NakCode::from(code)));
        }
    }

    Ok(())
}

impl<H: Hal> Mfrc522<H> {
    /// Wake and select the tag in the field, detect its kind, and remember
    /// it as the session's selected tag. Any protocol violation along the
    /// way leaves no tag selected.
    pub fn select(&mut self) -> Result<Tag, Error<H::Error>> {
        self.tag = None;

        let (_, rx_bits) = self.transceive(&[PiccCommand::ReqA.into()], picc::REQA_BITS)?;

        // ATQA is 2 bytes; anything else did not wake as ISO14443A type A
        if rx_bits != 16 {
            return Err(Error::TagUnsupported);
        }

        let mut nfcid = [0u8; NFCID_LEN];

        for (level, selector) in [PiccCommand::SelCl1, PiccCommand::SelCl2]
            .into_iter()
            .enumerate()
        {
            // SDD_REQ carries no CRC trailer (NFC Digital Protocol 4.5)
            let tx = Frame::new(selector).byte(picc::SDD_REQ).finish();
            let (rx, rx_bits) = self.transceive(&tx, tx.len() * 8)?;

            // SDD_RES: 4 id bytes + BCC
            if rx_bits != 40 {
                return Err(Error::TagUnsupported);
            }
            if rx[0] ^ rx[1] ^ rx[2] ^ rx[3] != rx[4] {
                return Err(Error::TagUnsupported);
            }

            if level == 0 {
                // No cascade tag means a single-size NFCID, so not an
                // NTAG21x; probably a MIFARE Classic
                if rx[0] != picc::CASCADE_TAG {
                    return Err(Error::TagUnsupported);
                }
                nfcid[..3].copy_from_slice(&rx[1..4]);
            } else {
                nfcid[3..].copy_from_slice(&rx[..4]);
            }

            // Echo the SDD payload back as the select payload; the BCC is
            // computed the same way on both sides
            let tx = Frame::new(selector)
                .byte(picc::SEL_REQ)
                .bytes(&rx[..5])
                .finish_with_crc(&self.crc);
            let (rx, rx_bits) = self.transceive(&tx, tx.len() * 8)?;

            // SEL_RES: SAK + CRC_A
            if rx_bits != 24 {
                return Err(Error::TagUnsupported);
            }
            if !self.crc.verify(&rx[..1], &rx[1..3]) {
                return Err(Error::TagUnsupported);
            }

            let cascade = rx[0] & picc::SAK_CASCADE_BIT != 0;

            if level == 0 && !cascade {
                // NFCID complete after one level: a 4-byte id, not NTAG21x
                return Err(Error::TagUnsupported);
            }
            if level == 1 && cascade {
                // A third cascade level is not supported
                return Err(Error::TagUnsupported);
            }
        }

        let kind = self.detect_kind()?;
        let tag = Tag { nfcid, kind };

        self.tag = Some(tag);

        Ok(tag)
    }

    /// `select` with the two expected no-usable-tag outcomes collapsed to
    /// `Ok(false)`, for callers polling for tag presence. Transport, device,
    /// and NAK failures still propagate.
    pub fn try_select(&mut self) -> Result<bool, Error<H::Error>> {
        match self.select() {
            Ok(_) => Ok(true),
            Err(Error::TagMissing) | Err(Error::TagUnsupported) => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Read four pages (16 bytes) starting at `start_page`. Callers after a
    /// single page discard the other three.
    pub fn read(&mut self, start_page: u8) -> Result<[u8; READ_LEN], Error<H::Error>> {
        if self.tag.is_none() {
            return Err(Error::TagMissing);
        }

        let tx = Frame::new(PiccCommand::Read)
            .byte(start_page)
            .finish_with_crc(&self.crc);
        let (rx, rx_bits) = self.transceive(&tx, tx.len() * 8)?;

        check_nak(&rx, rx_bits)?;

        // 4 pages of data + CRC_A (section 10.2)
        if rx_bits != (READ_LEN + 2) * 8 {
            return Err(Error::TagUnsupported);
        }
        if !self.crc.verify(&rx[..READ_LEN], &rx[READ_LEN..]) {
            return Err(Error::TagUnsupported);
        }

        let mut pages = [0u8; READ_LEN];
        pages.copy_from_slice(&rx[..READ_LEN]);

        Ok(pages)
    }

    /// Write one 4-byte page.
    pub fn write(&mut self, page: u8, data: &[u8; WRITE_LEN]) -> Result<(), Error<H::Error>> {
        if self.tag.is_none() {
            return Err(Error::TagMissing);
        }

        let tx = Frame::new(PiccCommand::Write)
            .byte(page)
            .bytes(data)
            .finish_with_crc(&self.crc);
        let (rx, rx_bits) = self.transceive(&tx, tx.len() * 8)?;

        // The only valid response is the 4-bit ACK/NAK (section 10.4)
        if rx_bits != picc::ACKNAK_BITS {
            return Err(Error::TagUnsupported);
        }

        let code = rx[0] & picc::ACKNAK_MASK;
        if code != picc::ACK {
            return Err(Error::TagNak(NakCode::from(code)));
        }

        Ok(())
    }

    /// Password-authenticate and return the tag's PACK. Checking the PACK
    /// against an expected value is the caller's job; a mismatch there means
    /// the tag is not the one the password was provisioned for.
    pub fn authenticate(
        &mut self,
        password: &[u8; PWD_LEN],
    ) -> Result<[u8; PACK_LEN], Error<H::Error>> {
        if self.tag.is_none() {
            return Err(Error::TagMissing);
        }

        let tx = Frame::new(PiccCommand::PwdAuth)
            .bytes(password)
            .finish_with_crc(&self.crc);
        let (rx, rx_bits) = self.transceive(&tx, tx.len() * 8)?;

        check_nak(&rx, rx_bits)?;

        // PACK + CRC_A (section 10.7)
        if rx_bits != (PACK_LEN + 2) * 8 {
            return Err(Error::TagUnsupported);
        }
        if !self.crc.verify(&rx[..PACK_LEN], &rx[PACK_LEN..]) {
            return Err(Error::TagUnsupported);
        }

        Ok([rx[0], rx[1]])
    }

    /// Password-protect all pages from `start_page` up: provision the
    /// password and PACK, point AUTH0 at `start_page`, and set the PROT bit
    /// per `mode`.
    ///
    /// This is five tag commands with no rollback. A failure partway leaves
    /// the configuration partially rewritten (for example, the password
    /// updated but AUTH0 untouched); callers must treat that as a real
    /// outcome and re-run or repair.
    pub fn protect(
        &mut self,
        password: &[u8; PWD_LEN],
        pack: &[u8; PACK_LEN],
        start_page: u8,
        mode: ProtectMode,
    ) -> Result<(), Error<H::Error>> {
        let config_page = match self.tag {
            Some(tag) => tag.kind.config_page(),
            None => return Err(Error::TagUnsupported),
        };

        self.write(config_page + 2, password)?;

        // AUTH0, ACCESS and PACK share their pages with unrelated settings,
        // so fetch the whole configuration block and edit it in place
        let config = self.read(config_page)?;

        let mut auth0 = [config[0], config[1], config[2], config[3]];
        auth0[3] = start_page;
        self.write(config_page, &auth0)?;

        let mut pack_page = [config[12], config[13], config[14], config[15]];
        pack_page[..PACK_LEN].copy_from_slice(pack);
        self.write(config_page + 3, &pack_page)?;

        // PROT bit of ACCESS: 0 = writes need auth, 1 = reads and writes do
        let mut access = [config[4], config[5], config[6], config[7]];
        match mode {
            ProtectMode::ReadWrite => access[0] |= 0x80,
            ProtectMode::WriteOnly => access[0] &= 0x7F,
        }
        self.write(config_page + 1, &access)?;

        Ok(())
    }

    fn detect_kind(&mut self) -> Result<TagKind, Error<H::Error>> {
        // GET_VERSION returns 8 bytes of product info (section 10.1); the
        // storage size byte distinguishes the three family members
        let tx = Frame::new(PiccCommand::GetVersion).finish_with_crc(&self.crc);
        let (rx, rx_bits) = self.transceive(&tx, tx.len() * 8)?;

        check_nak(&rx, rx_bits)?;

        if rx_bits != 80 {
            return Err(Error::TagUnsupported);
        }
        if !self.crc.verify(&rx[..8], &rx[8..10]) {
            return Err(Error::TagUnsupported);
        }

        TagKind::from_storage_size(rx[picc::VERSION_STORAGE_SIZE_BYTE]).ok_or(Error::TagUnsupported)
    }
}
