// MFRC522 data sheet, section 9 - register addresses as used on the SPI
// address byte (shifted left by one there, msb selects read)

#[derive(Clone, Copy)]
pub enum Register {
    CommandReg = 0x01,
    ComIEnReg = 0x02,
    ComIrqReg = 0x04,
    ErrorReg = 0x06,
    FIFODataReg = 0x09,
    FIFOLevelReg = 0x0A,
    ControlReg = 0x0C,
    BitFramingReg = 0x0D,
    ModeReg = 0x11,
    TxControlReg = 0x14,
    TxASKReg = 0x15,
    RFCfgReg = 0x26,
    TModeReg = 0x2A,
    TPrescalerReg = 0x2B,
    TReloadRegHigh = 0x2C,
    TReloadRegLow = 0x2D,
    VersionReg = 0x37,
}

impl Register {
    /// SPI address byte for a register write (section 8.1.2.2).
    pub fn write_address(self) -> u8 {
        (self as u8) << 1
    }

    /// SPI address byte for a register read (section 8.1.2.1).
    pub fn read_address(self) -> u8 {
        ((self as u8) << 1) | 0x80
    }
}

// MFRC522 data sheet, section 10.3
#[derive(Clone, Copy)]
pub enum Command {
    Idle = 0x00,
    Transceive = 0x0C,
}

impl From<Command> for u8 {
    fn from(command: Command) -> u8 {
        command as u8
    }
}
