use rppal::{
    gpio::{Gpio, OutputPin},
    spi::{Bus, Mode, SlaveSelect, Spi},
};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Host access consumed by the driver: raw bus transfers, the reset line,
/// and a microsecond delay. Everything above this trait is pure protocol,
/// so tests substitute a scripted implementation.
pub trait Hal {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Write-only bus transfer.
    fn transfer(&mut self, tx: &[u8]) -> Result<(), Self::Error>;

    /// Full-duplex bus transfer; fills `rx` while `tx` is shifted out.
    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error>;

    /// Drive the reset line high or low.
    fn set_reset(&mut self, high: bool) -> Result<(), Self::Error>;

    /// Block for at least `micros` microseconds.
    fn delay_us(&mut self, micros: u64);
}

#[derive(Debug, Error)]
pub enum RppalHalError {
    #[error("SPI bus failure: {0}")]
    Spi(#[from] rppal::spi::Error),
    #[error("GPIO failure: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

/// Production HAL on Raspberry Pi: SPI0/CE0 plus one GPIO line for RST.
/// Owns both; dropping it closes the bus and releases the pin, whatever
/// state initialization got to.
pub struct RppalHal {
    spi: Spi,
    reset_pin: OutputPin,
}

impl RppalHal {
    /// Open SPI0/CE0 at `bus_speed` Hz (SPI mode 0, per MFRC522 section
    /// 8.1.2) and claim `reset_pin` (BCM numbering) as an output.
    pub fn open(bus_speed: u32, reset_pin: u8) -> Result<RppalHal, RppalHalError> {
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, bus_speed, Mode::Mode0)?;
        let reset_pin = Gpio::new()?.get(reset_pin)?.into_output();

        Ok(RppalHal { spi, reset_pin })
    }
}

impl Hal for RppalHal {
    type Error = RppalHalError;

    fn transfer(&mut self, tx: &[u8]) -> Result<(), RppalHalError> {
        self.spi.write(tx)?;
        Ok(())
    }

    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), RppalHalError> {
        self.spi.transfer(rx, tx)?;
        Ok(())
    }

    fn set_reset(&mut self, high: bool) -> Result<(), RppalHalError> {
        if high {
            self.reset_pin.set_high();
        } else {
            self.reset_pin.set_low();
        }
        Ok(())
    }

    fn delay_us(&mut self, micros: u64) {
        thread::sleep(Duration::from_micros(micros));
    }
}
