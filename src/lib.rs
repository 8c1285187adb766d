mod cancellation_token;
mod crc;
mod hal;
mod log_macros;
mod mfrc522;
#[cfg(test)]
mod mock;
mod ntag;
mod picc;
mod register;

pub use crate::crc::Crc16;
pub use crate::hal::{Hal, RppalHal, RppalHalError};
pub use crate::mfrc522::{Error, Mfrc522, MAX_ANTENNA_GAIN};
pub use crate::ntag::{
    NakCode, ProtectMode, Tag, TagKind, NFCID_LEN, PACK_LEN, PWD_LEN, READ_LEN, WRITE_LEN,
};

use cancellation_token::CancellationToken;
use clap::{Parser, ValueEnum};
use core::fmt::Arguments;
use rppal::gpio::Gpio;
use std::{thread, time};

pub trait RppalNtag21xLog {
    fn output(self: &Self, args: Arguments);
    fn warning(self: &Self, args: Arguments);
    fn error(self: &Self, args: Arguments);
}

pub struct RppalNtag21xTool<'a> {
    log: &'a dyn RppalNtag21xLog,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
#[repr(u8)]
enum BcmPin {
    Pin1 = 1,
    Pin2,
    Pin3,
    Pin4,
    Pin5,
    Pin6,
    Pin7,
    Pin8,
    Pin9,
    Pin10,
    Pin11,
    Pin12,
    Pin13,
    Pin14,
    Pin15,
    Pin16,
    Pin17,
    Pin18,
    Pin19,
    Pin20,
    Pin21,
    Pin22,
    Pin23,
    Pin24,
    Pin25,
    Pin26,
    Pin27,
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// Disable colors in output
    #[arg(long = "no-color", short = 'n', env = "NO_CLI_COLOR")]
    no_color: bool,
    /// Auxiliary BCM pins to drive high before touching the reader
    #[arg(long = "high", short = '1')]
    high_pins: Vec<BcmPin>,
    /// Auxiliary BCM pins to drive low before touching the reader
    #[arg(long = "low", short = '0')]
    low_pins: Vec<BcmPin>,
    /// BCM pin wired to the reader's RST line
    #[arg(long = "reset", short = 'r')]
    reset_pin: BcmPin,
    /// Receiver gain, 0 to 7 (MFRC522 section 9.3.3.6)
    #[arg(long = "gain", short = 'g', default_value_t = 4, value_parser = clap::value_parser!(u8).range(0..=7))]
    antenna_gain: u8,
    /// SPI clock speed in Hz
    #[arg(long = "speed", short = 's', default_value_t = 1_000_000)]
    bus_speed: u32,
    /// Dump four pages starting here whenever a tag is found
    #[arg(long = "dump", short = 'd')]
    dump_page: Option<u8>,
}

impl<'a> RppalNtag21xTool<'a> {
    pub fn new(log: &'a dyn RppalNtag21xLog) -> RppalNtag21xTool<'a> {
        RppalNtag21xTool { log }
    }

    pub fn run(
        self: &mut Self,
        args: impl IntoIterator<Item = std::ffi::OsString>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let cli = match Cli::try_parse_from(args) {
            Ok(m) => m,
            Err(err) => {
                output!(self.log, "{}", err.to_string());
                return Ok(());
            }
        };

        // Some reader boards need neighboring lines biased before power-up
        for bcm_pin in cli.low_pins {
            let mut pin = Gpio::new()?.get(bcm_pin as u8)?.into_output();

            pin.set_reset_on_drop(false);
            pin.set_low();
        }

        for bcm_pin in cli.high_pins {
            let mut pin = Gpio::new()?.get(bcm_pin as u8)?.into_output();

            pin.set_reset_on_drop(false);
            pin.set_high();
        }

        let hal = RppalHal::open(cli.bus_speed, cli.reset_pin as u8)?;
        let mut reader = Mfrc522::new(hal, cli.antenna_gain)?;

        output!(self.log, "Reader version: {:#04x}", reader.version());

        let token = CancellationToken::new();
        let token_clone = token.clone();

        ctrlc::set_handler(move || {
            eprintln!("Ctrl+C received, stopping...");
            token_clone.cancel();
        })?;

        while !token.is_canceled() {
            match reader.try_select() {
                Ok(true) => {
                    if let Some(tag) = reader.tag() {
                        let nfcid = tag
                            .nfcid
                            .iter()
                            .map(|byte| format!("{byte:02X}"))
                            .collect::<Vec<_>>()
                            .join(":");

                        output!(self.log, "{} {}", tag.kind, nfcid);
                    }

                    if let Some(start_page) = cli.dump_page {
                        match reader.read(start_page) {
                            Ok(data) => {
                                for (offset, page) in data.chunks(4).enumerate() {
                                    output!(
                                        self.log,
                                        "Page {:#04x}: {:02x?}",
                                        start_page as usize + offset,
                                        page
                                    );
                                }
                            }
                            Err(err) => warning!(self.log, "{}", err),
                        }
                    }
                }
                Ok(false) => (),
                Err(err) => warning!(self.log, "{}", err),
            };

            thread::sleep(time::Duration::from_millis(500));
        }

        Ok(())
    }
}
