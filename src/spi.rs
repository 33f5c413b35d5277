//! [`FlashBus`] over an embedded-hal blocking SPI bus and a GPIO chip select.

use core::fmt::Debug;

use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;

use crate::FlashBus;

/// Filler byte clocked out while receiving
pub const DUMMY_BYTE: u8 = 0x00;

/// SPI bus with a manually driven, active low chip select.
///
/// The SPI peripheral must not toggle its own chip select, otherwise frames
/// split across `transmit` and `receive` are broken up on the wire.
pub struct SpiBus<SPI, CS> {
    spi: SPI,
    cs: CS,
}

impl<SPI, CS> SpiBus<SPI, CS>
where
    CS: OutputPin,
    CS::Error: Debug,
{
    /// Wrap an SPI bus and chip select pin, leaving the chip deselected
    pub fn new(spi: SPI, cs: CS) -> Self {
        let mut s = Self { spi, cs };
        s.deselect_pin();
        s
    }

    /// Release the SPI bus and chip select pin
    pub fn free(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    fn deselect_pin(&mut self) {
        if let Err(e) = self.cs.set_high() {
            warn!("Failed to deassert chip select: {:?}", e);
        }
    }
}

impl<SPI, CS, E> FlashBus<E> for SpiBus<SPI, CS>
where
    SPI: Write<u8, Error = E> + Transfer<u8, Error = E>,
    CS: OutputPin,
    CS::Error: Debug,
{
    fn select(&mut self) {
        if let Err(e) = self.cs.set_low() {
            warn!("Failed to assert chip select: {:?}", e);
        }
    }

    fn deselect(&mut self) {
        self.deselect_pin()
    }

    fn transmit(&mut self, data: &[u8]) -> Result<(), E> {
        trace!("Tx: {:02x?}", data);
        self.spi.write(data)
    }

    fn receive(&mut self, buff: &mut [u8]) -> Result<(), E> {
        for b in buff.iter_mut() {
            *b = DUMMY_BYTE;
        }
        self.spi.transfer(buff)?;
        trace!("Rx: {} bytes", buff.len());
        Ok(())
    }
}
