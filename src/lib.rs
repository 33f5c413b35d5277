//! W25Q64FV serial NOR flash command driver.
//!
//! Each public operation maps onto one instruction sequence of the chip,
//! holding chip select for exactly one frame at a time and releasing it on
//! every path, including transport errors.
//!
//! The driver performs no defensive validation unless [`Options::strict`] is
//! set. By default programming across a 256 byte page boundary wraps inside
//! the page on the chip, sector erase addresses are rounded down by the chip,
//! and resetting a busy device is silently ignored by it. These are caller
//! contracts.
//!
//! Busy waits are unbounded by default and can block forever if the chip
//! never reports idle (e.g. a hardware fault). Set
//! [`Options::max_busy_polls`] to bound them.

use core::fmt::Debug;
use core::marker::PhantomData;

#[macro_use]
extern crate log;

extern crate nb;

extern crate embedded_hal;
use embedded_hal::blocking::delay::DelayMs;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod protocol;
use protocol::*;

pub mod spi;
pub use spi::SpiBus;

/// Byte link capability consumed by the driver.
///
/// `select` and `deselect` drive the chip select line, bytes moved between
/// them form one frame.
pub trait FlashBus<E> {
    fn select(&mut self);
    fn deselect(&mut self);
    fn transmit(&mut self, data: &[u8]) -> Result<(), E>;
    fn receive(&mut self, buff: &mut [u8]) -> Result<(), E>;
}

impl<T, E> FlashBus<E> for &mut T
where
    T: FlashBus<E>,
{
    fn select(&mut self) {
        (**self).select()
    }
    fn deselect(&mut self) {
        (**self).deselect()
    }
    fn transmit(&mut self, data: &[u8]) -> Result<(), E> {
        (**self).transmit(data)
    }
    fn receive(&mut self, buff: &mut [u8]) -> Result<(), E> {
        (**self).receive(buff)
    }
}

/// BUSY state derived from status register 1
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BusyState {
    NotBusy,
    Busy,
    /// Masked BUSY bit outside {0, 1}, only possible on a transport fault
    Indeterminate,
}

impl BusyState {
    /// Decode the BUSY bit of a raw status register 1 value
    pub fn from_status(sr1: u8) -> Self {
        match sr1 & StatusRegister1::BUSY.bits() {
            0 => BusyState::NotBusy,
            1 => BusyState::Busy,
            _ => BusyState::Indeterminate,
        }
    }
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<E: Debug> {
    #[error("transport error: {0:?}")]
    Transport(E),

    #[error("indeterminate busy state")]
    IndeterminateBusy,

    #[error("device still busy after polling limit")]
    BusyTimeout,

    #[error("address 0x{0:08x} outside device")]
    AddressOutOfRange(u32),

    #[error("{len} bytes at 0x{address:06x} cross a page boundary")]
    PageBoundary { address: u32, len: usize },

    #[error("address 0x{0:06x} is not sector aligned")]
    Misaligned(u32),
}

impl<E: Debug> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Self::Transport(e)
    }
}

#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Delay between busy polls (0 to spin)
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0"))]
    pub poll_delay_ms: u32,

    /// Maximum status reads per busy wait, 0 fails without reading (unbounded if unset)
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub max_busy_polls: Option<u32>,

    /// Reject misaligned erases, page-crossing programs and out of range addresses
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub strict: bool,
}

/// Status reads left in one busy wait, `None` never runs out
#[derive(Clone, Copy, PartialEq, Debug)]
struct PollBudget(Option<u32>);

impl PollBudget {
    fn new(max: Option<u32>) -> Self {
        Self(max)
    }

    fn exhausted(&self) -> bool {
        self.0 == Some(0)
    }

    fn spend(&mut self) {
        if let Some(n) = self.0.as_mut() {
            *n = n.saturating_sub(1);
        }
    }
}

pub struct Flash<B, D, E> {
    options: Options,
    bus: B,
    delay: D,
    _err: PhantomData<E>,
}

impl<B, D, E> Flash<B, D, E>
where
    B: FlashBus<E>,
    D: DelayMs<u32>,
    E: Debug,
{
    /// Create a new driver instance
    pub fn new(bus: B, delay: D, options: Options) -> Self {
        Self {
            options,
            bus,
            delay,
            _err: PhantomData,
        }
    }

    /// Fetch the driver options
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Release the underlying bus and delay
    pub fn release(self) -> (B, D) {
        (self.bus, self.delay)
    }

    /// Set the write enable latch, waiting for the device to be idle first
    pub fn write_enable(&mut self) -> Result<(), Error<E>> {
        self.wait_idle()?;

        debug!("Write enable");
        self.command(Instruction::WriteEnable)
    }

    /// Clear the write enable latch, legal in any state
    pub fn write_disable(&mut self) -> Result<(), Error<E>> {
        debug!("Write disable");
        self.command(Instruction::WriteDisable)
    }

    /// Read the BUSY bit once, without waiting
    pub fn query_busy(&mut self) -> Result<BusyState, Error<E>> {
        let sr1 = self.read_register(Instruction::ReadStatusRegister1)?;

        // A single masked bit cannot take any other value
        let state = BusyState::from_status(sr1);
        if state == BusyState::Indeterminate {
            error!("Indeterminate busy state, status: 0x{:02x}", sr1);
        }
        debug_assert_ne!(state, BusyState::Indeterminate, "masked BUSY bit out of range");

        Ok(state)
    }

    /// Read both status registers as two separate frames
    pub fn read_status(&mut self) -> Result<StatusSnapshot, Error<E>> {
        let sr1 = self.read_register(Instruction::ReadStatusRegister1)?;
        let sr2 = self.read_register(Instruction::ReadStatusRegister2)?;

        trace!("Status: 0x{:02x} 0x{:02x}", sr1, sr2);

        Ok(StatusSnapshot { sr1, sr2 })
    }

    /// Single busy poll, `WouldBlock` while the device is busy
    pub fn poll_idle(&mut self) -> nb::Result<(), Error<E>> {
        match self.query_busy().map_err(nb::Error::Other)? {
            BusyState::NotBusy => Ok(()),
            BusyState::Busy => Err(nb::Error::WouldBlock),
            BusyState::Indeterminate => Err(nb::Error::Other(Error::IndeterminateBusy)),
        }
    }

    /// Block until the device reports idle
    pub fn wait_idle(&mut self) -> Result<(), Error<E>> {
        let mut budget = PollBudget::new(self.options.max_busy_polls);

        loop {
            if budget.exhausted() {
                error!("Device busy, polling limit reached");
                return Err(Error::BusyTimeout);
            }

            match self.poll_idle() {
                Ok(()) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) => (),
            }

            budget.spend();
            if budget.exhausted() {
                continue;
            }

            if self.options.poll_delay_ms > 0 {
                self.delay.delay_ms(self.options.poll_delay_ms);
            }
        }
    }

    /// Erase the 4KB sector containing `address`
    pub fn erase_sector(&mut self, address: u32) -> Result<(), Error<E>> {
        if self.options.strict {
            self.check_range(address, 0)?;
            if address % SECTOR_SIZE != 0 {
                return Err(Error::Misaligned(address));
            }
        }

        self.write_enable()?;
        self.wait_idle()?;

        debug!("Sector erase at 0x{:06x}", address);

        let frame = frame_address(Instruction::SectorErase, address);
        self.transaction(|bus| bus.transmit(&frame))
    }

    /// Erase the whole device.
    ///
    /// Returns as soon as the instruction is sent, use [`Self::wait_idle`]
    /// to await completion.
    pub fn erase_chip(&mut self) -> Result<(), Error<E>> {
        self.write_enable()?;
        self.wait_idle()?;

        debug!("Chip erase");
        self.command(Instruction::ChipErase)
    }

    /// Program `data` starting at `address` as one contiguous frame.
    ///
    /// The caller must keep `data` inside one 256 byte page.
    pub fn program_page(&mut self, address: u32, data: &[u8]) -> Result<(), Error<E>> {
        if self.options.strict {
            self.check_range(address, data.len())?;
            if !fits_in_page(address, data.len()) {
                return Err(Error::PageBoundary {
                    address,
                    len: data.len(),
                });
            }
        }

        self.write_enable()?;
        self.wait_idle()?;

        debug!("Page program {} bytes at 0x{:06x}", data.len(), address);

        let frame = frame_program(address, data);
        self.transaction(|bus| bus.transmit(&frame))
    }

    /// Read `buff.len()` bytes starting at `address`
    pub fn read(&mut self, address: u32, buff: &mut [u8]) -> Result<(), Error<E>> {
        if self.options.strict {
            self.check_range(address, buff.len())?;
        }

        self.wait_idle()?;

        debug!("Read {} bytes at 0x{:06x}", buff.len(), address);

        let header = frame_address(Instruction::ReadData, address);
        self.transaction(|bus| {
            bus.transmit(&header)?;
            bus.receive(buff)
        })
    }

    /// Read `len` bytes starting at `address` into a new buffer
    pub fn read_data(&mut self, address: u32, len: usize) -> Result<Vec<u8>, Error<E>> {
        let mut buff = vec![0u8; len];
        self.read(address, &mut buff)?;
        Ok(buff)
    }

    /// Software reset, Enable Reset then Reset as two frames.
    ///
    /// The chip ignores this while busy, the driver does not check.
    pub fn reset(&mut self) -> Result<(), Error<E>> {
        debug!("Resetting device");

        self.command(Instruction::EnableReset)?;
        self.command(Instruction::Reset)
    }

    fn command(&mut self, instruction: Instruction) -> Result<(), Error<E>> {
        let opcode = instruction.opcode();
        self.transaction(|bus| bus.transmit(&[opcode]))
    }

    fn read_register(&mut self, instruction: Instruction) -> Result<u8, Error<E>> {
        let opcode = instruction.opcode();
        let mut value = [0u8; 1];

        self.transaction(|bus| {
            bus.transmit(&[opcode])?;
            bus.receive(&mut value)
        })?;

        Ok(value[0])
    }

    fn check_range(&self, address: u32, len: usize) -> Result<(), Error<E>> {
        if address >= CAPACITY || address as usize + len > CAPACITY as usize {
            return Err(Error::AddressOutOfRange(address));
        }
        Ok(())
    }

    /// Run `f` with chip select asserted, deasserting on every path
    fn transaction<T, F>(&mut self, f: F) -> Result<T, Error<E>>
    where
        F: FnOnce(&mut B) -> Result<T, E>,
    {
        self.bus.select();
        let res = f(&mut self.bus);
        self.bus.deselect();

        res.map_err(|e| {
            debug!("Transport error: {:?}", e);
            Error::Transport(e)
        })
    }
}
