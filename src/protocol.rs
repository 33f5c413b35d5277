//! W25Q64FV instruction set, geometry and frame encoding.
//!
//! Base on the W25Q64FV datasheet, standard SPI instructions only.

use bitflags::bitflags;

/// Programmable unit, a page program must not cross this boundary
pub const PAGE_SIZE: u32 = 256;

/// Smallest erasable unit
pub const SECTOR_SIZE: u32 = 4096;

/// Device capacity in bytes (64 Mbit)
pub const CAPACITY: u32 = 8 * 1024 * 1024;

/// Addresses are 24 bits wide on the wire
pub const ADDRESS_MASK: u32 = 0x00FF_FFFF;

/// Length of an instruction byte plus a 24-bit address
pub const HEADER_LEN: usize = 4;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum Instruction {
    /// Sets the Write Enable Latch, required before every program or erase.
    WriteEnable = 0x06,

    /// Clears the Write Enable Latch.
    WriteDisable = 0x04,

    /// Reads status register 1 (S7-S0), BUSY is bit 0.
    ReadStatusRegister1 = 0x05,

    /// Reads status register 2 (S15-S8).
    ReadStatusRegister2 = 0x35,

    /// Programs from one up to 256 bytes within a single page.
    PageProgram = 0x02,

    /// Sequentially reads one or more bytes starting at the given address.
    ReadData = 0x03,

    /// Erases the 4KB sector containing the given address.
    SectorErase = 0x20,

    /// Erases the whole device.
    ChipErase = 0xC7,

    /// Arms the device for a following Reset instruction.
    EnableReset = 0x66,

    /// Software reset, only accepted directly after Enable Reset.
    Reset = 0x99,
}

impl Instruction {
    /// Fetch the wire opcode
    pub const fn opcode(self) -> u8 {
        self as u8
    }
}

/// Serialise a 24-bit address most significant byte first.
///
/// Bits above 23 are discarded.
pub const fn address_bytes(address: u32) -> [u8; 3] {
    [
        ((address >> 16) & 0xFF) as u8,
        ((address >> 8) & 0xFF) as u8,
        (address & 0xFF) as u8,
    ]
}

/// Build the instruction + address header shared by read, program and erase.
pub const fn frame_address(instruction: Instruction, address: u32) -> [u8; HEADER_LEN] {
    let a = address_bytes(address);
    [instruction.opcode(), a[0], a[1], a[2]]
}

/// Build a complete page program frame: header followed by payload.
pub fn frame_program(address: u32, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + data.len());
    frame.extend_from_slice(&frame_address(Instruction::PageProgram, address));
    frame.extend_from_slice(data);
    frame
}

/// Check whether `len` bytes starting at `address` stay inside one page
pub const fn fits_in_page(address: u32, len: usize) -> bool {
    (address % PAGE_SIZE) as usize + len <= PAGE_SIZE as usize
}

bitflags! {
    /// Status register 1 (S7-S0)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusRegister1: u8 {
        /// Erase or program in progress
        const BUSY = 1 << 0;
        /// Write enable latch
        const WEL  = 1 << 1;
        const BP0  = 1 << 2;
        const BP1  = 1 << 3;
        const BP2  = 1 << 4;
        /// Top/bottom block protect
        const TB   = 1 << 5;
        /// Sector/block protect
        const SEC  = 1 << 6;
        /// Status register protect 0
        const SRP0 = 1 << 7;
    }
}

bitflags! {
    /// Status register 2 (S15-S8)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusRegister2: u8 {
        /// Status register protect 1
        const SRP1 = 1 << 0;
        /// Quad enable
        const QE   = 1 << 1;
        const LB1  = 1 << 3;
        const LB2  = 1 << 4;
        const LB3  = 1 << 5;
        /// Complement protect
        const CMP  = 1 << 6;
        /// Erase/program suspended
        const SUS  = 1 << 7;
    }
}

/// Raw contents of both status registers.
///
/// Only the BUSY bit is interpreted by the driver, everything else is passed
/// through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusSnapshot {
    pub sr1: u8,
    pub sr2: u8,
}

impl StatusSnapshot {
    pub fn status1(&self) -> StatusRegister1 {
        StatusRegister1::from_bits_retain(self.sr1)
    }

    pub fn status2(&self) -> StatusRegister2 {
        StatusRegister2::from_bits_retain(self.sr2)
    }

    pub fn busy(&self) -> bool {
        self.status1().contains(StatusRegister1::BUSY)
    }

    pub fn write_enabled(&self) -> bool {
        self.status1().contains(StatusRegister1::WEL)
    }
}
