#![allow(dead_code)]

use std::collections::VecDeque;
use std::convert::Infallible;

use embedded_hal::blocking::delay::DelayMs;

use w25q_flash::protocol::{Instruction, CAPACITY, PAGE_SIZE, SECTOR_SIZE};
use w25q_flash::FlashBus;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Select,
    Tx(Vec<u8>),
    Rx(usize),
    Deselect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockError;

/// Records every bus call and answers status reads from a script
#[derive(Default)]
pub struct MockBus {
    pub events: Vec<Event>,
    /// Status register 1 answers, idle (0x00) once drained
    pub sr1: VecDeque<u8>,
    pub sr2: u8,
    /// Byte returned for data reads
    pub fill: u8,
    /// Fail the nth transmit (zero based)
    pub fail_tx: Option<usize>,
    /// Fail the nth receive (zero based)
    pub fail_rx: Option<usize>,
    tx_count: usize,
    rx_count: usize,
    opcode: Option<u8>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(sr1: &[u8]) -> Self {
        Self {
            sr1: sr1.iter().cloned().collect(),
            ..Self::default()
        }
    }

    /// Events grouped per chip select window
    pub fn frames(&self) -> Vec<Vec<Event>> {
        let mut frames = Vec::new();
        let mut current = Vec::new();

        for e in self.events.iter() {
            current.push(e.clone());
            if *e == Event::Deselect {
                frames.push(current);
                current = Vec::new();
            }
        }
        assert!(current.is_empty(), "chip select left asserted: {:?}", current);

        frames
    }

    /// First transmitted byte of each frame
    pub fn opcodes(&self) -> Vec<u8> {
        self.frames()
            .iter()
            .filter_map(|f| match f.get(1) {
                Some(Event::Tx(b)) => b.first().cloned(),
                _ => None,
            })
            .collect()
    }

    pub fn status_reads(&self) -> usize {
        self.opcodes()
            .iter()
            .filter(|&&o| o == Instruction::ReadStatusRegister1.opcode())
            .count()
    }
}

impl FlashBus<MockError> for MockBus {
    fn select(&mut self) {
        self.events.push(Event::Select);
        self.opcode = None;
    }

    fn deselect(&mut self) {
        self.events.push(Event::Deselect);
    }

    fn transmit(&mut self, data: &[u8]) -> Result<(), MockError> {
        let n = self.tx_count;
        self.tx_count += 1;
        if self.fail_tx == Some(n) {
            return Err(MockError);
        }

        self.events.push(Event::Tx(data.to_vec()));
        if self.opcode.is_none() {
            self.opcode = data.first().cloned();
        }
        Ok(())
    }

    fn receive(&mut self, buff: &mut [u8]) -> Result<(), MockError> {
        let n = self.rx_count;
        self.rx_count += 1;
        if self.fail_rx == Some(n) {
            return Err(MockError);
        }

        self.events.push(Event::Rx(buff.len()));

        let v = match self.opcode {
            Some(0x05) => self.sr1.pop_front().unwrap_or(0x00),
            Some(0x35) => self.sr2,
            _ => self.fill,
        };
        for b in buff.iter_mut() {
            *b = v;
        }
        Ok(())
    }
}

/// Records requested delays
#[derive(Default, Debug)]
pub struct MockDelay(pub Vec<u32>);

impl DelayMs<u32> for MockDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.0.push(ms);
    }
}

/// In-memory W25Q64FV model executing frames on chip select release.
///
/// Program and erase are ignored without WEL or while busy, as on silicon.
pub struct SimChip {
    pub memory: Vec<u8>,
    pub wel: bool,
    /// Remaining status reads reporting BUSY
    pub busy_polls: u32,
    /// Status reads a program or erase stays busy for
    pub busy_cost: u32,
    /// Instructions dropped for missing WEL or busy
    pub ignored: Vec<u8>,
    pub resets: u32,
    reset_armed: bool,
    frame: Vec<u8>,
}

impl SimChip {
    pub fn new(busy_cost: u32) -> Self {
        Self {
            memory: vec![0xFF; CAPACITY as usize],
            wel: false,
            busy_polls: 0,
            busy_cost,
            ignored: Vec::new(),
            resets: 0,
            reset_armed: false,
            frame: Vec::new(),
        }
    }

    fn address(&self) -> usize {
        ((self.frame[1] as usize) << 16) | ((self.frame[2] as usize) << 8) | self.frame[3] as usize
    }

    fn writable(&mut self, opcode: u8) -> bool {
        if self.busy_polls > 0 || !self.wel {
            self.ignored.push(opcode);
            return false;
        }
        true
    }

    fn finish(&mut self) {
        self.wel = false;
        self.busy_polls = self.busy_cost;
    }

    fn execute(&mut self) {
        let opcode = match self.frame.first() {
            Some(o) => *o,
            None => return,
        };

        let armed = self.reset_armed;
        self.reset_armed = false;

        match opcode {
            0x06 if self.busy_polls == 0 => self.wel = true,
            0x06 => self.ignored.push(opcode),
            0x04 => self.wel = false,
            0x02 => {
                if self.writable(opcode) {
                    let page = self.address() & !(PAGE_SIZE as usize - 1);
                    let offset = self.address() % PAGE_SIZE as usize;
                    for (i, b) in self.frame[4..].to_vec().iter().enumerate() {
                        // Wraps within the page
                        let a = page + (offset + i) % PAGE_SIZE as usize;
                        self.memory[a] &= *b;
                    }
                    self.finish();
                }
            }
            0x20 => {
                if self.writable(opcode) {
                    let base = self.address() & !(SECTOR_SIZE as usize - 1);
                    for b in self.memory[base..base + SECTOR_SIZE as usize].iter_mut() {
                        *b = 0xFF;
                    }
                    self.finish();
                }
            }
            0xC7 => {
                if self.writable(opcode) {
                    for b in self.memory.iter_mut() {
                        *b = 0xFF;
                    }
                    self.finish();
                }
            }
            0x66 => self.reset_armed = true,
            0x99 if armed => {
                self.wel = false;
                self.resets += 1;
            }
            _ => (),
        }
    }
}

impl FlashBus<Infallible> for SimChip {
    fn select(&mut self) {
        self.frame.clear();
    }

    fn deselect(&mut self) {
        self.execute();
    }

    fn transmit(&mut self, data: &[u8]) -> Result<(), Infallible> {
        self.frame.extend_from_slice(data);
        Ok(())
    }

    fn receive(&mut self, buff: &mut [u8]) -> Result<(), Infallible> {
        match self.frame.first() {
            Some(0x05) => {
                let mut sr1 = 0u8;
                if self.busy_polls > 0 {
                    self.busy_polls -= 1;
                    sr1 |= 0x01;
                }
                if self.wel {
                    sr1 |= 0x02;
                }
                buff.iter_mut().for_each(|b| *b = sr1);
            }
            Some(0x35) => buff.iter_mut().for_each(|b| *b = 0x00),
            Some(0x03) => {
                let start = self.address();
                for (i, b) in buff.iter_mut().enumerate() {
                    *b = self.memory[(start + i) % CAPACITY as usize];
                }
            }
            _ => (),
        }
        Ok(())
    }
}
