#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::fs;
use std::num::ParseIntError;
use std::path::PathBuf;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};

use w25q_flash::linux::LinuxBus;
use w25q_flash::protocol::{CAPACITY, PAGE_SIZE, SECTOR_SIZE};
use w25q_flash::{Flash, Options};

type LinuxFlash = Flash<LinuxBus, linux_embedded_hal::Delay, std::io::Error>;

/// Bytes per read transaction when reading to a file
const READ_CHUNK: usize = 4096;

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// SPI device to connect to
    #[structopt(long, default_value = "/dev/spidev0.0")]
    spi: PathBuf,

    /// GPIO (sysfs number) driving flash chip select
    #[structopt(long, default_value = "8")]
    cs_pin: u64,

    /// SPI clock speed
    #[structopt(long, default_value = "1000000")]
    speed_hz: u32,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Command {
    /// Read and decode both status registers
    Status,

    /// Read memory, hex dumped unless an output file is given
    Read {
        #[structopt(long, parse(try_from_str = parse_u32))]
        address: u32,

        #[structopt(long, parse(try_from_str = parse_u32))]
        length: u32,

        #[structopt(long)]
        output: Option<PathBuf>,
    },

    /// Program a file, page by page
    Write {
        #[structopt(long, parse(try_from_str = parse_u32))]
        address: u32,

        #[structopt(long)]
        input: PathBuf,

        /// Erase the affected sectors first
        #[structopt(long)]
        erase: bool,
    },

    /// Erase the 4KB sector containing an address
    EraseSector {
        #[structopt(long, parse(try_from_str = parse_u32))]
        address: u32,
    },

    /// Erase the whole chip
    EraseChip {
        /// Wait for the erase to complete
        #[structopt(long)]
        wait: bool,
    },

    /// Clear the write enable latch
    WriteDisable,

    /// Software reset
    Reset,
}

fn parse_u32(s: &str) -> Result<u32, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(h) => u32::from_str_radix(h, 16),
        None => s.parse(),
    }
}

/// Reject spans running past the end of the device
fn check_span(address: u32, len: u64) -> anyhow::Result<()> {
    if address as u64 + len > CAPACITY as u64 {
        anyhow::bail!("{} bytes at 0x{:06x} exceed device capacity", len, address);
    }
    Ok(())
}

fn progress(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {bytes}/{total_bytes}")
            .progress_chars("=>-"),
    );
    pb
}

fn status(flash: &mut LinuxFlash) -> anyhow::Result<()> {
    let s = flash.read_status()?;

    info!("SR1: 0x{:02x} {:?}", s.sr1, s.status1());
    info!("SR2: 0x{:02x} {:?}", s.sr2, s.status2());
    info!("Busy: {}, write enabled: {}", s.busy(), s.write_enabled());

    Ok(())
}

fn read(
    flash: &mut LinuxFlash,
    address: u32,
    length: u32,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    check_span(address, length as u64)?;

    let output = match output {
        Some(o) => o,
        None => {
            let data = flash.read_data(address, length as usize)?;
            for (i, line) in data.chunks(16).enumerate() {
                println!("{:06x}: {}", address as usize + i * 16, hex::encode(line));
            }
            return Ok(());
        }
    };

    info!("Reading {} to {}", bytefmt::format(length as u64), output.display());

    let pb = progress(length as u64);
    let mut data = vec![0u8; length as usize];
    for (i, chunk) in data.chunks_mut(READ_CHUNK).enumerate() {
        flash.read(address + (i * READ_CHUNK) as u32, chunk)?;
        pb.inc(chunk.len() as u64);
    }
    pb.finish_and_clear();

    fs::write(&output, &data).with_context(|| format!("writing {}", output.display()))?;

    Ok(())
}

fn write(flash: &mut LinuxFlash, address: u32, input: PathBuf, erase: bool) -> anyhow::Result<()> {
    let data = fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
    if data.is_empty() {
        warn!("Input file is empty");
        return Ok(());
    }

    check_span(address, data.len() as u64)?;
    let end = address + data.len() as u32;

    info!("Writing {} at 0x{:06x}", bytefmt::format(data.len() as u64), address);

    if erase {
        let first = address - address % SECTOR_SIZE;
        let sectors = (first..end).step_by(SECTOR_SIZE as usize);

        let pb = progress((end - first) as u64);
        for sector in sectors {
            flash.erase_sector(sector)?;
            pb.inc(SECTOR_SIZE as u64);
        }
        flash.wait_idle()?;
        pb.finish_and_clear();
    }

    // Split on page boundaries, the first page may be partial
    let pb = progress(data.len() as u64);
    let mut offset = 0usize;
    while offset < data.len() {
        let a = address + offset as u32;
        let room = (PAGE_SIZE - a % PAGE_SIZE) as usize;
        let n = room.min(data.len() - offset);

        flash.program_page(a, &data[offset..offset + n])?;

        offset += n;
        pb.inc(n as u64);
    }
    flash.wait_idle()?;
    pb.finish_and_clear();

    info!("Write complete");

    Ok(())
}

fn run(o: Args) -> anyhow::Result<()> {
    info!("Connecting to {}", o.spi.display());

    let mut flash = Flash::linux(&o.spi, o.cs_pin, o.speed_hz, o.options)?;

    match o.command {
        Command::Status => status(&mut flash)?,
        Command::Read {
            address,
            length,
            output,
        } => read(&mut flash, address, length, output)?,
        Command::Write {
            address,
            input,
            erase,
        } => write(&mut flash, address, input, erase)?,
        Command::EraseSector { address } => {
            flash.erase_sector(address)?;
            flash.wait_idle()?;
            info!("Sector erased");
        }
        Command::EraseChip { wait } => {
            flash.erase_chip()?;
            if wait {
                info!("Waiting for chip erase");
                flash.wait_idle()?;
                info!("Chip erased");
            }
        }
        Command::WriteDisable => flash.write_disable()?,
        Command::Reset => flash.reset()?,
    }

    Ok(())
}

fn main() {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    if let Err(e) = run(o) {
        error!("{:?}", e);
        std::process::exit(1);
    }
}
