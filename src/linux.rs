use std::io::Error as IoError;
use std::path::Path;

use anyhow::Context;
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::sysfs_gpio::Direction;
use linux_embedded_hal::{Delay, Spidev, SysfsPin};

use crate::{Flash, Options, SpiBus};

/// Linux SPI bus with a sysfs GPIO chip select
pub type LinuxBus = SpiBus<Spidev, SysfsPin>;

impl Flash<LinuxBus, Delay, IoError> {
    /// Create a new linux spidev flash instance.
    ///
    /// Kernel chip select is disabled, `cs_pin` is exported and driven
    /// by the driver instead so that a frame may span multiple transfers.
    pub fn linux<P: AsRef<Path>>(
        spi: P,
        cs_pin: u64,
        speed_hz: u32,
        options: Options,
    ) -> anyhow::Result<Self> {
        let spi = spi.as_ref();

        // Open port
        let mut dev = Spidev::open(spi)
            .with_context(|| format!("opening SPI device {}", spi.display()))?;

        // Apply settings
        let settings = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(speed_hz)
            .mode(SpiModeFlags::SPI_MODE_0 | SpiModeFlags::SPI_NO_CS)
            .build();
        dev.0
            .configure(&settings)
            .context("configuring SPI device")?;

        // Claim chip select, idle high
        let cs = SysfsPin::new(cs_pin);
        cs.0.export()
            .with_context(|| format!("exporting GPIO {}", cs_pin))?;
        cs.0.set_direction(Direction::High)
            .with_context(|| format!("configuring GPIO {}", cs_pin))?;

        debug!(
            "Opened {} at {} Hz, chip select GPIO {}",
            spi.display(),
            speed_hz,
            cs_pin
        );

        // Return instance
        Ok(Self::new(SpiBus::new(dev, cs), Delay {}, options))
    }
}
