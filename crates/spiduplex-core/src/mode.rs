//! SPI mode byte
//!
//! The low two bits select the clock mode (CPOL/CPHA). The remaining bits are
//! the spidev mode flags written through `SPI_IOC_WR_MODE`.

use crate::error::{Error, Result};
use bitflags::bitflags;

/// SPI mode 0: CPOL=0, CPHA=0
pub const MODE_0: u8 = 0;
/// SPI mode 1: CPOL=0, CPHA=1
pub const MODE_1: u8 = ModeFlags::CPHA.bits();
/// SPI mode 2: CPOL=1, CPHA=0
pub const MODE_2: u8 = ModeFlags::CPOL.bits();
/// SPI mode 3: CPOL=1, CPHA=1
pub const MODE_3: u8 = ModeFlags::CPOL.bits() | ModeFlags::CPHA.bits();

bitflags! {
    /// spidev mode flags (`SPI_CPHA`, `SPI_CPOL`, ...)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModeFlags: u8 {
        /// Sample on the trailing clock edge
        const CPHA       = 0x01;
        /// Clock idles high
        const CPOL       = 0x02;
        /// Chip select is active high
        const CS_HIGH    = 0x04;
        /// Shift words out least significant bit first
        const LSB_FIRST  = 0x08;
        /// Shared SI/SO signal
        const THREE_WIRE = 0x10;
        /// Controller loopback, for testing only
        const LOOP       = 0x20;
        /// No chip select at all
        const NO_CS      = 0x40;
        /// Peripheral pulls low to pause
        const READY      = 0x80;
    }
}

impl ModeFlags {
    /// Clock mode number (0-3) encoded in these flags
    pub fn clock_mode(self) -> u8 {
        (self & (ModeFlags::CPOL | ModeFlags::CPHA)).bits()
    }
}

/// Check a mode byte before it is written to the device
pub fn validate_mode(mode: u8) -> Result<ModeFlags> {
    let flags = ModeFlags::from_bits_retain(mode);

    if flags.contains(ModeFlags::NO_CS | ModeFlags::CS_HIGH) {
        return Err(Error::InvalidParameter(format!(
            "SPI mode {:#04x} combines NO_CS with CS_HIGH",
            mode
        )));
    }

    if flags.contains(ModeFlags::LOOP) {
        log::warn!("spiduplex: SPI_LOOP is intended for testing and not normal operation");
    }

    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_modes() {
        assert_eq!(MODE_1, 1);
        assert_eq!(MODE_2, 2);
        assert_eq!(MODE_3, 3);
        let flags = validate_mode(MODE_3 | ModeFlags::CS_HIGH.bits()).unwrap();
        assert_eq!(flags.clock_mode(), 3);
        assert!(flags.contains(ModeFlags::CS_HIGH));
    }

    #[test]
    fn test_rejects_no_cs_with_cs_high() {
        let mode = (ModeFlags::NO_CS | ModeFlags::CS_HIGH).bits();
        assert!(matches!(
            validate_mode(mode),
            Err(Error::InvalidParameter(_))
        ));
    }
}
