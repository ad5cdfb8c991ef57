//! spiduplex-linux - Linux spidev backend
//!
//! This crate provides the [`Spidev`] backend for spiduplex, talking to SPI
//! controllers through the `/dev/spidevX.Y` device interface.
//!
//! # Overview
//!
//! The Linux SPI driver exposes SPI controllers through character devices
//! at `/dev/spidevX.Y` where X is the bus number and Y is the chip select.
//! Every batch becomes a single `SPI_IOC_MESSAGE(N)` ioctl, so chip select
//! and clock state carry over between the segments of one batch.
//!
//! # Example
//!
//! ```no_run
//! use spiduplex_core::{SegmentSettings, Segment, SpidevIo};
//! use spiduplex_linux::Spidev;
//!
//! let mut spi = Spidev::open("/dev/spidev0.0")?;
//! spi.write_mode(0)?;
//! spi.write_max_speed_hz(1_000_000)?;
//!
//! let settings = SegmentSettings {
//!     speed_hz: 1_000_000,
//!     bits_per_word: 8,
//!     delay_usecs: 0,
//!     cs_change: false,
//!     word_delay_usecs: 0,
//!     tx_nbits: 0,
//!     rx_nbits: 0,
//! };
//! let mut segments = [Segment::new(vec![0x9F, 0, 0, 0], settings)];
//! spi.message(&mut segments)?;
//! println!("JEDEC ID: {:02X?}", &segments[0].rx()[1..]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # System Requirements
//!
//! - Linux kernel with spidev support enabled (`CONFIG_SPI_SPIDEV`)
//! - Read/write access to `/dev/spidevX.Y` device
//! - May require adding user to `spi` group or using udev rules

pub mod device;

// Re-exports
pub use device::Spidev;
