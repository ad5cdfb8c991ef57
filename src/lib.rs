//! spiduplex - Asynchronous full-duplex SPI transfers over Linux spidev
//!
//! A batch of segments is handed to the kernel as one `SPI_IOC_MESSAGE(N)`
//! call, so chip select stays asserted across segments unless a segment asks
//! for `cs_change`. Each segment may override the device's clock speed and
//! word size, add a delay, or toggle chip select.
//!
//! # Example
//!
//! ```no_run
//! use spiduplex::{SpiConfig, SpiDuplex, Transfer, TransferSegment};
//!
//! # async fn run() -> spiduplex::Result<()> {
//! let spi = SpiDuplex::open(&SpiConfig::new("/dev/spidev0.0").with_speed(2_000_000))?;
//!
//! let rx = spi
//!     .transfer([
//!         TransferSegment::from(vec![0x9Fu8]),
//!         Transfer::new(vec![0u8; 3]).with_speed_hz(500_000).into(),
//!     ])
//!     .await?;
//! println!("JEDEC ID: {:02X?}", rx[1]);
//!
//! spi.close();
//! # Ok(())
//! # }
//! ```
//!
//! # Crates
//!
//! - `spiduplex-core` - shared types, validation and the kernel record layout
//! - `spiduplex-linux` - the `/dev/spidevX.Y` backend (feature `linux`)
//! - `spiduplex-dummy` - an in-memory loopback backend for tests

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod engine;
pub mod handle;
pub mod segment;

pub use engine::SpiDuplex;
pub use handle::DeviceHandle;
pub use segment::{build_batch, Transfer, TransferSegment};

pub use spiduplex_core::{
    mode, parse_options, DeviceConfig, Error, ErrorKind, ExtrasPolicy, ModeFlags, Result, Segment,
    SpiConfig, SpidevIo,
};

#[cfg(feature = "linux")]
pub use spiduplex_linux::Spidev;
