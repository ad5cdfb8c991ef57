//! spiduplex-core - Shared types for spidev transfers
//!
//! This crate holds everything the transfer engine and its backends agree
//! on:
//!
//! - [`config`] - device defaults, validation and option parsing
//! - [`mode`] - SPI mode byte and flag constants
//! - [`descriptor`] - the kernel's `spi_ioc_transfer` record
//! - [`segment`] - normalized segments handed to backends
//! - [`io`] - the [`SpidevIo`] trait implemented by backends
//! - [`error`] - the error taxonomy shared by all crates

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod descriptor;
#[allow(missing_docs)]
pub mod error;
pub mod io;
pub mod mode;
pub mod segment;

pub use config::{parse_options, DeviceConfig, ExtrasPolicy, SpiConfig};
pub use descriptor::TransferDescriptor;
pub use error::{Error, ErrorKind, Result};
pub use io::SpidevIo;
pub use mode::ModeFlags;
pub use segment::{Segment, SegmentSettings};
