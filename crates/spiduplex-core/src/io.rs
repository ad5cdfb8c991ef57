//! The OS-side capability behind a spidev handle
//!
//! [`SpidevIo`] is the boundary between the transfer engine and whatever
//! actually talks to the controller: the Linux spidev backend, the in-memory
//! dummy, or a custom implementation. Methods map one-to-one onto spidev
//! ioctls and report raw OS errors; callers attach context.

use crate::segment::Segment;

/// Primitive spidev operations on an open device
///
/// Implementations are used from a blocking worker thread and must be `Send`.
/// The device is released when the value is dropped.
pub trait SpidevIo: Send {
    /// `SPI_IOC_WR_MODE`
    fn write_mode(&mut self, mode: u8) -> std::io::Result<()>;

    /// `SPI_IOC_WR_MAX_SPEED_HZ`
    fn write_max_speed_hz(&mut self, speed_hz: u32) -> std::io::Result<()>;

    /// `SPI_IOC_WR_BITS_PER_WORD`
    fn write_bits_per_word(&mut self, bits: u8) -> std::io::Result<()>;

    /// `SPI_IOC_MESSAGE(N)` with one record per segment
    ///
    /// Either every receive buffer is filled or an error is returned; there
    /// is no partial success.
    fn message(&mut self, segments: &mut [Segment]) -> std::io::Result<()>;

    /// Largest total payload one message may carry
    fn max_transfer_len(&self) -> usize {
        usize::MAX
    }
}

impl<T: SpidevIo + ?Sized> SpidevIo for Box<T> {
    fn write_mode(&mut self, mode: u8) -> std::io::Result<()> {
        (**self).write_mode(mode)
    }

    fn write_max_speed_hz(&mut self, speed_hz: u32) -> std::io::Result<()> {
        (**self).write_max_speed_hz(speed_hz)
    }

    fn write_bits_per_word(&mut self, bits: u8) -> std::io::Result<()> {
        (**self).write_bits_per_word(bits)
    }

    fn message(&mut self, segments: &mut [Segment]) -> std::io::Result<()> {
        (**self).message(segments)
    }

    fn max_transfer_len(&self) -> usize {
        (**self).max_transfer_len()
    }
}
