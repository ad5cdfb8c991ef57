//! `struct spi_ioc_transfer`
//!
//! The kernel reads an array of these records for `SPI_IOC_MESSAGE(N)`. The
//! record is serialized field by field in native byte order rather than by
//! reinterpreting a Rust struct, so the layout never depends on `repr`
//! choices or target padding rules.

/// Size of one serialized record in bytes
pub const DESCRIPTOR_SIZE: usize = 32;

/// Most records one `SPI_IOC_MESSAGE(N)` can describe
///
/// The ioctl encodes the byte size of the record array in a 14-bit field.
pub const MAX_SEGMENTS: usize = ((1 << 14) - 1) / DESCRIPTOR_SIZE;

/// One segment of an `SPI_IOC_MESSAGE` call
///
/// Field order and widths follow `include/uapi/linux/spi/spidev.h`:
///
/// | offset | field              | type  |
/// |--------|--------------------|-------|
/// | 0      | `tx_buf`           | `u64` |
/// | 8      | `rx_buf`           | `u64` |
/// | 16     | `len`              | `u32` |
/// | 20     | `speed_hz`         | `u32` |
/// | 24     | `delay_usecs`      | `u16` |
/// | 26     | `bits_per_word`    | `u8`  |
/// | 27     | `cs_change`        | `u8`  |
/// | 28     | `tx_nbits`         | `u8`  |
/// | 29     | `rx_nbits`         | `u8`  |
/// | 30     | `word_delay_usecs` | `u8`  |
/// | 31     | `pad`              | `u8`  |
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferDescriptor {
    /// User-space address of the transmit buffer
    pub tx_buf: u64,
    /// User-space address of the receive buffer
    pub rx_buf: u64,
    /// Number of bytes in both buffers
    pub len: u32,
    /// Clock speed for this segment
    pub speed_hz: u32,
    /// Delay after this segment, before the next one or CS release
    pub delay_usecs: u16,
    /// Word size for this segment
    pub bits_per_word: u8,
    /// 1 to release chip select after this segment
    pub cs_change: u8,
    /// Transmit line count
    pub tx_nbits: u8,
    /// Receive line count
    pub rx_nbits: u8,
    /// Delay between words
    pub word_delay_usecs: u8,
}

impl TransferDescriptor {
    /// Serialize into the kernel layout; the pad byte is always written as zero
    pub fn encode(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut out = [0u8; DESCRIPTOR_SIZE];
        out[0..8].copy_from_slice(&self.tx_buf.to_ne_bytes());
        out[8..16].copy_from_slice(&self.rx_buf.to_ne_bytes());
        out[16..20].copy_from_slice(&self.len.to_ne_bytes());
        out[20..24].copy_from_slice(&self.speed_hz.to_ne_bytes());
        out[24..26].copy_from_slice(&self.delay_usecs.to_ne_bytes());
        out[26] = self.bits_per_word;
        out[27] = self.cs_change;
        out[28] = self.tx_nbits;
        out[29] = self.rx_nbits;
        out[30] = self.word_delay_usecs;
        debug_assert_eq!(out[31], 0);
        out
    }
}

/// Serialize a whole batch into one contiguous buffer for the ioctl
pub fn encode_batch(descriptors: &[TransferDescriptor]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(descriptors.len() * DESCRIPTOR_SIZE);
    for desc in descriptors {
        buf.extend_from_slice(&desc.encode());
    }
    buf
}
