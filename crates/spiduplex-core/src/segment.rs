//! Normalized transfer segments
//!
//! A [`Segment`] owns its transmit payload, a receive buffer of the same
//! length and fully resolved settings. Backends only ever see this shape.

use crate::descriptor::TransferDescriptor;

/// Per-segment settings with every default already applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSettings {
    /// Clock speed in Hz
    pub speed_hz: u32,
    /// Word size
    pub bits_per_word: u8,
    /// Delay after the segment in microseconds
    pub delay_usecs: u16,
    /// Release chip select after this segment
    pub cs_change: bool,
    /// Delay between words in microseconds (0 = controller default)
    pub word_delay_usecs: u8,
    /// Transmit line count (0 = single)
    pub tx_nbits: u8,
    /// Receive line count (0 = single)
    pub rx_nbits: u8,
}

/// One leg of a batched transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    tx: Vec<u8>,
    rx: Vec<u8>,
    settings: SegmentSettings,
}

impl Segment {
    /// Create a segment; the receive buffer is zeroed and sized to `tx`
    pub fn new(tx: Vec<u8>, settings: SegmentSettings) -> Self {
        let rx = vec![0u8; tx.len()];
        Self { tx, rx, settings }
    }

    /// Number of bytes clocked in each direction
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Whether the segment carries no data
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Outbound payload
    pub fn tx(&self) -> &[u8] {
        &self.tx
    }

    /// Received data
    pub fn rx(&self) -> &[u8] {
        &self.rx
    }

    /// Receive buffer for backends to fill
    pub fn rx_mut(&mut self) -> &mut [u8] {
        &mut self.rx
    }

    /// Resolved settings
    pub fn settings(&self) -> &SegmentSettings {
        &self.settings
    }

    /// Take the receive buffer
    pub fn into_rx(self) -> Vec<u8> {
        self.rx
    }

    /// Build the kernel record for this segment
    ///
    /// The addresses point into this segment's heap buffers and remain valid
    /// until the segment is dropped; the buffers are never resized.
    pub fn descriptor(&mut self) -> TransferDescriptor {
        TransferDescriptor {
            tx_buf: self.tx.as_ptr() as u64,
            rx_buf: self.rx.as_mut_ptr() as u64,
            len: self.tx.len() as u32,
            speed_hz: self.settings.speed_hz,
            delay_usecs: self.settings.delay_usecs,
            bits_per_word: self.settings.bits_per_word,
            cs_change: self.settings.cs_change as u8,
            tx_nbits: self.settings.tx_nbits,
            rx_nbits: self.settings.rx_nbits,
            word_delay_usecs: self.settings.word_delay_usecs,
        }
    }
}
