//! Transfer requests and their normalization
//!
//! Callers describe a batch as a list of [`TransferSegment`]s, either a bare
//! payload or a [`Transfer`] with per-segment overrides. Both shapes are
//! resolved against the device defaults into [`Segment`]s before anything
//! reaches the device.

use spiduplex_core::config::{validate_bits_per_word, validate_nbits};
use spiduplex_core::descriptor::MAX_SEGMENTS;
use spiduplex_core::error::{Error, Result};
use spiduplex_core::{DeviceConfig, ExtrasPolicy, Segment, SegmentSettings};

/// A transfer with optional per-segment overrides
///
/// Any override left as `None` falls back to the device's current setting
/// (`speed_hz`, `bits_per_word`) or to zero (`delay_usecs`, `cs_change`, and
/// the platform-specific fields).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transfer {
    /// Outbound payload (required)
    pub tx_buf: Option<Vec<u8>>,
    /// Clock speed in Hz
    pub speed_hz: Option<u32>,
    /// Word size
    pub bits_per_word: Option<u8>,
    /// Delay after this segment in microseconds
    pub delay_usecs: Option<u16>,
    /// Release chip select after this segment
    pub cs_change: Option<bool>,
    /// Delay between words in microseconds (controller-specific)
    pub word_delay_usecs: Option<u8>,
    /// Transmit line count (dual/quad controllers only)
    pub tx_nbits: Option<u8>,
    /// Receive line count (dual/quad controllers only)
    pub rx_nbits: Option<u8>,
}

impl Transfer {
    /// Create a transfer sending `tx`
    pub fn new(tx: impl Into<Vec<u8>>) -> Self {
        Self {
            tx_buf: Some(tx.into()),
            ..Default::default()
        }
    }

    /// Override the clock speed
    pub fn with_speed_hz(mut self, speed_hz: u32) -> Self {
        self.speed_hz = Some(speed_hz);
        self
    }

    /// Override the word size
    pub fn with_bits_per_word(mut self, bits: u8) -> Self {
        self.bits_per_word = Some(bits);
        self
    }

    /// Wait after this segment
    pub fn with_delay_usecs(mut self, delay_usecs: u16) -> Self {
        self.delay_usecs = Some(delay_usecs);
        self
    }

    /// Release chip select after this segment
    pub fn with_cs_change(mut self, cs_change: bool) -> Self {
        self.cs_change = Some(cs_change);
        self
    }

    /// Wait between words
    pub fn with_word_delay_usecs(mut self, word_delay_usecs: u8) -> Self {
        self.word_delay_usecs = Some(word_delay_usecs);
        self
    }

    /// Transmit on `nbits` lines
    pub fn with_tx_nbits(mut self, nbits: u8) -> Self {
        self.tx_nbits = Some(nbits);
        self
    }

    /// Receive on `nbits` lines
    pub fn with_rx_nbits(mut self, nbits: u8) -> Self {
        self.rx_nbits = Some(nbits);
        self
    }

    fn has_extras(&self) -> bool {
        self.word_delay_usecs.is_some() || self.tx_nbits.is_some() || self.rx_nbits.is_some()
    }
}

/// One entry of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSegment {
    /// Payload only, every setting from the device defaults
    Simple(Vec<u8>),
    /// Payload with overrides
    Detailed(Transfer),
}

impl From<Vec<u8>> for TransferSegment {
    fn from(tx: Vec<u8>) -> Self {
        Self::Simple(tx)
    }
}

impl From<&[u8]> for TransferSegment {
    fn from(tx: &[u8]) -> Self {
        Self::Simple(tx.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for TransferSegment {
    fn from(tx: [u8; N]) -> Self {
        Self::Simple(tx.to_vec())
    }
}

impl From<Transfer> for TransferSegment {
    fn from(transfer: Transfer) -> Self {
        Self::Detailed(transfer)
    }
}

impl TransferSegment {
    /// Resolve into a [`Segment`] using `defaults` for anything not overridden
    pub fn normalize(
        self,
        index: usize,
        defaults: &DeviceConfig,
        extras: ExtrasPolicy,
    ) -> Result<Segment> {
        let mut transfer = match self {
            Self::Simple(tx) => Transfer::new(tx),
            Self::Detailed(transfer) => transfer,
        };

        let tx = transfer
            .tx_buf
            .take()
            .ok_or_else(|| Error::invalid_segment(index, "tx_buf is required"))?;
        if tx.is_empty() {
            return Err(Error::invalid_segment(index, "tx_buf cannot be empty"));
        }

        if transfer.speed_hz == Some(0) {
            return Err(Error::invalid_segment(
                index,
                "speed_hz must be greater than 0",
            ));
        }
        if let Some(bits) = transfer.bits_per_word {
            validate_bits_per_word(bits)
                .map_err(|e| Error::invalid_segment(index, e.to_string()))?;
        }

        if transfer.has_extras() {
            match extras {
                ExtrasPolicy::Forward => {
                    let lines = [
                        ("tx_nbits", transfer.tx_nbits),
                        ("rx_nbits", transfer.rx_nbits),
                    ];
                    for (name, nbits) in lines {
                        if let Some(nbits) = nbits {
                            validate_nbits(nbits).map_err(|e| {
                                Error::invalid_segment(index, format!("{} {}", name, e))
                            })?;
                        }
                    }
                }
                ExtrasPolicy::Reject => {
                    return Err(Error::invalid_segment(
                        index,
                        "word_delay_usecs, tx_nbits and rx_nbits are not supported on this device",
                    ));
                }
                ExtrasPolicy::Ignore => {
                    log::warn!(
                        "spiduplex: Ignoring platform-specific fields on segment {}",
                        index
                    );
                    transfer.word_delay_usecs = None;
                    transfer.tx_nbits = None;
                    transfer.rx_nbits = None;
                }
            }
        }

        let settings = SegmentSettings {
            speed_hz: transfer.speed_hz.unwrap_or(defaults.max_speed_hz),
            bits_per_word: transfer.bits_per_word.unwrap_or(defaults.bits_per_word),
            delay_usecs: transfer.delay_usecs.unwrap_or(0),
            cs_change: transfer.cs_change.unwrap_or(false),
            word_delay_usecs: transfer.word_delay_usecs.unwrap_or(0),
            tx_nbits: transfer.tx_nbits.unwrap_or(0),
            rx_nbits: transfer.rx_nbits.unwrap_or(0),
        };

        Ok(Segment::new(tx, settings))
    }
}

/// Normalize a whole batch, rejecting it before any device access if any
/// segment is invalid or the batch cannot fit in one kernel call
pub fn build_batch(
    segments: impl IntoIterator<Item = TransferSegment>,
    defaults: &DeviceConfig,
    extras: ExtrasPolicy,
    max_transfer_len: usize,
) -> Result<Vec<Segment>> {
    let batch = segments
        .into_iter()
        .enumerate()
        .map(|(index, segment)| segment.normalize(index, defaults, extras))
        .collect::<Result<Vec<_>>>()?;

    if batch.is_empty() {
        return Err(Error::EmptyBatch);
    }
    if batch.len() > MAX_SEGMENTS {
        return Err(Error::BatchTooLarge {
            reason: format!("{} segments (max {})", batch.len(), MAX_SEGMENTS),
        });
    }

    let total: usize = batch.iter().map(Segment::len).sum();
    if total > max_transfer_len {
        return Err(Error::BatchTooLarge {
            reason: format!("{} bytes (max {})", total, max_transfer_len),
        });
    }

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spiduplex_core::ErrorKind;

    fn defaults() -> DeviceConfig {
        DeviceConfig::default()
    }

    #[test]
    fn test_simple_uses_defaults() {
        let seg = TransferSegment::from(vec![1u8, 2])
            .normalize(0, &defaults(), ExtrasPolicy::Forward)
            .unwrap();
        let s = seg.settings();
        assert_eq!(s.speed_hz, 1_000_000);
        assert_eq!(s.bits_per_word, 8);
        assert_eq!(s.delay_usecs, 0);
        assert!(!s.cs_change);
        assert_eq!(seg.rx(), &[0, 0]);
    }

    #[test]
    fn test_overrides_win() {
        let seg = TransferSegment::from(
            Transfer::new(vec![0xAAu8])
                .with_speed_hz(500_000)
                .with_bits_per_word(16)
                .with_delay_usecs(100)
                .with_cs_change(true),
        )
        .normalize(0, &defaults(), ExtrasPolicy::Forward)
        .unwrap();
        let s = seg.settings();
        assert_eq!(s.speed_hz, 500_000);
        assert_eq!(s.bits_per_word, 16);
        assert_eq!(s.delay_usecs, 100);
        assert!(s.cs_change);
    }

    #[test]
    fn test_missing_payload_names_index() {
        let batch = vec![
            TransferSegment::from(vec![1u8]),
            TransferSegment::from(Transfer::default().with_speed_hz(10)),
        ];
        let err = build_batch(batch, &defaults(), ExtrasPolicy::Forward, 4096).unwrap_err();
        assert!(matches!(err, Error::InvalidSegment { index: 1, .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_rejects_bad_overrides() {
        for transfer in [
            Transfer::new(vec![1u8]).with_speed_hz(0),
            Transfer::new(vec![1u8]).with_bits_per_word(0),
            Transfer::new(vec![1u8]).with_bits_per_word(40),
            Transfer::new(vec![1u8]).with_tx_nbits(3),
            Transfer::new(Vec::<u8>::new()),
        ] {
            let err = TransferSegment::from(transfer)
                .normalize(2, &defaults(), ExtrasPolicy::Forward)
                .unwrap_err();
            assert!(matches!(err, Error::InvalidSegment { index: 2, .. }));
        }
    }

    #[test]
    fn test_extras_policies() {
        let transfer = Transfer::new(vec![1u8]).with_rx_nbits(2).with_word_delay_usecs(5);

        let seg = TransferSegment::from(transfer.clone())
            .normalize(0, &defaults(), ExtrasPolicy::Forward)
            .unwrap();
        assert_eq!(seg.settings().rx_nbits, 2);
        assert_eq!(seg.settings().word_delay_usecs, 5);

        let seg = TransferSegment::from(transfer.clone())
            .normalize(0, &defaults(), ExtrasPolicy::Ignore)
            .unwrap();
        assert_eq!(seg.settings().rx_nbits, 0);
        assert_eq!(seg.settings().word_delay_usecs, 0);

        assert!(TransferSegment::from(transfer)
            .normalize(0, &defaults(), ExtrasPolicy::Reject)
            .is_err());
    }

    #[test]
    fn test_batch_limits() {
        let empty: Vec<TransferSegment> = Vec::new();
        assert!(matches!(
            build_batch(empty, &defaults(), ExtrasPolicy::Forward, 4096),
            Err(Error::EmptyBatch)
        ));

        let big = vec![TransferSegment::from(vec![0u8; 3000]); 2];
        assert!(matches!(
            build_batch(big, &defaults(), ExtrasPolicy::Forward, 4096),
            Err(Error::BatchTooLarge { .. })
        ));

        let many = vec![TransferSegment::from([0u8]); MAX_SEGMENTS + 1];
        assert!(matches!(
            build_batch(many, &defaults(), ExtrasPolicy::Forward, usize::MAX),
            Err(Error::BatchTooLarge { .. })
        ));
    }
}
