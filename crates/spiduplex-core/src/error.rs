//! Error types for spidev operations

use std::time::Duration;

use thiserror::Error;

/// Errors raised while opening, configuring or transferring on a spidev device
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to open device
    #[error("Failed to open {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Another process holds the exclusive lock on the device
    #[error("{path} is already locked by another process")]
    Locked { path: String },

    /// Device not specified
    #[error("No device specified. Use dev=/dev/spidevX.Y")]
    NoDevice,

    /// Failed to set SPI mode
    #[error("Failed to set SPI mode to {mode:#04x}: {source}")]
    SetModeFailed {
        mode: u8,
        #[source]
        source: std::io::Error,
    },

    /// Failed to set bits per word
    #[error("Failed to set bits per word to {bits}: {source}")]
    SetBitsPerWordFailed {
        bits: u8,
        #[source]
        source: std::io::Error,
    },

    /// Failed to set clock speed
    #[error("Failed to set clock speed to {speed} Hz: {source}")]
    SetSpeedFailed {
        speed: u32,
        #[source]
        source: std::io::Error,
    },

    /// A transfer was requested with no segments
    #[error("Transfer batch is empty")]
    EmptyBatch,

    /// A single segment of a batch is malformed
    #[error("Invalid transfer segment {index}: {reason}")]
    InvalidSegment { index: usize, reason: String },

    /// The batch exceeds what one SPI_IOC_MESSAGE call can carry
    #[error("Transfer batch too large: {reason}")]
    BatchTooLarge { reason: String },

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// SPI transfer failed
    #[error("SPI transfer of {segments} segment(s) failed: {source}")]
    TransferFailed {
        segments: usize,
        #[source]
        source: std::io::Error,
    },

    /// Operation attempted after the device was closed
    #[error("Cannot {operation}: device is closed")]
    Closed { operation: &'static str },

    /// Caller-side timeout expired while waiting for a transfer
    #[error("SPI transfer did not complete within {0:?}")]
    Timeout(Duration),
}

/// Broad classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The device could not be opened
    DeviceOpen,
    /// The kernel rejected a mode, speed or word size
    Configuration,
    /// Arguments were rejected before reaching the kernel
    InvalidArgument,
    /// The batched kernel call failed
    Transfer,
    /// The handle was already closed
    Closed,
    /// The caller's timeout expired
    Timeout,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OpenFailed { .. } | Self::Locked { .. } | Self::NoDevice => ErrorKind::DeviceOpen,
            Self::SetModeFailed { .. }
            | Self::SetBitsPerWordFailed { .. }
            | Self::SetSpeedFailed { .. } => ErrorKind::Configuration,
            Self::EmptyBatch
            | Self::InvalidSegment { .. }
            | Self::BatchTooLarge { .. }
            | Self::InvalidParameter(_) => ErrorKind::InvalidArgument,
            Self::TransferFailed { .. } => ErrorKind::Transfer,
            Self::Closed { .. } => ErrorKind::Closed,
            Self::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// The raw OS error code behind this error, if there is one
    pub fn os_error(&self) -> Option<i32> {
        match self {
            Self::OpenFailed { source, .. }
            | Self::SetModeFailed { source, .. }
            | Self::SetBitsPerWordFailed { source, .. }
            | Self::SetSpeedFailed { source, .. }
            | Self::TransferFailed { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Shorthand for [`Error::InvalidSegment`]
    pub fn invalid_segment(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidSegment {
            index,
            reason: reason.into(),
        }
    }
}

/// Result type for spidev operations
pub type Result<T> = std::result::Result<T, Error>;
