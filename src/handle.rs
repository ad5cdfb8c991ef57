//! Device handle
//!
//! [`DeviceHandle`] owns one [`SpidevIo`] backend and the three settings the
//! kernel tracks for it. The cached settings live in atomics so readers never
//! wait behind an in-flight transfer; the backend itself sits behind a mutex
//! so configuration writes and transfers never overlap.

use spiduplex_core::error::{Error, Result};
use spiduplex_core::{DeviceConfig, Segment, SpidevIo};

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};

type Backend = Box<dyn SpidevIo>;

/// An open spidev device with cached configuration
pub struct DeviceHandle {
    path: String,
    io: Mutex<Option<Backend>>,
    closed: AtomicBool,
    mode: AtomicU8,
    max_speed_hz: AtomicU32,
    bits_per_word: AtomicU8,
    max_transfer_len: usize,
}

impl DeviceHandle {
    /// Open a Linux spidev device
    #[cfg(feature = "linux")]
    pub fn open(path: &str) -> Result<Self> {
        let io = spiduplex_linux::Spidev::open(path)?;
        Ok(Self::from_io(path, io))
    }

    /// Wrap an already open backend
    ///
    /// The cached settings start at [`DeviceConfig::default`] until they are
    /// written.
    pub fn from_io(path: impl Into<String>, io: impl SpidevIo + 'static) -> Self {
        let defaults = DeviceConfig::default();
        let max_transfer_len = io.max_transfer_len();
        let io: Backend = Box::new(io);
        Self {
            path: path.into(),
            io: Mutex::new(Some(io)),
            closed: AtomicBool::new(false),
            mode: AtomicU8::new(defaults.mode),
            max_speed_hz: AtomicU32::new(defaults.max_speed_hz),
            bits_per_word: AtomicU8::new(defaults.bits_per_word),
            max_transfer_len,
        }
    }

    /// Device path this handle was opened with
    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock_io(&self) -> MutexGuard<'_, Option<Backend>> {
        // A panic inside a backend call leaves nothing half-updated here
        self.io.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_io<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut dyn SpidevIo) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.lock_io();
        match guard.as_mut() {
            Some(io) => f(&mut **io),
            None => Err(Error::Closed { operation }),
        }
    }

    /// Write the SPI mode; the cache is only updated when the kernel accepts it
    pub fn set_mode(&self, mode: u8) -> Result<()> {
        self.with_io("set mode", |io| {
            io.write_mode(mode)
                .map_err(|source| Error::SetModeFailed { mode, source })
        })?;
        self.mode.store(mode, Ordering::Release);
        log::debug!("spiduplex: {}: mode set to {:#04x}", self.path, mode);
        Ok(())
    }

    /// Write the maximum clock speed
    pub fn set_max_speed_hz(&self, speed: u32) -> Result<()> {
        self.with_io("set speed", |io| {
            io.write_max_speed_hz(speed)
                .map_err(|source| Error::SetSpeedFailed { speed, source })
        })?;
        self.max_speed_hz.store(speed, Ordering::Release);
        log::debug!("spiduplex: {}: speed set to {} Hz", self.path, speed);
        Ok(())
    }

    /// Write the word size
    pub fn set_bits_per_word(&self, bits: u8) -> Result<()> {
        self.with_io("set bits per word", |io| {
            io.write_bits_per_word(bits)
                .map_err(|source| Error::SetBitsPerWordFailed { bits, source })
        })?;
        self.bits_per_word.store(bits, Ordering::Release);
        log::debug!("spiduplex: {}: bits per word set to {}", self.path, bits);
        Ok(())
    }

    /// Last mode the kernel accepted
    ///
    /// The cached getters never touch the backend, so they keep answering
    /// after [`close`](Self::close) with the values in effect at that point.
    pub fn mode(&self) -> u8 {
        self.mode.load(Ordering::Acquire)
    }

    /// Last clock speed the kernel accepted
    pub fn max_speed_hz(&self) -> u32 {
        self.max_speed_hz.load(Ordering::Acquire)
    }

    /// Last word size the kernel accepted
    pub fn bits_per_word(&self) -> u8 {
        self.bits_per_word.load(Ordering::Acquire)
    }

    /// Snapshot of all cached settings
    pub fn config(&self) -> DeviceConfig {
        DeviceConfig {
            max_speed_hz: self.max_speed_hz(),
            bits_per_word: self.bits_per_word(),
            mode: self.mode(),
        }
    }

    /// Largest total payload one batch may carry
    pub fn max_transfer_len(&self) -> usize {
        self.max_transfer_len
    }

    /// Run every segment in one kernel call
    ///
    /// Blocks for the duration of the call. On failure the receive buffers
    /// must be treated as garbage.
    pub fn execute_batch(&self, segments: &mut [Segment]) -> Result<()> {
        let count = segments.len();
        self.with_io("transfer", |io| {
            io.message(segments).map_err(|source| Error::TransferFailed {
                segments: count,
                source,
            })
        })
    }

    /// Release the device; later calls are no-ops
    pub fn close(&self) {
        if let Some(io) = self.lock_io().take() {
            self.closed.store(true, Ordering::Release);
            drop(io);
            log::debug!("spiduplex: Closed {}", self.path);
        }
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
