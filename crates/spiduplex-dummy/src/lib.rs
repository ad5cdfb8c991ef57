//! spiduplex-dummy - In-memory loopback spidev backend for testing
//!
//! This crate provides a dummy backend that behaves like a spidev controller
//! with MOSI wired to MISO: every transmitted byte is received back. Every
//! call is recorded so tests can check exactly what reached the "kernel",
//! and failures can be injected. It's useful for testing and development
//! without real hardware.

use spiduplex_core::mode::ModeFlags;
use spiduplex_core::{Segment, SpidevIo, TransferDescriptor};

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Controller limits emulated by the dummy
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Largest total payload per message
    pub max_transfer_len: usize,
    /// Highest clock speed the controller accepts
    pub max_speed_hz: u32,
    /// Word sizes the controller supports
    pub supported_bits: Vec<u8>,
    /// Mode flags the controller supports
    pub supported_modes: ModeFlags,
    /// Whether dual/quad/octal transfers are supported
    pub multi_io: bool,
    /// Time each message takes
    pub latency: Duration,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            max_transfer_len: 4096,
            max_speed_hz: 50_000_000,
            supported_bits: vec![8, 16, 32],
            supported_modes: ModeFlags::CPHA
                | ModeFlags::CPOL
                | ModeFlags::CS_HIGH
                | ModeFlags::LSB_FIRST
                | ModeFlags::LOOP,
            multi_io: false,
            latency: Duration::ZERO,
        }
    }
}

/// One call that reached the dummy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `SPI_IOC_WR_MODE`
    WriteMode(u8),
    /// `SPI_IOC_WR_MAX_SPEED_HZ`
    WriteMaxSpeedHz(u32),
    /// `SPI_IOC_WR_BITS_PER_WORD`
    WriteBitsPerWord(u8),
    /// `SPI_IOC_MESSAGE(N)` with its records and transmitted payloads
    Message {
        descriptors: Vec<TransferDescriptor>,
        tx: Vec<Vec<u8>>,
    },
}

#[derive(Debug, Default)]
struct Recording {
    calls: Vec<Call>,
    fail_next_message: Option<i32>,
    dropped: bool,
}

/// Shared view of everything a [`DummySpi`] has seen
///
/// Cloning is cheap; all clones observe the same recording, so a test can
/// keep one after handing the dummy to the engine.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    inner: Arc<Mutex<Recording>>,
}

impl Recorder {
    fn lock(&self) -> MutexGuard<'_, Recording> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All calls, oldest first
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of calls of any kind
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Records of every `SPI_IOC_MESSAGE` call, oldest first
    pub fn messages(&self) -> Vec<Vec<TransferDescriptor>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Message { descriptors, .. } => Some(descriptors.clone()),
                _ => None,
            })
            .collect()
    }

    /// Transmitted payloads of every `SPI_IOC_MESSAGE` call, oldest first
    pub fn transmitted(&self) -> Vec<Vec<Vec<u8>>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Message { tx, .. } => Some(tx.clone()),
                _ => None,
            })
            .collect()
    }

    /// Make the next message fail with the given errno
    pub fn fail_next_message(&self, errno: i32) {
        self.lock().fail_next_message = Some(errno);
    }

    /// Forget all recorded calls
    pub fn clear(&self) {
        self.lock().calls.clear();
    }

    /// Whether the dummy has been dropped (the device "closed")
    pub fn is_closed(&self) -> bool {
        self.lock().dropped
    }
}

/// Loopback spidev backend
pub struct DummySpi {
    config: DummyConfig,
    recorder: Recorder,
}

impl DummySpi {
    /// Create a new dummy with the given limits
    pub fn new(config: DummyConfig) -> Self {
        Self {
            config,
            recorder: Recorder::default(),
        }
    }

    /// Create a new dummy with default limits
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Get a handle on the call recording
    pub fn recorder(&self) -> Recorder {
        self.recorder.clone()
    }

    /// Get the configuration
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    fn check_segment(&self, segment: &Segment) -> io::Result<()> {
        let settings = segment.settings();
        let multi = settings.tx_nbits > 1 || settings.rx_nbits > 1;
        if !self.config.supported_bits.contains(&settings.bits_per_word)
            || settings.speed_hz > self.config.max_speed_hz
            || (multi && !self.config.multi_io)
        {
            return Err(einval());
        }
        Ok(())
    }
}

fn einval() -> io::Error {
    io::Error::from_raw_os_error(EINVAL)
}

const EINVAL: i32 = 22;
const EMSGSIZE: i32 = 90;

impl SpidevIo for DummySpi {
    fn write_mode(&mut self, mode: u8) -> io::Result<()> {
        self.recorder.lock().calls.push(Call::WriteMode(mode));
        if !self.config.supported_modes.contains(ModeFlags::from_bits_retain(mode)) {
            return Err(einval());
        }
        Ok(())
    }

    fn write_max_speed_hz(&mut self, speed_hz: u32) -> io::Result<()> {
        self.recorder.lock().calls.push(Call::WriteMaxSpeedHz(speed_hz));
        if speed_hz == 0 || speed_hz > self.config.max_speed_hz {
            return Err(einval());
        }
        Ok(())
    }

    fn write_bits_per_word(&mut self, bits: u8) -> io::Result<()> {
        self.recorder.lock().calls.push(Call::WriteBitsPerWord(bits));
        if !self.config.supported_bits.contains(&bits) {
            return Err(einval());
        }
        Ok(())
    }

    fn message(&mut self, segments: &mut [Segment]) -> io::Result<()> {
        let descriptors = segments.iter_mut().map(Segment::descriptor).collect();
        let tx = segments.iter().map(|s| s.tx().to_vec()).collect();

        let fail = {
            let mut rec = self.recorder.lock();
            rec.calls.push(Call::Message { descriptors, tx });
            rec.fail_next_message.take()
        };

        if !self.config.latency.is_zero() {
            std::thread::sleep(self.config.latency);
        }

        if let Some(errno) = fail {
            log::debug!("dummy_spi: Injected failure errno={}", errno);
            return Err(io::Error::from_raw_os_error(errno));
        }

        let total: usize = segments.iter().map(Segment::len).sum();
        if total > self.config.max_transfer_len {
            return Err(io::Error::from_raw_os_error(EMSGSIZE));
        }
        for segment in segments.iter() {
            self.check_segment(segment)?;
        }

        for segment in segments.iter_mut() {
            let tx = segment.tx().to_vec();
            segment.rx_mut().copy_from_slice(&tx);
        }
        Ok(())
    }

    fn max_transfer_len(&self) -> usize {
        self.config.max_transfer_len
    }
}

impl Drop for DummySpi {
    fn drop(&mut self) {
        self.recorder.lock().dropped = true;
    }
}
