//! Transfer engine
//!
//! [`SpiDuplex`] is the public face of the crate. It owns a
//! [`DeviceHandle`], applies the configured defaults at open time and hands
//! batched transfers to a dedicated worker thread, so the calling task's
//! executor keeps running while the ioctl is in flight.
//!
//! # Ordering
//!
//! [`transfer`](SpiDuplex::transfer) validates the batch and enqueues it on
//! the worker's channel before returning. The worker runs one batch at a
//! time, so batches issued from one engine reach the device strictly one
//! after another, in the order `transfer` was called, however their futures
//! are later polled. A batch whose caller stops waiting still runs.
//!
//! # Defaults
//!
//! Overrides are merged with the device settings when
//! [`transfer`](SpiDuplex::transfer) is called, not when the returned future
//! runs. Changing a setting afterwards only affects later calls.

use crate::handle::DeviceHandle;
use crate::segment::{build_batch, TransferSegment};

use spiduplex_core::config::{validate_bits_per_word, validate_speed_hz};
use spiduplex_core::error::{Error, Result};
use spiduplex_core::{mode, DeviceConfig, ExtrasPolicy, Segment, SpiConfig, SpidevIo};

use tokio::sync::{mpsc, oneshot};

use std::future::Future;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type Reply = Result<Vec<Vec<u8>>>;

/// A normalized batch waiting for the worker
struct Job {
    batch: Vec<Segment>,
    reply: oneshot::Sender<Reply>,
}

/// Asynchronous multi-segment SPI transfers on one spidev device
pub struct SpiDuplex {
    handle: Arc<DeviceHandle>,
    jobs: mpsc::UnboundedSender<Job>,
    extras: ExtrasPolicy,
}

impl SpiDuplex {
    /// Open a Linux spidev device with the given configuration
    #[cfg(feature = "linux")]
    pub fn open(config: &SpiConfig) -> Result<Self> {
        config.defaults.validate()?;
        let handle = DeviceHandle::open(&config.device)?;
        Self::configure(handle, config)
    }

    /// Open a device with default settings (1 MHz, 8 bits, mode 0)
    #[cfg(feature = "linux")]
    pub fn open_device(device: &str) -> Result<Self> {
        Self::open(&SpiConfig::new(device))
    }

    /// Build an engine over an already open backend
    ///
    /// `config.device` is only used as a label. If applying the defaults
    /// fails the backend is dropped before the error is returned.
    pub fn with_io(config: &SpiConfig, io: impl SpidevIo + 'static) -> Result<Self> {
        config.defaults.validate()?;
        Self::configure(DeviceHandle::from_io(config.device.as_str(), io), config)
    }

    fn configure(handle: DeviceHandle, config: &SpiConfig) -> Result<Self> {
        let defaults = &config.defaults;
        let applied = handle
            .set_mode(defaults.mode)
            .and_then(|()| handle.set_max_speed_hz(defaults.max_speed_hz))
            .and_then(|()| handle.set_bits_per_word(defaults.bits_per_word));

        if let Err(e) = applied {
            handle.close();
            return Err(e);
        }

        let handle = Arc::new(handle);
        let (jobs, queue) = mpsc::unbounded_channel();
        let worker = Arc::clone(&handle);
        let spawned = thread::Builder::new()
            .name(format!("spiduplex-{}", handle.path()))
            .spawn(move || run_worker(worker, queue));
        if let Err(source) = spawned {
            handle.close();
            return Err(Error::OpenFailed {
                path: handle.path().to_string(),
                source,
            });
        }

        log::info!(
            "spiduplex: Opened {} (mode={}, speed={} kHz, bits={})",
            handle.path(),
            defaults.mode,
            defaults.max_speed_hz / 1000,
            defaults.bits_per_word
        );

        Ok(Self {
            handle,
            jobs,
            extras: config.extras,
        })
    }

    /// Perform a full-duplex transfer of every segment in one kernel call
    ///
    /// Returns one buffer per segment, in input order, each as long as the
    /// segment's payload. Validation and queueing happen before this
    /// returns; the future only waits for the worker's reply.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] if the engine was closed
    /// - [`Error::EmptyBatch`], [`Error::InvalidSegment`],
    ///   [`Error::BatchTooLarge`] for rejected input, with no device access
    /// - [`Error::TransferFailed`] if the ioctl failed; no buffers are returned
    pub fn transfer<I, S>(&self, segments: I) -> impl Future<Output = Reply> + Send + 'static
    where
        I: IntoIterator<Item = S>,
        S: Into<TransferSegment>,
    {
        wait(self.prepare(segments).and_then(|batch| self.submit(batch)))
    }

    /// Like [`transfer`](Self::transfer), giving up waiting after `timeout`
    ///
    /// The kernel call cannot be interrupted: on timeout it still runs to
    /// completion and the next queued batch waits for it.
    pub fn transfer_timeout<I, S>(
        &self,
        segments: I,
        timeout: Duration,
    ) -> impl Future<Output = Reply> + Send + 'static
    where
        I: IntoIterator<Item = S>,
        S: Into<TransferSegment>,
    {
        let reply = self.prepare(segments).and_then(|batch| self.submit(batch));
        with_timeout(wait(reply), timeout)
    }

    fn prepare<I, S>(&self, segments: I) -> Result<Vec<Segment>>
    where
        I: IntoIterator<Item = S>,
        S: Into<TransferSegment>,
    {
        if self.handle.is_closed() {
            return Err(Error::Closed {
                operation: "transfer",
            });
        }
        build_batch(
            segments.into_iter().map(Into::into),
            &self.handle.config(),
            self.extras,
            self.handle.max_transfer_len(),
        )
    }

    fn submit(&self, batch: Vec<Segment>) -> Result<oneshot::Receiver<Reply>> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send(Job { batch, reply })
            .map_err(|_| Error::Closed {
                operation: "transfer",
            })?;
        Ok(response)
    }

    /// Set the SPI mode (0-3, optionally or'ed with [`mode::ModeFlags`])
    ///
    /// Waits for an in-flight transfer to finish before writing.
    pub fn set_mode(&self, mode: u8) -> Result<()> {
        mode::validate_mode(mode)?;
        self.handle.set_mode(mode)
    }

    /// Current SPI mode
    ///
    /// Served from the cache. After [`close`](Self::close) this keeps
    /// returning the last accepted value instead of failing.
    pub fn mode(&self) -> u8 {
        self.handle.mode()
    }

    /// Set the default clock speed in Hz
    pub fn set_max_speed_hz(&self, speed_hz: u32) -> Result<()> {
        validate_speed_hz(speed_hz)?;
        self.handle.set_max_speed_hz(speed_hz)
    }

    /// Current default clock speed in Hz (last accepted value, also after close)
    pub fn max_speed_hz(&self) -> u32 {
        self.handle.max_speed_hz()
    }

    /// Set the default word size
    pub fn set_bits_per_word(&self, bits: u8) -> Result<()> {
        validate_bits_per_word(bits)?;
        self.handle.set_bits_per_word(bits)
    }

    /// Current default word size (last accepted value, also after close)
    pub fn bits_per_word(&self) -> u8 {
        self.handle.bits_per_word()
    }

    /// All current defaults
    pub fn config(&self) -> DeviceConfig {
        self.handle.config()
    }

    /// Device path
    pub fn path(&self) -> &str {
        self.handle.path()
    }

    /// Release the device. Calling this again does nothing.
    ///
    /// Waits for an in-flight transfer to finish. Batches still queued fail
    /// with [`Error::Closed`].
    pub fn close(&self) {
        self.handle.close();
    }

    /// Whether the engine has been closed
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}

/// Drain the queue until every sender is gone
fn run_worker(handle: Arc<DeviceHandle>, mut queue: mpsc::UnboundedReceiver<Job>) {
    while let Some(Job { mut batch, reply }) = queue.blocking_recv() {
        log::debug!(
            "spiduplex: Dispatching {} segment(s) to {}",
            batch.len(),
            handle.path()
        );
        let result = handle
            .execute_batch(&mut batch)
            .map(|()| batch.into_iter().map(Segment::into_rx).collect());
        // The caller may have timed out and dropped its receiver
        let _ = reply.send(result);
    }
    log::debug!("spiduplex: Worker for {} stopped", handle.path());
}

async fn wait(response: Result<oneshot::Receiver<Reply>>) -> Reply {
    response?.await.map_err(|_| Error::Closed {
        operation: "transfer",
    })?
}

fn with_timeout<T>(
    transfer: impl Future<Output = Result<T>>,
    timeout: Duration,
) -> impl Future<Output = Result<T>> {
    async move {
        tokio::time::timeout(timeout, transfer)
            .await
            .map_err(|_| Error::Timeout(timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Transfer;
    use spiduplex_core::ErrorKind;
    use spiduplex_dummy::{Call, DummyConfig, DummySpi, Recorder};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn engine_with(config: SpiConfig, dummy: DummyConfig) -> (SpiDuplex, Recorder) {
        init_logger();
        let spi = DummySpi::new(dummy);
        let recorder = spi.recorder();
        let engine = SpiDuplex::with_io(&config, spi).unwrap();
        recorder.clear();
        (engine, recorder)
    }

    fn engine() -> (SpiDuplex, Recorder) {
        engine_with(SpiConfig::new("/dev/spidev0.0"), DummyConfig::default())
    }

    #[test]
    fn test_open_applies_defaults() {
        let spi = DummySpi::new_default();
        let recorder = spi.recorder();
        let engine = SpiDuplex::with_io(&SpiConfig::new("/dev/spidev0.0"), spi).unwrap();

        assert_eq!(
            recorder.calls(),
            vec![
                Call::WriteMode(0),
                Call::WriteMaxSpeedHz(1_000_000),
                Call::WriteBitsPerWord(8),
            ]
        );
        assert_eq!(engine.mode(), 0);
        assert_eq!(engine.max_speed_hz(), 1_000_000);
        assert_eq!(engine.bits_per_word(), 8);
        assert_eq!(engine.path(), "/dev/spidev0.0");
    }

    #[test]
    fn test_failed_configuration_closes_handle() {
        let spi = DummySpi::new_default();
        let recorder = spi.recorder();
        let config = SpiConfig::new("/dev/spidev0.0").with_bits_per_word(12);

        let err = SpiDuplex::with_io(&config, spi).err().unwrap();
        assert!(matches!(err, Error::SetBitsPerWordFailed { bits: 12, .. }));
        assert!(recorder.is_closed());
    }

    #[test]
    fn test_invalid_defaults_never_touch_device() {
        let spi = DummySpi::new_default();
        let recorder = spi.recorder();
        let config = SpiConfig::new("/dev/spidev0.0").with_speed(0);

        let err = SpiDuplex::with_io(&config, spi).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(recorder.call_count(), 0);
    }

    #[tokio::test]
    async fn test_simple_payloads_keep_order_and_length() {
        let (spi, recorder) = engine();
        let payloads: Vec<Vec<u8>> = vec![vec![0x10, 0x11, 0x12], vec![0x20], vec![0x30, 0x31]];

        let rx = spi.transfer(payloads.clone()).await.unwrap();

        assert_eq!(rx, payloads);
        assert_eq!(recorder.messages().len(), 1);
        assert_eq!(recorder.messages()[0].len(), 3);
    }

    #[tokio::test]
    async fn test_mixed_segments_scenario() {
        let (spi, recorder) = engine();

        let rx = spi
            .transfer([
                TransferSegment::from(vec![0x01u8, 0x02]),
                Transfer::new(vec![0x03u8, 0x04]).with_speed_hz(500_000).into(),
            ])
            .await
            .unwrap();

        assert_eq!(rx, vec![vec![0x01u8, 0x02], vec![0x03u8, 0x04]]);

        let messages = recorder.messages();
        assert_eq!(messages.len(), 1);
        let records = &messages[0];
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].speed_hz, 1_000_000);
        assert_eq!(records[1].speed_hz, 500_000);
        assert_eq!(records[0].len, 2);
        assert_eq!(records[1].len, 2);
        assert!(records.iter().all(|r| r.bits_per_word == 8));
    }

    #[tokio::test]
    async fn test_overrides_and_call_time_defaults() {
        let (spi, recorder) = engine();

        let first = spi.transfer([vec![0xAAu8]]);
        spi.set_max_speed_hz(4_000_000).unwrap();
        spi.set_bits_per_word(16).unwrap();
        let second = spi.transfer([
            TransferSegment::from(vec![0xBBu8, 0xBB]),
            Transfer::new(vec![0xCCu8, 0xCC])
                .with_speed_hz(250_000)
                .with_delay_usecs(20)
                .with_cs_change(true)
                .into(),
        ]);

        first.await.unwrap();
        second.await.unwrap();

        let messages = recorder.messages();
        assert_eq!(messages.len(), 2);

        // Merged before the setters ran
        assert_eq!(messages[0][0].speed_hz, 1_000_000);
        assert_eq!(messages[0][0].bits_per_word, 8);

        assert_eq!(messages[1][0].speed_hz, 4_000_000);
        assert_eq!(messages[1][0].bits_per_word, 16);
        assert_eq!(messages[1][0].delay_usecs, 0);
        assert_eq!(messages[1][0].cs_change, 0);

        assert_eq!(messages[1][1].speed_hz, 250_000);
        assert_eq!(messages[1][1].bits_per_word, 16);
        assert_eq!(messages[1][1].delay_usecs, 20);
        assert_eq!(messages[1][1].cs_change, 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let (spi, recorder) = engine();

        let err = spi.transfer(Vec::<TransferSegment>::new()).await.unwrap_err();
        assert!(matches!(err, Error::EmptyBatch));
        assert_eq!(recorder.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_payload_rejects_whole_batch() {
        let (spi, recorder) = engine();

        let err = spi
            .transfer([
                TransferSegment::from(vec![0x01u8]),
                TransferSegment::from(vec![0x02u8]),
                Transfer::default().with_speed_hz(500_000).into(),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidSegment { index: 2, .. }));
        assert!(err.to_string().contains("segment 2"));
        assert_eq!(recorder.call_count(), 0);
    }

    #[tokio::test]
    async fn test_os_failure_returns_no_buffers() {
        let (spi, recorder) = engine();
        recorder.fail_next_message(5);

        let err = spi
            .transfer([vec![0x01u8], vec![0x02u8, 0x03]])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transfer);
        assert_eq!(err.os_error(), Some(5));
        assert!(matches!(err, Error::TransferFailed { segments: 2, .. }));
        assert_eq!(recorder.messages().len(), 1);

        // No implicit retry; the next call goes through normally
        let rx = spi.transfer([vec![0x04u8]]).await.unwrap();
        assert_eq!(rx, vec![vec![0x04u8]]);
        assert_eq!(recorder.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_set_then_get_mode_uses_cache() {
        let (spi, recorder) = engine();

        spi.set_mode(2).unwrap();
        let calls_after_set = recorder.call_count();
        assert_eq!(spi.mode(), 2);
        assert_eq!(spi.mode(), 2);
        assert_eq!(recorder.call_count(), calls_after_set);
        assert_eq!(recorder.calls(), vec![Call::WriteMode(2)]);
    }

    #[tokio::test]
    async fn test_rejected_setter_keeps_previous_value() {
        let (spi, recorder) = engine();

        let err = spi.set_max_speed_hz(100_000_000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(spi.max_speed_hz(), 1_000_000);

        let err = spi.set_bits_per_word(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(recorder.call_count(), 1);

        // Handle is still usable
        assert_eq!(spi.transfer([vec![0x5Au8]]).await.unwrap(), vec![vec![0x5Au8]]);
    }

    #[tokio::test]
    async fn test_batch_larger_than_kernel_buffer() {
        let dummy = DummyConfig {
            max_transfer_len: 8,
            ..Default::default()
        };
        let (spi, recorder) = engine_with(SpiConfig::new("/dev/spidev0.0"), dummy);

        let err = spi.transfer([vec![0u8; 5], vec![0u8; 4]]).await.unwrap_err();
        assert!(matches!(err, Error::BatchTooLarge { .. }));
        assert_eq!(recorder.call_count(), 0);
    }

    #[tokio::test]
    async fn test_extras_policy_reject() {
        let config = SpiConfig::new("/dev/spidev0.0").with_extras(ExtrasPolicy::Reject);
        let (spi, recorder) = engine_with(config, DummyConfig::default());

        let err = spi
            .transfer([Transfer::new(vec![0x01u8]).with_tx_nbits(2)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSegment { index: 0, .. }));
        assert_eq!(recorder.call_count(), 0);
    }

    #[tokio::test]
    async fn test_forwarded_extras_rejected_by_controller() {
        let (spi, recorder) = engine();

        let err = spi
            .transfer([Transfer::new(vec![0x01u8]).with_rx_nbits(4)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transfer);
        assert_eq!(recorder.messages()[0][0].rx_nbits, 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overlapping_calls_complete_in_order() {
        let dummy = DummyConfig {
            latency: Duration::from_millis(20),
            ..Default::default()
        };
        let (spi, recorder) = engine_with(SpiConfig::new("/dev/spidev0.0"), dummy);

        let (a, b, c) = tokio::join!(
            spi.transfer([vec![0x0Au8]]),
            spi.transfer([vec![0x0Bu8]]),
            spi.transfer([vec![0x0Cu8]]),
        );

        assert_eq!(a.unwrap(), vec![vec![0x0Au8]]);
        assert_eq!(b.unwrap(), vec![vec![0x0Bu8]]);
        assert_eq!(c.unwrap(), vec![vec![0x0Cu8]]);
        assert_eq!(
            recorder.transmitted(),
            vec![vec![vec![0x0Au8]], vec![vec![0x0Bu8]], vec![vec![0x0Cu8]]]
        );
    }

    #[tokio::test]
    async fn test_issue_order_wins_over_await_order() {
        let dummy = DummyConfig {
            latency: Duration::from_millis(20),
            ..Default::default()
        };
        let (spi, recorder) = engine_with(SpiConfig::new("/dev/spidev0.0"), dummy);

        let first = spi.transfer([vec![0x01u8]]);
        let second = spi.transfer([vec![0x02u8]]);

        assert_eq!(second.await.unwrap(), vec![vec![0x02u8]]);
        assert_eq!(first.await.unwrap(), vec![vec![0x01u8]]);
        assert_eq!(
            recorder.transmitted(),
            vec![vec![vec![0x01u8]], vec![vec![0x02u8]]]
        );
    }

    #[tokio::test]
    async fn test_unpolled_transfer_still_runs_first() {
        let (spi, recorder) = engine();

        let abandoned = spi.transfer([vec![0x0Au8]]);
        let rx = spi.transfer([vec![0x0Bu8]]).await.unwrap();
        assert_eq!(rx, vec![vec![0x0Bu8]]);
        drop(abandoned);

        assert_eq!(
            recorder.transmitted(),
            vec![vec![vec![0x0Au8]], vec![vec![0x0Bu8]]]
        );
    }

    #[cfg(feature = "linux")]
    #[test]
    fn test_open_missing_device() {
        init_logger();
        let err = SpiDuplex::open_device("/dev/spidev-does-not-exist.0")
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::DeviceOpen);
        assert!(matches!(err, Error::OpenFailed { .. }));

        let err = SpiDuplex::open(&SpiConfig::new("")).err().unwrap();
        assert!(matches!(err, Error::NoDevice));
        assert_eq!(err.kind(), ErrorKind::DeviceOpen);
    }

    #[tokio::test]
    async fn test_transfer_from_spawned_task() {
        let (spi, _recorder) = engine();
        let spi = Arc::new(spi);

        let task = tokio::spawn({
            let spi = Arc::clone(&spi);
            async move { spi.transfer([vec![0x42u8, 0x43]]).await }
        });

        assert_eq!(task.await.unwrap().unwrap(), vec![vec![0x42u8, 0x43]]);
    }

    #[tokio::test]
    async fn test_timeout_wraps_completion() {
        let dummy = DummyConfig {
            latency: Duration::from_millis(200),
            ..Default::default()
        };
        let (spi, recorder) = engine_with(SpiConfig::new("/dev/spidev0.0"), dummy);

        let err = spi
            .transfer_timeout([vec![0x01u8]], Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        // The abandoned call still reached the device and finishes first
        let rx = spi.transfer([vec![0x02u8]]).await.unwrap();
        assert_eq!(rx, vec![vec![0x02u8]]);
        assert_eq!(
            recorder.transmitted(),
            vec![vec![vec![0x01u8]], vec![vec![0x02u8]]]
        );
    }

    #[tokio::test]
    async fn test_closed_engine() {
        let (spi, recorder) = engine();

        spi.set_mode(3).unwrap();
        spi.close();
        spi.close();
        assert!(spi.is_closed());
        assert!(recorder.is_closed());
        recorder.clear();

        // Getters keep reporting the last accepted values
        assert_eq!(spi.mode(), 3);
        assert_eq!(spi.max_speed_hz(), 1_000_000);
        assert_eq!(spi.bits_per_word(), 8);

        let err = spi.transfer([vec![0x01u8]]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Closed);
        assert!(matches!(spi.set_mode(1), Err(Error::Closed { .. })));
        assert_eq!(recorder.call_count(), 0);
    }
}
