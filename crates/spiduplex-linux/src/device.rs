//! Linux spidev device implementation
//!
//! This module provides the `Spidev` struct that implements the `SpidevIo`
//! trait using Linux's spidev interface.

use spiduplex_core::descriptor::{encode_batch, MAX_SEGMENTS};
use spiduplex_core::error::{Error, Result};
use spiduplex_core::{Segment, SpidevIo, TransferDescriptor};

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;

/// Path to kernel spidev buffer size parameter
const BUF_SIZE_SYSFS: &str = "/sys/module/spidev/parameters/bufsiz";

/// Linux spidev ioctl constants
mod ioctl {
    use nix::{ioctl_write_buf, ioctl_write_ptr};

    // SPI ioctl magic number
    const SPI_IOC_MAGIC: u8 = b'k';

    // SPI ioctl type numbers
    const SPI_IOC_TYPE_MESSAGE: u8 = 0;
    const SPI_IOC_TYPE_MODE: u8 = 1;
    const SPI_IOC_TYPE_BITS_PER_WORD: u8 = 3;
    const SPI_IOC_TYPE_MAX_SPEED_HZ: u8 = 4;

    ioctl_write_ptr!(spi_ioc_wr_mode, SPI_IOC_MAGIC, SPI_IOC_TYPE_MODE, u8);
    ioctl_write_ptr!(
        spi_ioc_wr_bits_per_word,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_BITS_PER_WORD,
        u8
    );
    ioctl_write_ptr!(
        spi_ioc_wr_max_speed_hz,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_MAX_SPEED_HZ,
        u32
    );

    // SPI_IOC_MESSAGE(n) = _IOW(SPI_IOC_MAGIC, 0, char[n * sizeof(struct spi_ioc_transfer)])
    // The buffer passed in is the serialized record array, so its byte length
    // is exactly the size the kernel expects in the request code.
    ioctl_write_buf!(
        spi_ioc_message,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_MESSAGE,
        u8
    );
}

fn errno_to_io(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

/// An open `/dev/spidevX.Y` character device
///
/// The device is opened read/write and exclusively `flock`ed for the
/// lifetime of this value.
pub struct Spidev {
    /// File handle for spidev device
    file: File,
    /// Maximum kernel buffer size
    max_kernel_buf_size: usize,
}

impl Spidev {
    /// Open a spidev device and take an exclusive, non-blocking lock on it
    pub fn open(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(Error::NoDevice);
        }

        log::debug!("linux_spi: Opening device {}", path);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::OpenFailed {
                path: path.to_string(),
                source: e,
            })?;

        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // `file` is dropped here, closing the descriptor
            return if err.kind() == io::ErrorKind::WouldBlock {
                Err(Error::Locked {
                    path: path.to_string(),
                })
            } else {
                Err(Error::OpenFailed {
                    path: path.to_string(),
                    source: err,
                })
            };
        }

        let max_kernel_buf_size = get_max_kernel_buf_size();
        log::debug!(
            "linux_spi: Max kernel buffer size: {} bytes",
            max_kernel_buf_size
        );

        Ok(Self {
            file,
            max_kernel_buf_size,
        })
    }
}

impl SpidevIo for Spidev {
    fn write_mode(&mut self, mode: u8) -> io::Result<()> {
        unsafe { ioctl::spi_ioc_wr_mode(self.file.as_raw_fd(), &mode) }.map_err(errno_to_io)?;
        Ok(())
    }

    fn write_max_speed_hz(&mut self, speed_hz: u32) -> io::Result<()> {
        unsafe { ioctl::spi_ioc_wr_max_speed_hz(self.file.as_raw_fd(), &speed_hz) }
            .map_err(errno_to_io)?;
        Ok(())
    }

    fn write_bits_per_word(&mut self, bits: u8) -> io::Result<()> {
        unsafe { ioctl::spi_ioc_wr_bits_per_word(self.file.as_raw_fd(), &bits) }
            .map_err(errno_to_io)?;
        Ok(())
    }

    fn message(&mut self, segments: &mut [Segment]) -> io::Result<()> {
        if segments.is_empty() || segments.len() > MAX_SEGMENTS {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }

        let descriptors: Vec<TransferDescriptor> =
            segments.iter_mut().map(Segment::descriptor).collect();
        let records = encode_batch(&descriptors);

        // The records hold raw addresses of the segments' buffers; `segments`
        // stays mutably borrowed, so nothing can free or move them during the
        // call.
        let ret = unsafe { ioctl::spi_ioc_message(self.file.as_raw_fd(), &records) }
            .map_err(errno_to_io)?;

        log::trace!(
            "linux_spi: SPI_IOC_MESSAGE({}) moved {} bytes",
            segments.len(),
            ret
        );
        Ok(())
    }

    fn max_transfer_len(&self) -> usize {
        self.max_kernel_buf_size
    }
}

/// Read the maximum kernel buffer size from sysfs, or use page size as fallback
fn get_max_kernel_buf_size() -> usize {
    // Try to read from sysfs
    if let Ok(content) = std::fs::read_to_string(BUF_SIZE_SYSFS) {
        if let Ok(size) = content.trim().parse::<usize>() {
            if size > 0 {
                log::debug!("linux_spi: Using buffer size {} from sysfs", size);
                return size;
            }
        }
        log::warn!("linux_spi: Invalid buffer size in {}", BUF_SIZE_SYSFS);
    } else {
        log::debug!("linux_spi: Cannot read {}, using page size", BUF_SIZE_SYSFS);
    }

    // Fall back to page size
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    log::debug!("linux_spi: Using page size {} as buffer size", page_size);
    page_size
}
