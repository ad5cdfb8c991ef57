//! Device configuration, validation and option parsing

use crate::error::{Error, Result};
use crate::mode;

/// Default SPI clock speed in Hz (1 MHz)
pub const DEFAULT_SPEED_HZ: u32 = 1_000_000;

/// Default word size
pub const DEFAULT_BITS_PER_WORD: u8 = 8;

/// Largest word size the spidev interface accepts
pub const MAX_BITS_PER_WORD: u8 = 32;

/// Line counts accepted for `tx_nbits` / `rx_nbits` (single, dual, quad, octal)
pub const VALID_NBITS: [u8; 4] = [1, 2, 4, 8];

/// The three settings the kernel tracks per spidev handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Maximum clock speed in Hz
    pub max_speed_hz: u32,
    /// Bits per word
    pub bits_per_word: u8,
    /// SPI mode byte (clock mode plus optional flags)
    pub mode: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            max_speed_hz: DEFAULT_SPEED_HZ,
            bits_per_word: DEFAULT_BITS_PER_WORD,
            mode: mode::MODE_0,
        }
    }
}

impl DeviceConfig {
    /// Validate every field
    pub fn validate(&self) -> Result<()> {
        validate_speed_hz(self.max_speed_hz)?;
        validate_bits_per_word(self.bits_per_word)?;
        mode::validate_mode(self.mode)?;
        Ok(())
    }
}

/// What to do with the rarely supported per-segment fields
/// (`word_delay_usecs`, `tx_nbits`, `rx_nbits`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtrasPolicy {
    /// Pass them to the kernel and let the controller driver decide
    #[default]
    Forward,
    /// Refuse any segment that sets one of them
    Reject,
    /// Clear them and log a warning
    Ignore,
}

impl std::str::FromStr for ExtrasPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "forward" => Ok(Self::Forward),
            "reject" => Ok(Self::Reject),
            "ignore" => Ok(Self::Ignore),
            _ => Err(Error::InvalidParameter(format!(
                "Invalid extras policy: {} (expected forward, reject or ignore)",
                s
            ))),
        }
    }
}

/// Configuration for opening a spidev device
#[derive(Debug, Clone, Default)]
pub struct SpiConfig {
    /// Device path (e.g., "/dev/spidev0.0")
    pub device: String,
    /// Defaults applied to the handle at open time
    pub defaults: DeviceConfig,
    /// Handling of platform-specific segment fields
    pub extras: ExtrasPolicy,
}

impl SpiConfig {
    /// Create a new configuration with the given device path
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    /// Set the SPI clock speed in Hz
    pub fn with_speed(mut self, speed_hz: u32) -> Self {
        self.defaults.max_speed_hz = speed_hz;
        self
    }

    /// Set the bits per word
    pub fn with_bits_per_word(mut self, bits: u8) -> Self {
        self.defaults.bits_per_word = bits;
        self
    }

    /// Set the SPI mode (0-3, optionally or'ed with [`mode::ModeFlags`])
    pub fn with_mode(mut self, mode: u8) -> Self {
        self.defaults.mode = mode;
        self
    }

    /// Set the policy for platform-specific segment fields
    pub fn with_extras(mut self, extras: ExtrasPolicy) -> Self {
        self.extras = extras;
        self
    }
}

/// Reject a zero clock speed
pub fn validate_speed_hz(speed_hz: u32) -> Result<()> {
    if speed_hz == 0 {
        return Err(Error::InvalidParameter(
            "max_speed_hz must be greater than 0".into(),
        ));
    }
    Ok(())
}

/// Reject word sizes outside 1..=32
pub fn validate_bits_per_word(bits: u8) -> Result<()> {
    if bits == 0 || bits > MAX_BITS_PER_WORD {
        return Err(Error::InvalidParameter(format!(
            "bits_per_word must be between 1 and {}, got {}",
            MAX_BITS_PER_WORD, bits
        )));
    }
    if !matches!(bits, 8 | 16 | 32) {
        log::debug!("spiduplex: bits_per_word={} is unconventional", bits);
    }
    Ok(())
}

/// Reject line counts other than 1, 2, 4 or 8
pub fn validate_nbits(nbits: u8) -> std::result::Result<(), String> {
    if VALID_NBITS.contains(&nbits) {
        Ok(())
    } else {
        Err(format!("must be one of {:?}, got {}", VALID_NBITS, nbits))
    }
}

/// Parse configuration from a list of key-value pairs
///
/// Recognised keys:
///
/// - `dev=/dev/spidev0.0` - Required: device path
/// - `speed=1000000` - clock speed in Hz
/// - `spispeed=1000` - clock speed in kHz
/// - `bits=8` - bits per word
/// - `mode=0` - SPI mode byte
/// - `extras=forward|reject|ignore` - platform-specific field policy
pub fn parse_options(options: &[(&str, &str)]) -> Result<SpiConfig> {
    let mut config = SpiConfig::default();

    for (key, value) in options {
        match *key {
            "dev" => {
                config.device = value.to_string();
            }
            "speed" => {
                config.defaults.max_speed_hz = parse_number(key, value)?;
            }
            "spispeed" => {
                let speed_khz: u32 = parse_number(key, value)?;
                config.defaults.max_speed_hz = speed_khz.checked_mul(1000).ok_or_else(|| {
                    Error::InvalidParameter(format!("spispeed out of range: {}", value))
                })?;
            }
            "bits" => {
                config.defaults.bits_per_word = parse_number(key, value)?;
            }
            "mode" => {
                config.defaults.mode = parse_number(key, value)?;
            }
            "extras" => {
                config.extras = value.parse()?;
            }
            _ => {
                log::warn!("spiduplex: Unknown option: {}={}", key, value);
            }
        }
    }

    if config.device.is_empty() {
        return Err(Error::NoDevice);
    }
    config.defaults.validate()?;

    Ok(config)
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidParameter(format!("Invalid {} value: {}", key, value)))
}
