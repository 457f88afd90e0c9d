//! Angle-based control of hobby servos wired to one or two chained PCA9685
//! boards.
//!
//! A [ServoBank] maps a logical servo index onto a driver chip and channel,
//! turns an angle in degrees into a pulse length using a per-servo
//! calibration, and switches off servos which have not been commanded for a
//! while.
use serde::Deserialize;
use std::time::Duration;
use strum::{Display, EnumString};

mod clock;
mod pca9685_chip;
mod servo_bank;
mod servo_channel;
pub mod utils;

#[cfg(test)]
mod testing;

pub use clock::{Clock, MonotonicClock};
pub use pca9685_chip::Pca9685Chip;

/// Number of counts in one PWM cycle of the PCA9685 (12 bit).
pub const PCA_PWM_RESOLUTION: u16 = 4096;

/// Off count the PCA9685 interprets as "always off".
pub const FULL_OFF_COUNT: u16 = PCA_PWM_RESOLUTION;

/// Output channels on a single PCA9685.
pub const CHANNELS_PER_CHIP: usize = 16;

/// Chained chips a single bank may drive.
pub const MAX_CHIPS: usize = 2;

/// Analog servos expect a refresh at roughly 60Hz.
pub const DEFAULT_OUTPUT_FREQUENCY_HZ: u16 = 60;

/// Pulse length (in counts) of an uncalibrated servo, roughly 90 degrees.
pub const NEUTRAL_PULSE_COUNT: u16 = 375;

/// Angle range a calibration spans.
pub const MAX_DEGREES: i32 = 180;

pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 5000;

/// Time the chip oscillators need to stabilise after [ServoBank::setup].
pub const SETTLE_DELAY: Duration = Duration::from_millis(10);

/// Selects the addressing scheme of a physical board.
///
/// Only one scheme exists today: the first chip at `0x40`, the second (if
/// any) at `0x41`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BoardSelector {
    #[default]
    Primary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to I2C device file (e.g, /dev/i2c-1)
    pub device: String,

    /// Addressing scheme used when `chip_addresses` is not given
    #[serde(default)]
    pub board: BoardSelector,

    /// Addresses of the chained PCA9685s (e.g, [0x40, 0x41])
    #[serde(default)]
    pub chip_addresses: Option<Vec<u8>>,

    /// PWM output frequency
    #[serde(default = "default_output_frequency_hz")]
    pub output_frequency_hz: u16,

    /// Open drain (if not set, use Totem pole)
    #[serde(default)]
    pub open_drain: bool,

    /// Number of servos; defaults to every channel of every chip
    #[serde(default)]
    pub bank_size: Option<usize>,

    /// Servos not commanded for this long are switched off
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Only the first `idle_sweep_channels` servos are switched off when idle;
    /// defaults to the whole bank
    #[serde(default)]
    pub idle_sweep_channels: Option<usize>,

    /// Calibrations applied when the bank is created
    #[serde(default)]
    pub servos: Vec<ServoConfig>,
}

/// Calibration of a single servo, as found in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ServoConfig {
    pub index: usize,
    pub min_pulse: u16,
    pub max_pulse: u16,
}

/// Pulse lengths (in counts) matching 0 and 180 degrees.
///
/// `min_pulse > max_pulse` is allowed and reverses the direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoCalibration {
    pub min_pulse: u16,
    pub max_pulse: u16,
}

/// Bookkeeping for one logical servo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoChannel {
    calibration: ServoCalibration,
    last_angle: Option<i32>,
    last_command: Option<Duration>,
}

/// Chip and output channel a logical servo index is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRoute {
    pub chip: usize,
    pub channel: u8,
}

/// The PWM driver chip a [ServoBank] talks to.
pub trait PwmChip {
    /// Bus address of the chip, used for logging and error reporting.
    fn address(&self) -> u8;

    /// Resets the chip and opens the bus connection.
    fn begin(&mut self) -> ServoBankResult<()>;

    /// Sets the refresh rate shared by every channel of the chip.
    fn set_frequency(&mut self, output_frequency_hz: u16) -> ServoBankResult<()>;

    /// Sets one channel's duty cycle. An `off` of [FULL_OFF_COUNT] or more
    /// switches the channel off entirely.
    fn set_pulse(&mut self, channel: u8, on: u16, off: u16) -> ServoBankResult<()>;
}

/// A bank of servos spread across one or two PCA9685 chips.
///
/// The bank owns its chips exclusively. It does no internal locking: calls
/// must come from a single control loop, or be serialised by the caller (for
/// instance behind a `Mutex`) when shared between threads.
pub struct ServoBank {
    chips: Vec<Box<dyn PwmChip>>,
    channels: Vec<ServoChannel>,
    clock: Box<dyn Clock>,
    output_frequency_hz: u16,
    idle_timeout: Duration,
    idle_sweep_channels: usize,
    is_set_up: bool,
}

#[derive(thiserror::Error)]
pub enum ServoBankError {
    #[error("Invalid channel: {index}.  Valid channels are [0,{bank_size}).")]
    InvalidChannel { index: usize, bank_size: usize },

    #[error("Communication with the PCA9685 at {address:#04x} failed: {msg}")]
    BusCommunicationError { address: u8, msg: String },

    #[error("The servo bank must be set up before servos can be commanded.")]
    NotSetUp,

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unable to load configuration file {path}: {msg}")]
    ConfigLoadError { path: String, msg: String },
}

pub type ServoBankResult<T> = Result<T, ServoBankError>;

fn default_output_frequency_hz() -> u16 {
    DEFAULT_OUTPUT_FREQUENCY_HZ
}

fn default_idle_timeout_ms() -> u64 {
    DEFAULT_IDLE_TIMEOUT_MS
}
