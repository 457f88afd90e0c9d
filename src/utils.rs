use std::time::Duration;
use std::{fmt, fs};

use crate::{
    BoardSelector, Config, Pca9685Chip, ServoBankError, ServoBankResult, CHANNELS_PER_CHIP,
    DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_OUTPUT_FREQUENCY_HZ, MAX_CHIPS,
};

pub const DEFAULT_DEVICE: &str = "/dev/i2c-1";

impl BoardSelector {
    /// Addresses of the chips of this board, in routing order.
    pub fn chip_addresses(&self) -> Vec<u8> {
        match self {
            BoardSelector::Primary => vec![0x40, 0x41],
        }
    }
}

impl Config {
    /// Default configuration of the given board on [DEFAULT_DEVICE].
    pub fn for_board(board: BoardSelector) -> Config {
        Config {
            device: DEFAULT_DEVICE.to_owned(),
            board,
            chip_addresses: None,
            output_frequency_hz: DEFAULT_OUTPUT_FREQUENCY_HZ,
            open_drain: false,
            bank_size: None,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            idle_sweep_channels: None,
            servos: Vec::new(),
        }
    }

    pub fn load_from_file(path: &str) -> ServoBankResult<Config> {
        let to_error = |msg: String| ServoBankError::ConfigLoadError {
            path: path.to_owned(),
            msg,
        };

        let config = fs::read_to_string(path).map_err(|error| to_error(error.to_string()))?;
        let config: Config =
            serde_yaml::from_str(&config).map_err(|error| to_error(error.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    pub fn chip_addresses(&self) -> Vec<u8> {
        match &self.chip_addresses {
            Some(addresses) => addresses.clone(),
            None => self.board.chip_addresses(),
        }
    }

    pub fn bank_size(&self) -> usize {
        self.bank_size
            .unwrap_or(self.chip_addresses().len() * CHANNELS_PER_CHIP)
    }

    pub fn idle_sweep_channels(&self) -> usize {
        self.idle_sweep_channels.unwrap_or(self.bank_size())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Checks the configuration describes a bank the hardware can provide.
    pub fn validate(&self) -> ServoBankResult<()> {
        let addresses = self.chip_addresses();
        if addresses.is_empty() || addresses.len() > MAX_CHIPS {
            return Err(ServoBankError::InvalidConfiguration(format!(
                "Expected between 1 and {} chips, found {}",
                MAX_CHIPS,
                addresses.len()
            )));
        }
        if addresses.len() == 2 && addresses[0] == addresses[1] {
            return Err(ServoBankError::InvalidConfiguration(format!(
                "Chips share the address {:#04x}",
                addresses[0]
            )));
        }

        let capacity = addresses.len() * CHANNELS_PER_CHIP;
        let bank_size = self.bank_size();
        if bank_size == 0 || bank_size > capacity {
            return Err(ServoBankError::InvalidConfiguration(format!(
                "Bank size {} must be within [1, {}] for {} chip(s)",
                bank_size,
                capacity,
                addresses.len()
            )));
        }

        if self.idle_sweep_channels() > bank_size {
            return Err(ServoBankError::InvalidConfiguration(format!(
                "Idle sweep of {} channels exceeds the bank size ({})",
                self.idle_sweep_channels(),
                bank_size
            )));
        }

        if let Some(servo) = self.servos.iter().find(|servo| servo.index >= bank_size) {
            return Err(ServoBankError::InvalidConfiguration(format!(
                "Servo {} is outside the bank [0,{})",
                servo.index, bank_size
            )));
        }

        Pca9685Chip::calculate_prescale(self.output_frequency_hz)?;

        Ok(())
    }
}

impl fmt::Debug for ServoBankError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

pub mod built_info {
    // The file has been placed there by the build script.
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
