use crate::{PwmChip, ServoBankError, ServoBankResult, FULL_OFF_COUNT, PCA_PWM_RESOLUTION};
use linux_embedded_hal::i2cdev::linux::LinuxI2CError;
use linux_embedded_hal::I2cdev;
use pwm_pca9685::{Address, Channel, Error, OutputDriver, Pca9685 as Pca9685Impl};

const INTERNAL_OSC_HZ: f64 = 25.0 * 1000.0 * 1000.0; // 25 MHz
const MIN_PRESCALE: f64 = 3.0;
const MAX_PRESCALE: f64 = 255.0;

/// [PwmChip] backed by a PCA9685 on a Linux I2C device.
///
/// A simulated chip performs no I/O at all; every command succeeds and is
/// only logged.
pub struct Pca9685Chip {
    device: String,
    address: u8,
    output_type: OutputDriver,
    simulated: bool,
    output_frequency_hz: Option<u16>,
    inner: Option<Pca9685Impl<I2cdev>>,
}

impl Pca9685Chip {
    /// Creates a chip on `device` at `address`. The device is only opened by
    /// [PwmChip::begin].
    pub fn new(device: &str, address: u8, open_drain: bool) -> Pca9685Chip {
        Pca9685Chip::init(device, address, open_drain, false)
    }

    /// Creates a **simulated** chip: commands are logged and have no effect.
    pub fn simulated(device: &str, address: u8, open_drain: bool) -> Pca9685Chip {
        Pca9685Chip::init(device, address, open_drain, true)
    }

    fn init(device: &str, address: u8, open_drain: bool, simulated: bool) -> Pca9685Chip {
        Pca9685Chip {
            device: device.to_owned(),
            address,
            output_type: if open_drain {
                OutputDriver::OpenDrain
            } else {
                OutputDriver::TotemPole
            },
            simulated,
            output_frequency_hz: None,
            inner: None,
        }
    }

    fn driver_error(&self, error: Error<LinuxI2CError>) -> ServoBankError {
        ServoBankError::BusCommunicationError {
            address: self.address,
            msg: format!("{:?}", error),
        }
    }

    fn driver(&mut self) -> ServoBankResult<Option<&mut Pca9685Impl<I2cdev>>> {
        if self.simulated {
            return Ok(None);
        }

        match &mut self.inner {
            Some(inner) => Ok(Some(inner)),
            None => Err(ServoBankError::BusCommunicationError {
                address: self.address,
                msg: String::from("PCA9685 used before begin()"),
            }),
        }
    }

    pub(crate) fn calculate_prescale(output_frequency_hz: u16) -> ServoBankResult<u8> {
        // Per PCA 9685 Datasheet, 7.3.5 PWM frequency PRE_SCALE:
        //    prescale_value = round(internal_osc/(4096 * output_frequency_hz)) - 1
        let value = INTERNAL_OSC_HZ / (PCA_PWM_RESOLUTION as f64 * output_frequency_hz as f64);
        let value = value.round() - 1.0;

        if !(MIN_PRESCALE..=MAX_PRESCALE).contains(&value) {
            return Err(ServoBankError::InvalidConfiguration(format!(
                "Output frequency {}Hz is outside the range of the PCA9685",
                output_frequency_hz
            )));
        }

        Ok(value as u8)
    }
}

impl PwmChip for Pca9685Chip {
    fn address(&self) -> u8 {
        self.address
    }

    fn begin(&mut self) -> ServoBankResult<()> {
        if self.simulated {
            log::info!(target: "pca9685", "{:#04x}: simulated, no I2C device opened", self.address);
            return Ok(());
        }

        log::info!(target: "pca9685", "{:#04x}: opening I2C device {}", self.address, self.device);
        let dev = I2cdev::new(&self.device).map_err(|error| {
            ServoBankError::BusCommunicationError {
                address: self.address,
                msg: format!("Unable to open I2C device {}: {}", self.device, error),
            }
        })?;

        let mut pca = Pca9685Impl::new(dev, Address::from(self.address))
            .map_err(|error| self.driver_error(error))?;
        pca.set_output_driver(self.output_type)
            .map_err(|error| self.driver_error(error))?;
        pca.enable().map_err(|error| self.driver_error(error))?;

        self.inner = Some(pca);

        Ok(())
    }

    fn set_frequency(&mut self, output_frequency_hz: u16) -> ServoBankResult<()> {
        let prescale = Pca9685Chip::calculate_prescale(output_frequency_hz)?;

        match self.output_frequency_hz {
            Some(previous) if previous != output_frequency_hz => log::info!(
                target: "pca9685",
                "{:#04x}: output frequency {}Hz -> {}Hz (pre_scale: {})",
                self.address, previous, output_frequency_hz, prescale
            ),
            _ => log::info!(
                target: "pca9685",
                "{:#04x}: output frequency {}Hz (pre_scale: {})", self.address, output_frequency_hz, prescale
            ),
        }

        let address = self.address;
        let to_error = |error: Error<LinuxI2CError>| ServoBankError::BusCommunicationError {
            address,
            msg: format!("{:?}", error),
        };

        if let Some(pca) = self.driver()? {
            // PRE_SCALE can only be written while the oscillator sleeps
            pca.disable().map_err(to_error)?;
            pca.set_prescale(prescale).map_err(to_error)?;
            pca.enable().map_err(to_error)?;
        }

        self.output_frequency_hz = Some(output_frequency_hz);

        Ok(())
    }

    fn set_pulse(&mut self, channel: u8, on: u16, off: u16) -> ServoBankResult<()> {
        let address = self.address;
        let pca_channel =
            Channel::try_from(channel).map_err(|_| ServoBankError::BusCommunicationError {
                address,
                msg: format!("No such PCA9685 channel: {}", channel),
            })?;

        let result = match self.driver()? {
            Some(pca) if off >= FULL_OFF_COUNT => {
                log::debug!(target: "pca9685", "{:#04x}: setting {:?} to FULL OFF", address, pca_channel);
                pca.set_channel_full_off(pca_channel)
            }
            Some(pca) => {
                log::debug!(
                    target: "pca9685",
                    "{:#04x}: set_channel_on_off({:?}, {}, {})", address, pca_channel, on, off
                );
                pca.set_channel_on_off(pca_channel, on, off)
            }
            None => {
                log::debug!(
                    target: "pca9685",
                    "{:#04x}: simulated set_channel_on_off({:?}, {}, {})", address, pca_channel, on, off
                );
                Ok(())
            }
        };

        result.map_err(|error| ServoBankError::BusCommunicationError {
            address,
            msg: format!("{:?}", error),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{Pca9685Chip, PwmChip, ServoBankError, ServoBankResult, FULL_OFF_COUNT};
    use pwm_pca9685::OutputDriver;

    fn create_mock(open_drain: bool) -> Pca9685Chip {
        Pca9685Chip::simulated("/dev/foo", 0x41, open_drain)
    }

    #[test]
    fn init() {
        let chip = create_mock(false);

        assert_eq!(chip.device, "/dev/foo");
        assert_eq!(chip.address(), 0x41);
        assert_eq!(chip.output_type, OutputDriver::TotemPole);
        assert!(chip.simulated);
        assert_eq!(chip.output_frequency_hz, None);

        assert_eq!(create_mock(true).output_type, OutputDriver::OpenDrain);
    }

    #[test]
    fn calculate_prescale() -> ServoBankResult<()> {
        // per PCA9685 documented example using 200Hz
        assert_eq!(Pca9685Chip::calculate_prescale(200)?, 30);
        assert_eq!(Pca9685Chip::calculate_prescale(60)?, 101);
        assert_eq!(Pca9685Chip::calculate_prescale(50)?, 121);

        Ok(())
    }

    #[test]
    #[should_panic(expected = "outside the range of the PCA9685")]
    fn calculate_prescale_too_fast() {
        Pca9685Chip::calculate_prescale(10_000).unwrap();
    }

    #[test]
    #[should_panic(expected = "outside the range of the PCA9685")]
    fn calculate_prescale_too_slow() {
        Pca9685Chip::calculate_prescale(10).unwrap();
    }

    #[test]
    fn set_frequency() -> ServoBankResult<()> {
        let mut chip = create_mock(false);

        chip.begin()?;
        chip.set_frequency(60)?;

        assert_eq!(chip.output_frequency_hz, Some(60));

        Ok(())
    }

    #[test]
    fn set_frequency_reconfigure() -> ServoBankResult<()> {
        let mut chip = create_mock(false);

        chip.begin()?;
        chip.set_frequency(60)?;
        chip.set_frequency(50)?;

        assert_eq!(chip.output_frequency_hz, Some(50));

        assert!(chip.set_frequency(10).is_err());
        assert_eq!(chip.output_frequency_hz, Some(50));

        Ok(())
    }

    #[test]
    fn set_pulse() -> ServoBankResult<()> {
        let mut chip = create_mock(false);

        chip.begin()?;
        chip.set_pulse(0, 0, 375)?;
        chip.set_pulse(15, 0, FULL_OFF_COUNT)?;

        Ok(())
    }

    #[test]
    #[should_panic(expected = "No such PCA9685 channel: 16")]
    fn set_pulse_no_such_channel() {
        let mut chip = create_mock(false);

        chip.set_pulse(16, 0, 375).unwrap();
    }

    #[test]
    fn set_pulse_before_begin() {
        let mut chip = Pca9685Chip::new("/dev/foo", 0x40, false);

        match chip.set_pulse(0, 0, 375) {
            Err(ServoBankError::BusCommunicationError { address, msg }) => {
                assert_eq!(address, 0x40);
                assert!(msg.contains("before begin()"));
            }
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[test]
    fn begin_missing_device() {
        let mut chip = Pca9685Chip::new("/dev/does-not-exist", 0x40, false);

        assert!(matches!(
            chip.begin(),
            Err(ServoBankError::BusCommunicationError { address: 0x40, .. })
        ));
    }
}
