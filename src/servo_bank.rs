use std::thread;
use std::time::Duration;

use crate::servo_channel::off_count;
use crate::{
    ChannelRoute, Clock, Config, MonotonicClock, Pca9685Chip, PwmChip, ServoBank, ServoBankError,
    ServoBankResult, ServoCalibration, ServoChannel, FULL_OFF_COUNT, SETTLE_DELAY,
};

impl ServoBank {
    /// Creates a new [ServoBank] driving the PCA9685s described by [Config].
    /// No I2C traffic happens before [ServoBank::setup].
    pub fn new(config: &Config) -> ServoBankResult<ServoBank> {
        let chips = config
            .chip_addresses()
            .into_iter()
            .map(|address| {
                Box::new(Pca9685Chip::new(&config.device, address, config.open_drain))
                    as Box<dyn PwmChip>
            })
            .collect();

        ServoBank::init(config, chips, Box::new(MonotonicClock::new()))
    }

    /// Creates a **mock** [ServoBank] utilizing the given [Config]. Commands
    /// are tracked as usual but never reach an I2C device.
    pub fn mock(config: &Config) -> ServoBankResult<ServoBank> {
        let chips = config
            .chip_addresses()
            .into_iter()
            .map(|address| {
                Box::new(Pca9685Chip::simulated(
                    &config.device,
                    address,
                    config.open_drain,
                )) as Box<dyn PwmChip>
            })
            .collect();

        ServoBank::init(config, chips, Box::new(MonotonicClock::new()))
    }

    /// Creates a [ServoBank] on top of already constructed chips, one per
    /// address of [Config::chip_addresses], and an arbitrary [Clock].
    pub fn with_chips(
        config: &Config,
        chips: Vec<Box<dyn PwmChip>>,
        clock: Box<dyn Clock>,
    ) -> ServoBankResult<ServoBank> {
        if chips.len() != config.chip_addresses().len() {
            return Err(ServoBankError::InvalidConfiguration(format!(
                "Expected {} chip(s), got {}",
                config.chip_addresses().len(),
                chips.len()
            )));
        }

        ServoBank::init(config, chips, clock)
    }

    fn init(
        config: &Config,
        chips: Vec<Box<dyn PwmChip>>,
        clock: Box<dyn Clock>,
    ) -> ServoBankResult<ServoBank> {
        config.validate()?;

        let bank_size = config.bank_size();
        let addresses: Vec<String> = chips
            .iter()
            .map(|chip| format!("{:#04x}", chip.address()))
            .collect();

        log::info!(target: "servobank", "Device:           {}", config.device);
        log::info!(target: "servobank", "Board:            {}", config.board);
        log::info!(target: "servobank", "Chips:            {}", addresses.join(", "));
        log::info!(target: "servobank", "Output frequency: {}Hz", config.output_frequency_hz);
        log::info!(target: "servobank", "Servos:           {}", bank_size);
        log::info!(target: "servobank", "Idle timeout:     {}ms", config.idle_timeout_ms);
        log::info!(target: "servobank", "Idle sweep:       [0, {})", config.idle_sweep_channels());

        let mut bank = ServoBank {
            chips,
            channels: vec![ServoChannel::UNCOMMANDED; bank_size],
            clock,
            output_frequency_hz: config.output_frequency_hz,
            idle_timeout: config.idle_timeout(),
            idle_sweep_channels: config.idle_sweep_channels(),
            is_set_up: false,
        };

        for servo in &config.servos {
            bank.calibrate(Some(servo.index), servo.min_pulse, servo.max_pulse)?;
        }

        Ok(bank)
    }

    /// Number of servos in the bank.
    pub fn bank_size(&self) -> usize {
        self.channels.len()
    }

    pub fn chip_count(&self) -> usize {
        self.chips.len()
    }

    pub fn output_frequency_hz(&self) -> u16 {
        self.output_frequency_hz
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn is_set_up(&self) -> bool {
        self.is_set_up
    }

    /// Resets every chip and sets its output frequency, then waits for the
    /// oscillators to settle. Must be called before any servo is commanded.
    ///
    /// Error conditions:
    /// * [ServoBankError::BusCommunicationError] if a chip can't be reached
    pub fn setup(&mut self) -> ServoBankResult<()> {
        for chip in self.chips.iter_mut() {
            log::info!(target: "servobank", "Setting up PCA9685 at {:#04x}", chip.address());

            chip.begin()?;
            chip.set_frequency(self.output_frequency_hz)?;
        }

        thread::sleep(SETTLE_DELAY);
        self.is_set_up = true;

        Ok(())
    }

    /// Records the pulse lengths matching 0 and 180 degrees for servo
    /// `index`, replacing any earlier calibration. A `None` index is ignored.
    ///
    /// Neither the order nor the range of the pulses is checked; a `min_pulse`
    /// above `max_pulse` reverses the servo.
    ///
    /// Error conditions:
    /// * [ServoBankError::InvalidChannel] if `index` is outside the bank
    pub fn calibrate(
        &mut self,
        index: Option<usize>,
        min_pulse: u16,
        max_pulse: u16,
    ) -> ServoBankResult<()> {
        let index = match index {
            Some(index) => index,
            None => return Ok(()),
        };

        let calibration = ServoCalibration::new(min_pulse, max_pulse);
        self.channel_mut(index)?.calibrate(calibration);

        log::info!(
            target: "servobank",
            "Servo {}: calibrated to [{}, {}]", index, min_pulse, max_pulse
        );

        Ok(())
    }

    /// Returns the calibration of servo `index`.
    pub fn calibration(&self, index: usize) -> ServoBankResult<ServoCalibration> {
        Ok(self.channel(index)?.calibration())
    }

    /// Moves servo `index` to `degrees`, returning the pulse length computed
    /// from its calibration.
    ///
    /// The angle is recorded as given. Angles outside [0, 180] extrapolate
    /// beyond the calibrated pulse range.
    ///
    /// Error conditions, checked in this order:
    /// * [ServoBankError::NotSetUp] if [ServoBank::setup] hasn't succeeded
    /// * [ServoBankError::InvalidChannel] if `index` is outside the bank
    /// * [ServoBankError::BusCommunicationError] if the chip can't be reached
    pub fn set_degrees(&mut self, index: usize, degrees: i32) -> ServoBankResult<i32> {
        if !self.is_set_up {
            return Err(ServoBankError::NotSetUp);
        }

        let now = self.clock.now();
        let pulse = self.channel_mut(index)?.command(degrees, now);

        log::debug!(
            target: "servobank",
            "Servo {}: {} degrees, {} counts", index, degrees, pulse
        );

        self.send_pulse(index, off_count(pulse))?;

        Ok(pulse)
    }

    /// Returns the angle servo `index` was last moved to, `None` if it never
    /// was.
    pub fn degrees(&self, index: usize) -> ServoBankResult<Option<i32>> {
        Ok(self.channel(index)?.last_angle())
    }

    /// Switches off every swept servo which hasn't been commanded within the
    /// idle timeout, returning the indices switched off.
    ///
    /// Meant to be called on every tick of the control loop. Idle servos are
    /// switched off again on every call until they are commanded anew.
    ///
    /// A failed off command doesn't stop the sweep; the remaining idle servos
    /// are still switched off and the first error is returned afterwards.
    pub fn idle_sweep(&mut self) -> ServoBankResult<Vec<usize>> {
        if !self.is_set_up {
            return Err(ServoBankError::NotSetUp);
        }

        let now = self.clock.now();
        let idle: Vec<usize> = self.channels[..self.idle_sweep_channels]
            .iter()
            .enumerate()
            .filter(|(_, channel)| channel.is_idle(now, self.idle_timeout))
            .map(|(index, _)| index)
            .collect();

        let mut first_error = None;
        for index in &idle {
            log::debug!(target: "servobank", "Servo {}: idle, switching off", index);

            if let Err(error) = self.send_pulse(*index, FULL_OFF_COUNT) {
                log::warn!(target: "servobank", "Servo {}: {}", index, error);
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(idle),
        }
    }

    fn send_pulse(&mut self, index: usize, off: u16) -> ServoBankResult<()> {
        let route = ChannelRoute::for_index(index);

        self.chips[route.chip].set_pulse(route.channel, 0, off)
    }

    fn channel(&self, index: usize) -> ServoBankResult<&ServoChannel> {
        let bank_size = self.channels.len();

        self.channels
            .get(index)
            .ok_or(ServoBankError::InvalidChannel { index, bank_size })
    }

    fn channel_mut(&mut self, index: usize) -> ServoBankResult<&mut ServoChannel> {
        let bank_size = self.channels.len();

        self.channels
            .get_mut(index)
            .ok_or(ServoBankError::InvalidChannel { index, bank_size })
    }
}
