use std::time::Duration;

use crate::{
    ChannelRoute, ServoCalibration, ServoChannel, CHANNELS_PER_CHIP, FULL_OFF_COUNT, MAX_DEGREES,
    NEUTRAL_PULSE_COUNT,
};

impl ServoCalibration {
    /// Calibration of a servo nobody calibrated: every angle maps onto the
    /// neutral pulse.
    pub const NEUTRAL: ServoCalibration = ServoCalibration {
        min_pulse: NEUTRAL_PULSE_COUNT,
        max_pulse: NEUTRAL_PULSE_COUNT,
    };

    pub fn new(min_pulse: u16, max_pulse: u16) -> ServoCalibration {
        ServoCalibration {
            min_pulse,
            max_pulse,
        }
    }

    /// Maps `degrees` from [0, 180] onto [`min_pulse`, `max_pulse`].
    ///
    /// Angles outside [0, 180] are extrapolated, not clamped. Integer division
    /// truncates toward zero.
    pub fn pulse_for(&self, degrees: i32) -> i32 {
        let min_pulse = self.min_pulse as i64;
        let max_pulse = self.max_pulse as i64;

        let pulse = degrees as i64 * (max_pulse - min_pulse) / MAX_DEGREES as i64 + min_pulse;

        pulse.clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }
}

impl Default for ServoCalibration {
    fn default() -> Self {
        ServoCalibration::NEUTRAL
    }
}

impl ServoChannel {
    pub const UNCOMMANDED: ServoChannel = ServoChannel {
        calibration: ServoCalibration::NEUTRAL,
        last_angle: None,
        last_command: None,
    };

    pub fn calibration(&self) -> ServoCalibration {
        self.calibration
    }

    pub fn calibrate(&mut self, calibration: ServoCalibration) {
        self.calibration = calibration;
    }

    /// Last commanded angle, `None` if the servo was never commanded.
    pub fn last_angle(&self) -> Option<i32> {
        self.last_angle
    }

    pub fn last_command(&self) -> Option<Duration> {
        self.last_command
    }

    /// Records a command to `degrees` issued at `now`, returning the pulse
    /// length to send.
    pub fn command(&mut self, degrees: i32, now: Duration) -> i32 {
        self.last_angle = Some(degrees);
        self.last_command = Some(now);

        self.calibration.pulse_for(degrees)
    }

    /// Returns true if more than `idle_timeout` has passed since the last
    /// command. A servo never commanded counts from the clock's epoch.
    pub fn is_idle(&self, now: Duration, idle_timeout: Duration) -> bool {
        let last_command = self.last_command.unwrap_or(Duration::ZERO);

        now.saturating_sub(last_command) > idle_timeout
    }
}

impl Default for ServoChannel {
    fn default() -> Self {
        ServoChannel::UNCOMMANDED
    }
}

impl ChannelRoute {
    pub fn for_index(index: usize) -> ChannelRoute {
        ChannelRoute {
            chip: index / CHANNELS_PER_CHIP,
            channel: (index % CHANNELS_PER_CHIP) as u8,
        }
    }
}

/// Converts a pulse length to the chip's unsigned off count.
///
/// A negative (extrapolated) pulse has no duty cycle to express, so the
/// channel is switched fully off. Anything else is passed on as is, saturating
/// at the width of the register write.
pub(crate) fn off_count(pulse: i32) -> u16 {
    if pulse < 0 {
        return FULL_OFF_COUNT;
    }

    pulse.min(u16::MAX as i32) as u16
}
