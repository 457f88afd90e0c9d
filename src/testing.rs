//! Test doubles for the bank's collaborators.
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use crate::{Clock, PwmChip, ServoBankError, ServoBankResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChipCommand {
    Begin,
    SetFrequency(u16),
    SetPulse { channel: u8, on: u16, off: u16 },
}

/// Commands received by a [RecordingChip], shared with the test.
#[derive(Clone, Default)]
pub(crate) struct CommandLog(Rc<RefCell<Vec<ChipCommand>>>);

impl CommandLog {
    pub(crate) fn commands(&self) -> Vec<ChipCommand> {
        self.0.borrow().clone()
    }

    /// `(channel, off)` of every pulse command.
    pub(crate) fn pulses(&self) -> Vec<(u8, u16)> {
        self.0
            .borrow()
            .iter()
            .filter_map(|command| match command {
                ChipCommand::SetPulse { channel, off, .. } => Some((*channel, *off)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

pub(crate) struct RecordingChip {
    address: u8,
    log: CommandLog,
    failing: bool,
    failing_pulses: bool,
}

impl RecordingChip {
    pub(crate) fn new(address: u8) -> (RecordingChip, CommandLog) {
        let log = CommandLog::default();

        (
            RecordingChip {
                address,
                log: log.clone(),
                failing: false,
                failing_pulses: false,
            },
            log,
        )
    }

    /// A chip whose every bus transfer fails.
    pub(crate) fn failing(address: u8) -> RecordingChip {
        RecordingChip {
            address,
            log: CommandLog::default(),
            failing: true,
            failing_pulses: true,
        }
    }

    /// A chip which sets up fine but fails every pulse command.
    pub(crate) fn failing_pulses(address: u8) -> RecordingChip {
        RecordingChip {
            address,
            log: CommandLog::default(),
            failing: false,
            failing_pulses: true,
        }
    }

    fn record(&mut self, command: ChipCommand) -> ServoBankResult<()> {
        let is_pulse = matches!(command, ChipCommand::SetPulse { .. });

        if self.failing || (self.failing_pulses && is_pulse) {
            return Err(ServoBankError::BusCommunicationError {
                address: self.address,
                msg: String::from("I2C(Remote I/O error)"),
            });
        }

        self.log.0.borrow_mut().push(command);
        Ok(())
    }
}

impl PwmChip for RecordingChip {
    fn address(&self) -> u8 {
        self.address
    }

    fn begin(&mut self) -> ServoBankResult<()> {
        self.record(ChipCommand::Begin)
    }

    fn set_frequency(&mut self, output_frequency_hz: u16) -> ServoBankResult<()> {
        self.record(ChipCommand::SetFrequency(output_frequency_hz))
    }

    fn set_pulse(&mut self, channel: u8, on: u16, off: u16) -> ServoBankResult<()> {
        self.record(ChipCommand::SetPulse { channel, on, off })
    }
}

/// [Clock] which only moves when told to.
#[derive(Clone, Default)]
pub(crate) struct ManualClock(Rc<Cell<Duration>>);

impl ManualClock {
    pub(crate) fn advance_ms(&self, ms: u64) {
        self.0.set(self.0.get() + Duration::from_millis(ms));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.0.get()
    }
}
