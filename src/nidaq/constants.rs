//! DAQmx enumerations used by the task and event API, with their driver values.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const DAQMX_VAL_CFG_DEFAULT: i32 = -1;
pub const DAQMX_VAL_RISING: i32 = 10280;
pub const DAQMX_VAL_VOLTS: i32 = 10348;
pub const DAQMX_VAL_FINITE_SAMPS: i32 = 10178;
pub const DAQMX_VAL_CONT_SAMPS: i32 = 10123;

/// Direction of an every-N-samples event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EveryNSamplesEventType {
    AcquiredIntoBuffer = 1,
    TransferredFromBuffer = 2,
}

impl EveryNSamplesEventType {
    pub fn value(self) -> i32 {
        self as i32
    }

    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::AcquiredIntoBuffer),
            2 => Some(Self::TransferredFromBuffer),
            _ => None,
        }
    }
}

/// Hardware signals a signal event can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    TwentyMhzTimebaseClock = 12486,
    SampleClock = 12487,
    AdvanceTrigger = 12488,
    PauseTrigger = 12489,
    ReferenceTrigger = 12490,
    StartTrigger = 12491,
    CounterOutputEvent = 12494,
    ChangeDetectionEvent = 12511,
    WatchdogTimerExpiredEvent = 12512,
    SampleCompleteEvent = 12530,
    TenMhzReferenceClock = 12536,
}

impl Signal {
    const ALL: [Signal; 11] = [
        Signal::TwentyMhzTimebaseClock,
        Signal::SampleClock,
        Signal::AdvanceTrigger,
        Signal::PauseTrigger,
        Signal::ReferenceTrigger,
        Signal::StartTrigger,
        Signal::CounterOutputEvent,
        Signal::ChangeDetectionEvent,
        Signal::WatchdogTimerExpiredEvent,
        Signal::SampleCompleteEvent,
        Signal::TenMhzReferenceClock,
    ];

    pub fn value(self) -> i32 {
        self as i32
    }

    pub fn from_value(value: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.value() == value)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleMode {
    #[default]
    Finite,
    Continuous,
}

impl SampleMode {
    pub fn value(self) -> i32 {
        match self {
            SampleMode::Finite => DAQMX_VAL_FINITE_SAMPS,
            SampleMode::Continuous => DAQMX_VAL_CONT_SAMPS,
        }
    }
}
