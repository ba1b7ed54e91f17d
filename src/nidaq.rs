pub mod channel;
pub mod constants;
pub mod events;
pub mod storage;
pub mod task;
pub mod timing;

#[cfg(feature = "nidaq")]
pub(crate) mod nidaq_sys;

pub use channel::{AnalogInputChannel, AnalogOutputChannel, Channel};
pub use constants::{EveryNSamplesEventType, SampleMode, Signal};
pub use events::{
    DoneCallback, DoneEvent, EventDispatcher, EventKind, EveryNSamplesCallback,
    EveryNSamplesEvent, SignalCallback, SignalEvent,
};
pub use storage::PersistedTask;
pub use task::{Task, TaskHandle};
pub use timing::SampleClockTiming;
