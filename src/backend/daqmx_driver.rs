use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::nidaq::channel::{AnalogInputChannel, AnalogOutputChannel};
use crate::nidaq::constants::{EveryNSamplesEventType, Signal};
use crate::nidaq::events::EventDispatcher;
use crate::nidaq::task::TaskHandle;
use crate::nidaq::timing::SampleClockTiming;

/// The native DAQmx entry points a [`Task`](crate::nidaq::task::Task) is built on.
///
/// Implementations own the process-wide driver session. Every method maps onto one
/// DAQmx C call and reports a bad handle as
/// [`DaqError::InvalidHandle`](crate::error::DaqError::InvalidHandle).
///
/// The `register_*` methods receive the task's dispatcher to enable an event, or `None`
/// to disable it. Single-registration bookkeeping lives in the dispatcher, so these
/// are only called on actual state transitions.
pub trait DaqmxDriver: Debug + Send + Sync {
    fn create_task(&self, name: &str) -> Result<TaskHandle>;

    /// Load a task saved in the driver's task store
    fn load_task(&self, name: &str) -> Result<TaskHandle>;

    fn clear_task(&self, task: TaskHandle) -> Result<()>;

    fn task_name(&self, task: TaskHandle) -> Result<String>;

    fn add_ai_voltage_chan(&self, task: TaskHandle, channel: &AnalogInputChannel) -> Result<()>;

    fn add_ao_voltage_chan(&self, task: TaskHandle, channel: &AnalogOutputChannel) -> Result<()>;

    fn cfg_samp_clk_timing(&self, task: TaskHandle, timing: &SampleClockTiming) -> Result<()>;

    fn start_task(&self, task: TaskHandle) -> Result<()>;

    fn stop_task(&self, task: TaskHandle) -> Result<()>;

    fn wait_until_task_done(&self, task: TaskHandle, timeout: Duration) -> Result<()>;

    fn is_task_done(&self, task: TaskHandle) -> Result<bool>;

    fn register_done_event(
        &self,
        task: TaskHandle,
        dispatcher: Option<Arc<EventDispatcher>>,
    ) -> Result<()>;

    fn register_every_n_samples_event(
        &self,
        task: TaskHandle,
        event_type: EveryNSamplesEventType,
        n_samples: u32,
        dispatcher: Option<Arc<EventDispatcher>>,
    ) -> Result<()>;

    fn register_signal_event(
        &self,
        task: TaskHandle,
        signal: Signal,
        dispatcher: Option<Arc<EventDispatcher>>,
    ) -> Result<()>;
}
