use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::backend::{self, DaqmxDriver};
use crate::config::SessionOptions;
use crate::error::{DaqError, Result};
use crate::nidaq::channel::{AnalogInputChannel, AnalogOutputChannel};
use crate::nidaq::constants::{EveryNSamplesEventType, Signal};
use crate::nidaq::events::{
    DoneCallback, EventDispatcher, EventKind, EveryNSamplesCallback, SignalCallback,
};
use crate::nidaq::timing::SampleClockTiming;

/// Opaque native task handle.
///
/// The driver owns the task behind it; holding a handle only grants the right to call
/// the driver with it (and, once, to clear it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle(usize);

impl TaskHandle {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A DAQmx task.
///
/// Build one with [`Task::create_new`], which issues the native create call, or with
/// [`Task::from_existing_handle`], which adopts a handle the driver already handed out
/// (e.g. by loading a persisted task). Both produce the same type and behave the same.
/// The native task is cleared on [`Task::close`] or drop, whichever comes first.
#[derive(Debug)]
pub struct Task {
    handle: TaskHandle,
    driver: Arc<dyn DaqmxDriver>,
    events: Arc<EventDispatcher>,
    closed: bool,
}

impl Task {
    /// Create a new native task. An empty `name` lets the driver pick one.
    pub fn create_new(
        name: &str,
        options: Option<&SessionOptions>,
        driver: Option<Arc<dyn DaqmxDriver>>,
    ) -> Result<Self> {
        let driver = backend::select_driver(options, driver)?;
        let handle = driver.create_task(name)?;
        info!(task = %handle, name, "created task");
        Ok(Self::initialize(handle, driver))
    }

    /// Wrap a handle obtained from the driver without creating a new native task.
    ///
    /// The handle is not checked here; an invalid one surfaces as
    /// [`DaqError::InvalidHandle`] on first use.
    pub fn from_existing_handle(
        handle: TaskHandle,
        options: Option<&SessionOptions>,
        driver: Option<Arc<dyn DaqmxDriver>>,
    ) -> Result<Self> {
        let driver = backend::select_driver(options, driver)?;
        info!(task = %handle, "adopted existing task handle");
        Ok(Self::initialize(handle, driver))
    }

    fn initialize(handle: TaskHandle, driver: Arc<dyn DaqmxDriver>) -> Self {
        Self {
            handle,
            driver,
            events: Arc::new(EventDispatcher::new(handle)),
            closed: false,
        }
    }

    pub fn handle(&self) -> TaskHandle {
        self.handle
    }

    /// Driver this task is bound to, e.g. to adopt further handles on the same session
    pub fn driver(&self) -> Arc<dyn DaqmxDriver> {
        self.driver.clone()
    }

    pub fn name(&self) -> Result<String> {
        self.driver.task_name(self.handle)
    }

    pub fn add_ai_voltage_chan(&self, channel: AnalogInputChannel) -> Result<()> {
        channel.validate()?;
        info!(task = %self.handle, channel = %channel.channel.physical_channel, "adding analog input channel");
        self.driver.add_ai_voltage_chan(self.handle, &channel)
    }

    pub fn add_ao_voltage_chan(&self, channel: AnalogOutputChannel) -> Result<()> {
        channel.validate()?;
        info!(task = %self.handle, channel = %channel.channel.physical_channel, "adding analog output channel");
        self.driver.add_ao_voltage_chan(self.handle, &channel)
    }

    pub fn cfg_samp_clk_timing(&self, timing: SampleClockTiming) -> Result<()> {
        timing.validate()?;
        info!(
            task = %self.handle,
            rate_hz = timing.rate_hz(),
            mode = ?timing.sample_mode,
            samples_per_channel = timing.samples_per_channel,
            "configuring sample clock timing"
        );
        self.driver.cfg_samp_clk_timing(self.handle, &timing)
    }

    pub fn start(&self) -> Result<()> {
        info!(task = %self.handle, "starting task");
        self.driver.start_task(self.handle)
    }

    pub fn stop(&self) -> Result<()> {
        info!(task = %self.handle, "stopping task");
        self.driver.stop_task(self.handle)
    }

    pub fn wait_until_done(&self, timeout: Duration) -> Result<()> {
        self.driver.wait_until_task_done(self.handle, timeout)
    }

    pub fn is_done(&self) -> Result<bool> {
        self.driver.is_task_done(self.handle)
    }

    /// Register a callback for when the task finishes, or unregister with `None`.
    ///
    /// Fails with `DONE_EVENT_ALREADY_REGISTERED` if a callback is already registered.
    /// The callback runs on a driver thread.
    pub fn register_done_event(&self, callback: Option<DoneCallback>) -> Result<()> {
        self.events.register_done(callback, |enable| {
            self.driver
                .register_done_event(self.handle, enable.then(|| self.events.clone()))
        })
    }

    /// Register a callback for every `n_samples` acquired into the input buffer, or
    /// unregister with `None`.
    pub fn register_every_n_samples_acquired_into_buffer_event(
        &self,
        n_samples: u32,
        callback: Option<EveryNSamplesCallback>,
    ) -> Result<()> {
        self.register_every_n_samples_event(
            EveryNSamplesEventType::AcquiredIntoBuffer,
            n_samples,
            callback,
        )
    }

    /// Register a callback for every `n_samples` transferred from the output buffer, or
    /// unregister with `None`.
    pub fn register_every_n_samples_transferred_from_buffer_event(
        &self,
        n_samples: u32,
        callback: Option<EveryNSamplesCallback>,
    ) -> Result<()> {
        self.register_every_n_samples_event(
            EveryNSamplesEventType::TransferredFromBuffer,
            n_samples,
            callback,
        )
    }

    fn register_every_n_samples_event(
        &self,
        event_type: EveryNSamplesEventType,
        n_samples: u32,
        callback: Option<EveryNSamplesCallback>,
    ) -> Result<()> {
        if callback.is_some() && n_samples == 0 {
            return Err(DaqError::InvalidArgument(
                "every N samples events need N > 0".to_string(),
            ));
        }
        self.events
            .register_every_n_samples(event_type, callback, |enable| {
                self.driver.register_every_n_samples_event(
                    self.handle,
                    event_type,
                    n_samples,
                    enable.then(|| self.events.clone()),
                )
            })
    }

    /// Register a callback for a hardware signal, or unregister with `None`.
    /// Each signal type has its own registration.
    pub fn register_signal_event(
        &self,
        signal: Signal,
        callback: Option<SignalCallback>,
    ) -> Result<()> {
        self.events.register_signal(signal, callback, |enable| {
            self.driver
                .register_signal_event(self.handle, signal, enable.then(|| self.events.clone()))
        })
    }

    pub fn is_event_registered(&self, kind: EventKind) -> bool {
        self.events.is_registered(kind)
    }

    /// Clear the native task and drop every event registration.
    ///
    /// Returns once callbacks already running have finished, unless called from one.
    pub fn close(mut self) -> Result<()> {
        self.clear()
    }

    fn clear(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        info!(task = %self.handle, "clearing task");
        let cleared = self.driver.clear_task(self.handle);
        self.events.close();
        cleared
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if let Err(err) = self.clear() {
            error!(task = %self.handle, "failed to clear task on drop: {err}");
        }
    }
}
