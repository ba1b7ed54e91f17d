//! [`DaqmxDriver`] on top of the NI-DAQmx C library.
//!
//! Native callbacks are plain C functions, so the driver keeps a process-wide map from
//! raw task handle to the task's [`EventDispatcher`]. The trampolines look the handle up
//! there and never receive Rust pointers through `callbackData`, which means a callback
//! firing after its task was cleared finds nothing and does nothing.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::ffi::{CStr, CString};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use libc::{c_char, c_void};
use tracing::{error, info, warn};

use crate::backend::DaqmxDriver;
use crate::error::{DaqError, Result};
use crate::nidaq::channel::{AnalogInputChannel, AnalogOutputChannel, Channel};
use crate::nidaq::constants::{
    DAQMX_VAL_CFG_DEFAULT, DAQMX_VAL_RISING, DAQMX_VAL_VOLTS, EveryNSamplesEventType, Signal,
};
use crate::nidaq::events::{EventDispatcher, EventKind};
use crate::nidaq::nidaq_sys::*;
use crate::nidaq::task::TaskHandle;
use crate::nidaq::timing::SampleClockTiming;
use uom::si::electric_potential::volt;

/// Size of the buffer extended error info is copied into
const ERROR_BUFFER_SIZE: usize = 2048;
/// Size of the buffer task names are copied into
const NAME_BUFFER_SIZE: usize = 1024;
/// `DAQmx_Val_WaitInfinitely`
const WAIT_INFINITELY: f64 = -1.0;
/// Callbacks run on a driver thread, not the registering one
const ASYNC_EVENT_CALLBACKS: u32 = 0;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn dispatchers() -> &'static Mutex<HashMap<usize, Arc<EventDispatcher>>> {
    static DISPATCHERS: OnceLock<Mutex<HashMap<usize, Arc<EventDispatcher>>>> = OnceLock::new();
    DISPATCHERS.get_or_init(Mutex::default)
}

fn dispatcher_for(task: RawTaskHandle) -> Option<Arc<EventDispatcher>> {
    lock(dispatchers()).get(&(task as usize)).cloned()
}

/// Route the task's native callbacks to `dispatcher`.
///
/// A handle adopted by several `Task`s stays bound to the one that registered first
/// for as long as that one still has callbacks registered.
fn bind_dispatcher(
    task: TaskHandle,
    dispatcher: Arc<EventDispatcher>,
    kind: EventKind,
) -> Result<()> {
    match lock(dispatchers()).entry(task.as_raw()) {
        Entry::Occupied(mut bound) => {
            if !Arc::ptr_eq(bound.get(), &dispatcher) {
                if bound.get().has_registrations() {
                    return Err(DaqError::Driver {
                        code: kind.already_registered_code(),
                        message: format!("events of task {task} are registered by another Task"),
                    });
                }
                bound.insert(dispatcher);
            }
        }
        Entry::Vacant(slot) => {
            slot.insert(dispatcher);
        }
    }
    Ok(())
}

fn raw(task: TaskHandle) -> RawTaskHandle {
    task.as_raw() as RawTaskHandle
}

unsafe extern "C" fn on_done(task: RawTaskHandle, status: Int32, _data: *mut c_void) -> Int32 {
    if let Some(dispatcher) = dispatcher_for(task) {
        dispatcher.dispatch_done(status);
    }
    0
}

unsafe extern "C" fn on_every_n_samples(
    task: RawTaskHandle,
    event_type: Int32,
    n_samples: UInt32,
    _data: *mut c_void,
) -> Int32 {
    let Some(dispatcher) = dispatcher_for(task) else {
        return 0;
    };
    match EveryNSamplesEventType::from_value(event_type) {
        Some(event_type) => {
            dispatcher.dispatch_every_n_samples(event_type, n_samples);
        }
        None => warn!(event_type, "nidaq fired an unknown every N samples event type"),
    }
    0
}

unsafe extern "C" fn on_signal(task: RawTaskHandle, signal_id: Int32, _data: *mut c_void) -> Int32 {
    if let Some(dispatcher) = dispatcher_for(task) {
        dispatcher.dispatch_signal_id(signal_id);
    }
    0
}

fn extended_error_info() -> String {
    let mut buf = [0 as c_char; ERROR_BUFFER_SIZE];
    // SAFETY: the driver writes at most `buf.len()` bytes, NUL terminated
    unsafe {
        DAQmxGetExtendedErrorInfo(buf.as_mut_ptr(), buf.len() as u32);
        CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned()
    }
}

/// Turn a DAQmx status into a result: negative is an error, positive a warning
fn check_err(status: Int32, task: TaskHandle) -> Result<()> {
    if status == 0 {
        return Ok(());
    }

    let message = extended_error_info();
    if status < 0 {
        error!(task = %task, status, "{message}");
        return Err(DaqError::from_status(status, message, task));
    }
    warn!(task = %task, "nidaq returns warning code: {status} -> {message}");
    Ok(())
}

fn c_string(value: &str) -> Result<CString> {
    CString::new(value)
        .map_err(|_| DaqError::InvalidArgument(format!("{value:?} contains a NUL byte")))
}

/// Physical channel and optional virtual channel name as C strings
fn c_channel(channel: &Channel) -> Result<(CString, Option<CString>)> {
    let physical = c_string(&channel.physical_channel)?;
    let name = channel.name.as_deref().map(c_string).transpose()?;
    Ok((physical, name))
}

fn timeout_seconds(timeout: Duration) -> f64 {
    if timeout == Duration::MAX {
        WAIT_INFINITELY
    } else {
        timeout.as_secs_f64()
    }
}

/// Handle to the NI-DAQmx driver of this process
#[derive(Debug, Default, Clone, Copy)]
pub struct NidaqDriver;

impl NidaqDriver {
    pub fn new() -> Self {
        Self
    }
}

impl DaqmxDriver for NidaqDriver {
    fn create_task(&self, name: &str) -> Result<TaskHandle> {
        let c_name = c_string(name)?;
        let mut handle: RawTaskHandle = ptr::null_mut();
        // SAFETY: `c_name` outlives the call and `handle` is a valid out pointer
        let status = unsafe { DAQmxCreateTask(c_name.as_ptr(), &mut handle) };
        check_err(status, TaskHandle::from_raw(0))?;
        Ok(TaskHandle::from_raw(handle as usize))
    }

    fn load_task(&self, name: &str) -> Result<TaskHandle> {
        let c_name = c_string(name)?;
        let mut handle: RawTaskHandle = ptr::null_mut();
        // SAFETY: as in create_task
        let status = unsafe { DAQmxLoadTask(c_name.as_ptr(), &mut handle) };
        check_err(status, TaskHandle::from_raw(0))?;
        info!(name, "nidaqmx-sys: loaded persisted task");
        Ok(TaskHandle::from_raw(handle as usize))
    }

    fn clear_task(&self, task: TaskHandle) -> Result<()> {
        // SAFETY: the driver validates the handle itself
        let status = unsafe { DAQmxClearTask(raw(task)) };
        // The handle may be reused by the driver from here on
        lock(dispatchers()).remove(&task.as_raw());
        check_err(status, task)
    }

    fn task_name(&self, task: TaskHandle) -> Result<String> {
        let mut buf = [0 as c_char; NAME_BUFFER_SIZE];
        // SAFETY: the driver writes at most `buf.len()` bytes, NUL terminated
        let status = unsafe { DAQmxGetTaskName(raw(task), buf.as_mut_ptr(), buf.len() as u32) };
        check_err(status, task)?;
        // SAFETY: see above
        let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Ok(name.to_string_lossy().into_owned())
    }

    fn add_ai_voltage_chan(&self, task: TaskHandle, channel: &AnalogInputChannel) -> Result<()> {
        let (physical, name) = c_channel(&channel.channel)?;
        info!("nidaqmx-sys: adding analog input channel: {:?}", physical);
        // SAFETY: every pointer is either null or a live C string
        let status = unsafe {
            DAQmxCreateAIVoltageChan(
                raw(task),
                physical.as_ptr(),
                name.as_ref().map_or(ptr::null(), |name| name.as_ptr()),
                DAQMX_VAL_CFG_DEFAULT,
                channel.min.get::<volt>(),
                channel.max.get::<volt>(),
                DAQMX_VAL_VOLTS,
                ptr::null(),
            )
        };
        check_err(status, task)
    }

    fn add_ao_voltage_chan(&self, task: TaskHandle, channel: &AnalogOutputChannel) -> Result<()> {
        let (physical, name) = c_channel(&channel.channel)?;
        info!("nidaqmx-sys: adding analog output channel: {:?}", physical);
        // SAFETY: every pointer is either null or a live C string
        let status = unsafe {
            DAQmxCreateAOVoltageChan(
                raw(task),
                physical.as_ptr(),
                name.as_ref().map_or(ptr::null(), |name| name.as_ptr()),
                channel.min.get::<volt>(),
                channel.max.get::<volt>(),
                DAQMX_VAL_VOLTS,
                ptr::null(),
            )
        };
        check_err(status, task)
    }

    fn cfg_samp_clk_timing(&self, task: TaskHandle, timing: &SampleClockTiming) -> Result<()> {
        // SAFETY: a null source selects the onboard clock
        let status = unsafe {
            DAQmxCfgSampClkTiming(
                raw(task),
                ptr::null(),
                timing.rate_hz(),
                DAQMX_VAL_RISING,
                timing.sample_mode.value(),
                timing.samples_per_channel,
            )
        };
        check_err(status, task)
    }

    fn start_task(&self, task: TaskHandle) -> Result<()> {
        // SAFETY: the driver validates the handle itself
        check_err(unsafe { DAQmxStartTask(raw(task)) }, task)
    }

    fn stop_task(&self, task: TaskHandle) -> Result<()> {
        // SAFETY: the driver validates the handle itself
        check_err(unsafe { DAQmxStopTask(raw(task)) }, task)
    }

    fn wait_until_task_done(&self, task: TaskHandle, timeout: Duration) -> Result<()> {
        // SAFETY: the driver validates the handle itself
        let status = unsafe { DAQmxWaitUntilTaskDone(raw(task), timeout_seconds(timeout)) };
        check_err(status, task)
    }

    fn is_task_done(&self, task: TaskHandle) -> Result<bool> {
        let mut done: Bool32 = 0;
        // SAFETY: `done` is a valid out pointer
        let status = unsafe { DAQmxIsTaskDone(raw(task), &mut done) };
        check_err(status, task)?;
        Ok(done != 0)
    }

    fn register_done_event(
        &self,
        task: TaskHandle,
        dispatcher: Option<Arc<EventDispatcher>>,
    ) -> Result<()> {
        let callback: DoneEventCallbackPtr = match dispatcher {
            Some(dispatcher) => {
                bind_dispatcher(task, dispatcher, EventKind::Done)?;
                Some(on_done)
            }
            None => None,
        };
        // SAFETY: the trampoline ignores callbackData, a null callback unregisters
        let status = unsafe {
            DAQmxRegisterDoneEvent(raw(task), ASYNC_EVENT_CALLBACKS, callback, ptr::null_mut())
        };
        check_err(status, task)
    }

    fn register_every_n_samples_event(
        &self,
        task: TaskHandle,
        event_type: EveryNSamplesEventType,
        n_samples: u32,
        dispatcher: Option<Arc<EventDispatcher>>,
    ) -> Result<()> {
        let callback: EveryNSamplesEventCallbackPtr = match dispatcher {
            Some(dispatcher) => {
                bind_dispatcher(task, dispatcher, EventKind::every_n_samples(event_type))?;
                Some(on_every_n_samples)
            }
            None => None,
        };
        // SAFETY: as in register_done_event
        let status = unsafe {
            DAQmxRegisterEveryNSamplesEvent(
                raw(task),
                event_type.value(),
                n_samples,
                ASYNC_EVENT_CALLBACKS,
                callback,
                ptr::null_mut(),
            )
        };
        check_err(status, task)
    }

    fn register_signal_event(
        &self,
        task: TaskHandle,
        signal: Signal,
        dispatcher: Option<Arc<EventDispatcher>>,
    ) -> Result<()> {
        let callback: SignalEventCallbackPtr = match dispatcher {
            Some(dispatcher) => {
                bind_dispatcher(task, dispatcher, EventKind::Signal(signal))?;
                Some(on_signal)
            }
            None => None,
        };
        // SAFETY: as in register_done_event
        let status = unsafe {
            DAQmxRegisterSignalEvent(
                raw(task),
                signal.value(),
                ASYNC_EVENT_CALLBACKS,
                callback,
                ptr::null_mut(),
            )
        };
        check_err(status, task)
    }
}
