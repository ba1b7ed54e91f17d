//! In-process stand-in for the NI-DAQmx driver.
//!
//! Behaves like the driver at the API boundary: it hands out handles, rejects unknown
//! ones, runs finite or continuous acquisitions paced by the configured sample clock
//! and fires registered events from its own worker thread, one per running task.
//! No samples are produced; buffers and hardware are out of its scope.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::backend::DaqmxDriver;
use crate::config::{PersistedTaskTemplate, SimConfig, SimFault};
use crate::error::{DaqError, DaqErrorCode, Result};
use crate::nidaq::channel::{AnalogInputChannel, AnalogOutputChannel, Channel};
use crate::nidaq::constants::{EveryNSamplesEventType, SampleMode, Signal};
use crate::nidaq::events::{EventDispatcher, EventKind};
use crate::nidaq::task::TaskHandle;
use crate::nidaq::timing::SampleClockTiming;

/// Signals the simulation fires on every sample clock tick
const PER_SAMPLE_SIGNALS: [Signal; 2] = [Signal::SampleClock, Signal::SampleCompleteEvent];
/// Done status of a run whose next sample clock tick cannot be scheduled
const UNSCHEDULABLE_SAMPLE_STATUS: i32 = -1;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Default)]
pub struct SimDriver {
    config: Arc<SimConfig>,
    state: Arc<Mutex<SimState>>,
}

#[derive(Debug, Default)]
struct SimState {
    next_handle: usize,
    unnamed_tasks: usize,
    tasks: HashMap<TaskHandle, SimTask>,
}

#[derive(Debug, Default)]
struct SimTask {
    name: String,
    inputs: Vec<AnalogInputChannel>,
    outputs: Vec<AnalogOutputChannel>,
    timing: Option<SampleClockTiming>,
    done: Option<Arc<EventDispatcher>>,
    every_n_samples: HashMap<EveryNSamplesEventType, (u32, Arc<EventDispatcher>)>,
    signals: HashMap<Signal, Arc<EventDispatcher>>,
    run: Option<SimRun>,
}

impl SimTask {
    fn is_running(&self) -> bool {
        self.run
            .as_ref()
            .is_some_and(|run| run.completion.status().is_none())
    }
}

#[derive(Debug)]
struct SimRun {
    stop: Arc<AtomicBool>,
    completion: Arc<Completion>,
    worker: JoinHandle<()>,
}

/// Final status of a run, set exactly once
#[derive(Debug, Default)]
struct Completion {
    status: Mutex<Option<i32>>,
    changed: Condvar,
}

impl Completion {
    fn set(&self, status: i32) {
        let mut current = lock(&self.status);
        if current.is_none() {
            *current = Some(status);
            self.changed.notify_all();
        }
    }

    fn status(&self) -> Option<i32> {
        *lock(&self.status)
    }

    fn wait(&self, timeout: Duration) -> Option<i32> {
        let guard = lock(&self.status);
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |status| status.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Everything a worker thread needs to drive one acquisition
struct RunContext {
    state: Arc<Mutex<SimState>>,
    handle: TaskHandle,
    timing: Option<SampleClockTiming>,
    /// Wall-clock time between samples, already scaled
    period: Duration,
    direction: EveryNSamplesEventType,
    fault: Option<SimFault>,
    stop: Arc<AtomicBool>,
    completion: Arc<Completion>,
}

impl SimDriver {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::default(),
        }
    }

    fn with_task<T>(&self, task: TaskHandle, f: impl FnOnce(&mut SimTask) -> Result<T>) -> Result<T> {
        let mut state = lock(&self.state);
        let sim_task = state
            .tasks
            .get_mut(&task)
            .ok_or(DaqError::InvalidHandle { handle: task })?;
        f(sim_task)
    }

    fn insert_task(&self, mut task: SimTask) -> TaskHandle {
        let mut state = lock(&self.state);
        state.next_handle += 1;
        let handle = TaskHandle::from_raw(state.next_handle);
        if task.name.is_empty() {
            task.name = format!("_unnamedTask<{}>", state.unnamed_tasks);
            state.unnamed_tasks += 1;
        }
        state.tasks.insert(handle, task);
        handle
    }

    /// The native task holds one callback per event, no matter which `Task` registered it
    fn claim(
        current: Option<&Arc<EventDispatcher>>,
        dispatcher: &Arc<EventDispatcher>,
        kind: EventKind,
        task: TaskHandle,
    ) -> Result<()> {
        match current {
            Some(current) if !Arc::ptr_eq(current, dispatcher) => Err(DaqError::Driver {
                code: kind.already_registered_code(),
                message: format!("{kind} event of task {task} is registered by another Task"),
            }),
            _ => Ok(()),
        }
    }

    fn ensure_idle(task: &SimTask) -> Result<()> {
        if task.is_running() {
            return Err(DaqError::Driver {
                code: DaqErrorCode::CannotPerformOpWhileTaskRunning,
                message: format!("task {} is running", task.name),
            });
        }
        Ok(())
    }
}

impl DaqmxDriver for SimDriver {
    fn create_task(&self, name: &str) -> Result<TaskHandle> {
        let handle = self.insert_task(SimTask {
            name: name.to_string(),
            ..SimTask::default()
        });
        debug!(task = %handle, "sim: created task");
        Ok(handle)
    }

    fn load_task(&self, name: &str) -> Result<TaskHandle> {
        let PersistedTaskTemplate {
            name,
            ai_voltage_channels,
            timing,
        } = self
            .config
            .persisted_tasks
            .iter()
            .find(|template| template.name == name)
            .cloned()
            .ok_or_else(|| DaqError::Driver {
                code: DaqErrorCode::TaskNotInDataNeighborhood,
                message: format!("task {name} is not in the task store"),
            })?;
        if let Some(timing) = &timing {
            timing.validate()?;
        }

        let handle = self.insert_task(SimTask {
            name,
            inputs: ai_voltage_channels
                .into_iter()
                .map(|physical| AnalogInputChannel::new(Channel::new(physical)))
                .collect(),
            timing,
            ..SimTask::default()
        });
        debug!(task = %handle, "sim: loaded persisted task");
        Ok(handle)
    }

    fn clear_task(&self, task: TaskHandle) -> Result<()> {
        let removed = lock(&self.state)
            .tasks
            .remove(&task)
            .ok_or(DaqError::InvalidHandle { handle: task })?;
        if let Some(run) = removed.run {
            halt(run);
        }
        debug!(task = %task, "sim: cleared task");
        Ok(())
    }

    fn task_name(&self, task: TaskHandle) -> Result<String> {
        self.with_task(task, |t| Ok(t.name.clone()))
    }

    fn add_ai_voltage_chan(&self, task: TaskHandle, channel: &AnalogInputChannel) -> Result<()> {
        self.with_task(task, |t| {
            Self::ensure_idle(t)?;
            t.inputs.push(channel.clone());
            Ok(())
        })
    }

    fn add_ao_voltage_chan(&self, task: TaskHandle, channel: &AnalogOutputChannel) -> Result<()> {
        self.with_task(task, |t| {
            Self::ensure_idle(t)?;
            t.outputs.push(channel.clone());
            Ok(())
        })
    }

    fn cfg_samp_clk_timing(&self, task: TaskHandle, timing: &SampleClockTiming) -> Result<()> {
        self.with_task(task, |t| {
            Self::ensure_idle(t)?;
            t.timing = Some(timing.clone());
            Ok(())
        })
    }

    fn start_task(&self, task: TaskHandle) -> Result<()> {
        let (context, previous) = self.with_task(task, |t| {
            Self::ensure_idle(t)?;
            if t.inputs.is_empty() && t.outputs.is_empty() {
                return Err(DaqError::Driver {
                    code: DaqErrorCode::CanNotPerformOpWhenNoChansInTask,
                    message: format!("task {} has no channels", t.name),
                });
            }

            let direction = if t.inputs.is_empty() {
                EveryNSamplesEventType::TransferredFromBuffer
            } else {
                EveryNSamplesEventType::AcquiredIntoBuffer
            };
            let period = t
                .timing
                .as_ref()
                .map(|timing| sample_period(timing, self.config.time_scale))
                .transpose()?
                .unwrap_or_default();
            let context = RunContext {
                state: self.state.clone(),
                handle: task,
                timing: t.timing.clone(),
                period,
                direction,
                fault: self.config.fault,
                stop: Arc::new(AtomicBool::new(false)),
                completion: Arc::new(Completion::default()),
            };
            Ok((context, t.run.take()))
        })?;

        // A finished run that was never stopped
        if let Some(previous) = previous {
            halt(previous);
        }

        let stop = context.stop.clone();
        let completion = context.completion.clone();
        let worker = thread::Builder::new()
            .name(format!("daqmx-sim-{task}"))
            .spawn(move || run_acquisition(context))
            .map_err(|err| DaqError::Driver {
                code: DaqErrorCode::Other(-1),
                message: format!("unable to spawn acquisition thread: {err}"),
            })?;

        let run = SimRun {
            stop: stop.clone(),
            completion,
            worker,
        };
        if let Err(err) = self.with_task(task, |t| Ok(t.run.replace(run))) {
            // Cleared from another thread while starting
            stop.store(true, Ordering::Release);
            return Err(err);
        }
        info!(task = %task, "sim: task started");
        Ok(())
    }

    fn stop_task(&self, task: TaskHandle) -> Result<()> {
        if let Some(run) = self.with_task(task, |t| Ok(t.run.take()))? {
            halt(run);
            info!(task = %task, "sim: task stopped");
        }
        Ok(())
    }

    fn wait_until_task_done(&self, task: TaskHandle, timeout: Duration) -> Result<()> {
        let Some(completion) =
            self.with_task(task, |t| Ok(t.run.as_ref().map(|run| run.completion.clone())))?
        else {
            return Ok(());
        };

        match completion.wait(timeout) {
            Some(0) => Ok(()),
            Some(status) => Err(DaqError::from_status(
                status,
                "acquisition stopped with an error",
                task,
            )),
            None => Err(DaqError::Driver {
                code: DaqErrorCode::WaitUntilDoneDoesNotIndicateDone,
                message: format!("task {task} still running after {timeout:?}"),
            }),
        }
    }

    fn is_task_done(&self, task: TaskHandle) -> Result<bool> {
        self.with_task(task, |t| Ok(!t.is_running()))
    }

    fn register_done_event(
        &self,
        task: TaskHandle,
        dispatcher: Option<Arc<EventDispatcher>>,
    ) -> Result<()> {
        self.with_task(task, |t| {
            if let Some(dispatcher) = &dispatcher {
                Self::claim(t.done.as_ref(), dispatcher, EventKind::Done, task)?;
            }
            t.done = dispatcher;
            Ok(())
        })
    }

    fn register_every_n_samples_event(
        &self,
        task: TaskHandle,
        event_type: EveryNSamplesEventType,
        n_samples: u32,
        dispatcher: Option<Arc<EventDispatcher>>,
    ) -> Result<()> {
        self.with_task(task, |t| {
            match dispatcher {
                Some(dispatcher) => {
                    Self::claim(
                        t.every_n_samples.get(&event_type).map(|(_, current)| current),
                        &dispatcher,
                        EventKind::every_n_samples(event_type),
                        task,
                    )?;
                    t.every_n_samples.insert(event_type, (n_samples, dispatcher))
                }
                None => t.every_n_samples.remove(&event_type),
            };
            Ok(())
        })
    }

    fn register_signal_event(
        &self,
        task: TaskHandle,
        signal: Signal,
        dispatcher: Option<Arc<EventDispatcher>>,
    ) -> Result<()> {
        self.with_task(task, |t| {
            match dispatcher {
                Some(dispatcher) => {
                    Self::claim(
                        t.signals.get(&signal),
                        &dispatcher,
                        EventKind::Signal(signal),
                        task,
                    )?;
                    t.signals.insert(signal, dispatcher)
                }
                None => t.signals.remove(&signal),
            };
            Ok(())
        })
    }
}

fn sample_period(timing: &SampleClockTiming, time_scale: f64) -> Result<Duration> {
    timing.validate()?;
    Duration::try_from_secs_f64(time_scale / timing.rate_hz()).map_err(|err| {
        DaqError::InvalidArgument(format!(
            "no sample period for {} Hz at time scale {time_scale}: {err}",
            timing.rate_hz()
        ))
    })
}

/// Stop a run and wait for its worker, unless we are on that worker (e.g. a done
/// callback stopping its own task)
fn halt(run: SimRun) {
    run.stop.store(true, Ordering::Release);
    if run.worker.thread().id() != thread::current().id() && run.worker.join().is_err() {
        error!("sim: acquisition thread panicked");
    }
    run.completion.set(0);
}

impl RunContext {
    fn lookup<T>(&self, pick: impl FnOnce(&SimTask) -> T) -> Option<T> {
        lock(&self.state).tasks.get(&self.handle).map(pick)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn fire_signal(&self, signal: Signal) {
        if let Some(Some(dispatcher)) = self.lookup(|t| t.signals.get(&signal).cloned()) {
            dispatcher.dispatch_signal(signal);
        }
    }

    fn fire_every_n_samples(&self, sample: u64) {
        let due = self
            .lookup(|t| {
                t.every_n_samples
                    .iter()
                    .filter(|(event_type, (n, _))| {
                        **event_type == self.direction && sample % u64::from(*n) == 0
                    })
                    .map(|(event_type, (n, dispatcher))| (*event_type, *n, dispatcher.clone()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        for (event_type, n, dispatcher) in due {
            dispatcher.dispatch_every_n_samples(event_type, n);
        }
    }

    /// Record the final status, then tell the done callback
    fn finish(&self, status: i32) {
        self.completion.set(status);
        if let Some(Some(dispatcher)) = self.lookup(|t| t.done.clone()) {
            dispatcher.dispatch_done(status);
        }
        debug!(task = %self.handle, status, "sim: acquisition finished");
    }
}

fn run_acquisition(context: RunContext) {
    context.fire_signal(Signal::StartTrigger);

    // On-demand timing: a single software-timed point, done immediately
    let Some(timing) = context.timing.clone() else {
        context.finish(0);
        return;
    };

    let total = match timing.sample_mode {
        SampleMode::Finite => Some(timing.samples_per_channel),
        SampleMode::Continuous => None,
    };
    let mut deadline = Instant::now();
    let mut sample: u64 = 0;

    while total.is_none_or(|total| sample < total) {
        sample += 1;
        let Some(next) = deadline.checked_add(context.period) else {
            error!(task = %context.handle, sample, "sim: sample clock tick cannot be scheduled");
            context.finish(UNSCHEDULABLE_SAMPLE_STATUS);
            return;
        };
        deadline = next;
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
        if context.stopped() {
            return;
        }

        for signal in PER_SAMPLE_SIGNALS {
            context.fire_signal(signal);
        }
        context.fire_every_n_samples(sample);

        if let Some(fault) = context.fault {
            if sample >= fault.after_samples {
                context.finish(fault.status);
                return;
            }
        }
    }

    context.finish(0);
}
