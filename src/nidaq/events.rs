//! Event registry and dispatch for a single task.
//!
//! Every task owns one [`EventDispatcher`]. It holds at most one callback per event kind
//! (per signal type for signal events) and is the object the driver calls back into when
//! an event fires. The driver fires from its own thread(s), so every slot access goes
//! through a lock, and callbacks never run while a lock is held.
//!
//! Registration follows a two-state machine per slot:
//! * `Unregistered -> Registered` on register with a callback. Registering while a
//!   callback is active fails with the kind-specific "already registered" error.
//! * `Registered -> Unregistered` on register with `None`, or when the task closes.
//!   Unregistering an empty slot is a no-op.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, error, trace, warn};

use crate::error::{DaqError, DaqErrorCode, Result};
use crate::nidaq::constants::{EveryNSamplesEventType, Signal};
use crate::nidaq::task::TaskHandle;

pub type DoneCallback = Arc<dyn Fn(DoneEvent) + Send + Sync>;
pub type EveryNSamplesCallback = Arc<dyn Fn(EveryNSamplesEvent) + Send + Sync>;
pub type SignalCallback = Arc<dyn Fn(SignalEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Done,
    EveryNSamplesAcquiredIntoBuffer,
    EveryNSamplesTransferredFromBuffer,
    Signal(Signal),
}

impl EventKind {
    pub fn every_n_samples(event_type: EveryNSamplesEventType) -> Self {
        match event_type {
            EveryNSamplesEventType::AcquiredIntoBuffer => EventKind::EveryNSamplesAcquiredIntoBuffer,
            EveryNSamplesEventType::TransferredFromBuffer => {
                EventKind::EveryNSamplesTransferredFromBuffer
            }
        }
    }

    pub fn already_registered_code(self) -> DaqErrorCode {
        match self {
            EventKind::Done => DaqErrorCode::DoneEventAlreadyRegistered,
            EventKind::EveryNSamplesAcquiredIntoBuffer => {
                DaqErrorCode::EveryNSampsAcqIntoBufferEventAlreadyRegistered
            }
            EventKind::EveryNSamplesTransferredFromBuffer => {
                DaqErrorCode::EveryNSampsTransferredFromBufferEventAlreadyRegistered
            }
            EventKind::Signal(_) => DaqErrorCode::SignalEventAlreadyRegistered,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Done => write!(f, "done"),
            EventKind::EveryNSamplesAcquiredIntoBuffer => {
                write!(f, "every N samples acquired into buffer")
            }
            EventKind::EveryNSamplesTransferredFromBuffer => {
                write!(f, "every N samples transferred from buffer")
            }
            EventKind::Signal(signal) => write!(f, "{signal} signal"),
        }
    }
}

/// The task stopped. `status` is 0 on a clean finish, a driver error code otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct DoneEvent {
    pub task_handle: TaskHandle,
    pub status: i32,
    pub received_at: DateTime<Utc>,
}

impl DoneEvent {
    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EveryNSamplesEvent {
    pub task_handle: TaskHandle,
    pub event_type: EveryNSamplesEventType,
    pub number_of_samples: u32,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvent {
    pub task_handle: TaskHandle,
    pub signal_type: Signal,
    pub received_at: DateTime<Utc>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

thread_local! {
    // Number of dispatches currently running on this thread
    static DISPATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Registration slots for one family of events, keyed by the event parameter
struct SlotTable<K, E> {
    /// Serializes register/unregister so the check and the native call happen atomically
    transition: Mutex<()>,
    slots: Mutex<HashMap<K, Arc<dyn Fn(E) + Send + Sync>>>,
}

impl<K: Copy + Eq + Hash, E> SlotTable<K, E> {
    fn new() -> Self {
        Self {
            transition: Mutex::new(()),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn register<N>(
        &self,
        key: K,
        kind: EventKind,
        callback: Option<Arc<dyn Fn(E) + Send + Sync>>,
        native: N,
    ) -> Result<()>
    where
        N: FnOnce(bool) -> Result<()>,
    {
        let _transition = lock(&self.transition);
        let active = lock(&self.slots).contains_key(&key);

        match (callback, active) {
            (Some(_), true) => Err(DaqError::already_registered(kind)),
            (Some(callback), false) => {
                // Fill the slot first so a firing right after the native call is not lost
                lock(&self.slots).insert(key, callback);
                if let Err(err) = native(true) {
                    lock(&self.slots).remove(&key);
                    return Err(err);
                }
                debug!(%kind, "event callback registered");
                Ok(())
            }
            (None, true) => {
                // Empty the slot first: no new invocation may start once we return
                lock(&self.slots).remove(&key);
                native(false)?;
                debug!(%kind, "event callback unregistered");
                Ok(())
            }
            (None, false) => Ok(()),
        }
    }

    fn lookup(&self, key: &K) -> Option<Arc<dyn Fn(E) + Send + Sync>> {
        lock(&self.slots).get(key).cloned()
    }

    fn contains(&self, key: &K) -> bool {
        lock(&self.slots).contains_key(key)
    }

    fn is_empty(&self) -> bool {
        lock(&self.slots).is_empty()
    }

    fn clear(&self) {
        let _transition = lock(&self.transition);
        lock(&self.slots).clear();
    }
}

#[derive(Debug, Default)]
struct Gate {
    closed: bool,
    in_flight: usize,
}

/// Marks one running dispatch, released on drop (also when a callback panics)
struct InFlight<'a> {
    dispatcher: &'a EventDispatcher,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        DISPATCH_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
        let mut gate = lock(&self.dispatcher.gate);
        gate.in_flight -= 1;
        if gate.in_flight == 0 {
            self.dispatcher.idle.notify_all();
        }
    }
}

/// Per-task event registry, and the entry point the driver fires events into.
///
/// Callbacks run on a driver-managed thread. They must not assume anything about the
/// thread they run on and may still be running when an unregister call returns.
pub struct EventDispatcher {
    task: TaskHandle,
    gate: Mutex<Gate>,
    idle: Condvar,
    done: SlotTable<(), DoneEvent>,
    every_n_samples: SlotTable<EveryNSamplesEventType, EveryNSamplesEvent>,
    signals: SlotTable<Signal, SignalEvent>,
}

impl EventDispatcher {
    pub fn new(task: TaskHandle) -> Self {
        Self {
            task,
            gate: Mutex::new(Gate::default()),
            idle: Condvar::new(),
            done: SlotTable::new(),
            every_n_samples: SlotTable::new(),
            signals: SlotTable::new(),
        }
    }

    pub fn task_handle(&self) -> TaskHandle {
        self.task
    }

    pub(crate) fn register_done<N>(&self, callback: Option<DoneCallback>, native: N) -> Result<()>
    where
        N: FnOnce(bool) -> Result<()>,
    {
        self.done.register((), EventKind::Done, callback, native)
    }

    pub(crate) fn register_every_n_samples<N>(
        &self,
        event_type: EveryNSamplesEventType,
        callback: Option<EveryNSamplesCallback>,
        native: N,
    ) -> Result<()>
    where
        N: FnOnce(bool) -> Result<()>,
    {
        self.every_n_samples.register(
            event_type,
            EventKind::every_n_samples(event_type),
            callback,
            native,
        )
    }

    pub(crate) fn register_signal<N>(
        &self,
        signal: Signal,
        callback: Option<SignalCallback>,
        native: N,
    ) -> Result<()>
    where
        N: FnOnce(bool) -> Result<()>,
    {
        self.signals
            .register(signal, EventKind::Signal(signal), callback, native)
    }

    pub fn is_registered(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Done => self.done.contains(&()),
            EventKind::EveryNSamplesAcquiredIntoBuffer => self
                .every_n_samples
                .contains(&EveryNSamplesEventType::AcquiredIntoBuffer),
            EventKind::EveryNSamplesTransferredFromBuffer => self
                .every_n_samples
                .contains(&EveryNSamplesEventType::TransferredFromBuffer),
            EventKind::Signal(signal) => self.signals.contains(&signal),
        }
    }

    /// Whether any event of this task currently has a callback
    pub fn has_registrations(&self) -> bool {
        !(self.done.is_empty() && self.every_n_samples.is_empty() && self.signals.is_empty())
    }

    /// Deliver a done event. Returns whether a callback received it.
    pub fn dispatch_done(&self, status: i32) -> bool {
        let event = DoneEvent {
            task_handle: self.task,
            status,
            received_at: Utc::now(),
        };
        self.deliver(&self.done, (), EventKind::Done, event)
    }

    pub fn dispatch_every_n_samples(
        &self,
        event_type: EveryNSamplesEventType,
        number_of_samples: u32,
    ) -> bool {
        let event = EveryNSamplesEvent {
            task_handle: self.task,
            event_type,
            number_of_samples,
            received_at: Utc::now(),
        };
        self.deliver(
            &self.every_n_samples,
            event_type,
            EventKind::every_n_samples(event_type),
            event,
        )
    }

    pub fn dispatch_signal(&self, signal: Signal) -> bool {
        let event = SignalEvent {
            task_handle: self.task,
            signal_type: signal,
            received_at: Utc::now(),
        };
        self.deliver(&self.signals, signal, EventKind::Signal(signal), event)
    }

    /// Deliver a signal event identified by the driver's raw signal id
    pub fn dispatch_signal_id(&self, signal_id: i32) -> bool {
        match Signal::from_value(signal_id) {
            Some(signal) => self.dispatch_signal(signal),
            None => {
                warn!(task = %self.task, signal_id, "driver fired an unknown signal id, dropping event");
                false
            }
        }
    }

    fn enter(&self) -> Option<InFlight<'_>> {
        let mut gate = lock(&self.gate);
        if gate.closed {
            return None;
        }
        gate.in_flight += 1;
        DISPATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Some(InFlight { dispatcher: self })
    }

    fn deliver<K: Copy + Eq + Hash, E>(
        &self,
        table: &SlotTable<K, E>,
        key: K,
        kind: EventKind,
        event: E,
    ) -> bool {
        let Some(_in_flight) = self.enter() else {
            trace!(task = %self.task, %kind, "task closed, dropping event");
            return false;
        };
        let Some(callback) = table.lookup(&key) else {
            trace!(task = %self.task, %kind, "no callback registered, dropping event");
            return false;
        };

        // Never unwind into the driver's thread
        if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            error!(task = %self.task, %kind, "event callback panicked");
        }
        true
    }

    /// Drop every registration and stop accepting events.
    ///
    /// Blocks until dispatches already running have returned, unless called from inside
    /// a dispatch on this thread.
    pub(crate) fn close(&self) {
        lock(&self.gate).closed = true;
        self.done.clear();
        self.every_n_samples.clear();
        self.signals.clear();

        if DISPATCH_DEPTH.with(Cell::get) > 0 {
            debug!(task = %self.task, "closed from an event callback, not waiting for in-flight callbacks");
            return;
        }

        let gate = lock(&self.gate);
        let _idle = self
            .idle
            .wait_while(gate, |gate| gate.in_flight > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("task", &self.task)
            .field("done", &self.done.contains(&()))
            .field("every_n_samples", &lock(&self.every_n_samples.slots).keys().collect::<Vec<_>>())
            .field("signals", &lock(&self.signals.slots).keys().collect::<Vec<_>>())
            .finish()
    }
}
