//! Collects events delivered to task callbacks and lets async tests wait for them.
#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::time::{self, Duration, error::Elapsed};

pub struct EventObserver<E> {
    events: Mutex<Vec<E>>,
    received: watch::Sender<usize>,
    /// Events already handed out by `wait_for_events`
    awaited: Mutex<usize>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<E: Clone + Send + 'static> EventObserver<E> {
    pub fn new() -> Arc<Self> {
        let (received, _) = watch::channel(0);
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            received,
            awaited: Mutex::new(0),
        })
    }

    /// Callback to register on a task, it records every event it is given
    pub fn handler(self: &Arc<Self>) -> Arc<dyn Fn(E) + Send + Sync> {
        let observer = self.clone();
        Arc::new(move |event: E| {
            lock(&observer.events).push(event);
            observer.received.send_modify(|count| *count += 1);
        })
    }

    /// Wait until `n` events beyond the ones already waited for have arrived
    pub async fn wait_for_events(&self, n: usize, timeout: Duration) -> Result<(), Elapsed> {
        let target = *lock(&self.awaited) + n;
        let mut received = self.received.subscribe();
        time::timeout(timeout, received.wait_for(|count| *count >= target))
            .await?
            .map(|_| ())
            .unwrap_or_default();
        *lock(&self.awaited) = target;
        Ok(())
    }

    pub fn events(&self) -> Vec<E> {
        lock(&self.events).clone()
    }

    pub fn count(&self) -> usize {
        lock(&self.events).len()
    }
}
