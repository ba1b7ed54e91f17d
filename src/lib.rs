//! Task and event plumbing over the NI-DAQmx driver.
//!
//! A [`Task`] owns one native task handle. Callbacks for done, every-N-samples and
//! signal events are registered on the task and invoked from a driver thread. The
//! driver itself sits behind [`backend::DaqmxDriver`]: either the NI-DAQmx C library
//! (feature `nidaq`) or an in-process simulation (feature `sim`, on by default).

pub mod backend;
pub mod config;
pub mod error;
pub mod nidaq;

pub use config::SessionOptions;
pub use error::{DaqError, DaqErrorCode, Result};
pub use nidaq::{PersistedTask, Task, TaskHandle};
