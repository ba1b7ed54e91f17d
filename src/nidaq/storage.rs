use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::{self, DaqmxDriver};
use crate::config::SessionOptions;
use crate::error::Result;
use crate::nidaq::task::Task;

/// A task saved in the driver's task store (NI MAX), referenced by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTask {
    pub name: String,
}

impl PersistedTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Load the saved task and wrap the handle the driver returns.
    ///
    /// The returned [`Task`] is bound to the driver that loaded it.
    pub fn load(
        &self,
        options: Option<&SessionOptions>,
        driver: Option<Arc<dyn DaqmxDriver>>,
    ) -> Result<Task> {
        let driver = backend::select_driver(options, driver)?;
        let handle = driver.load_task(&self.name)?;
        info!(task = %handle, name = %self.name, "loaded persisted task");
        Task::from_existing_handle(handle, None, Some(driver))
    }
}
