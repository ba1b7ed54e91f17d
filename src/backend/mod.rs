use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::SessionOptions;
use crate::error::{DaqError, Result};

pub mod daqmx_driver;

#[cfg(feature = "sim")]
pub mod sim;

#[cfg(feature = "nidaq")]
pub mod nidaq;

pub use daqmx_driver::DaqmxDriver;

/// Which implementation of the native API a session talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverBackend {
    /// In-process simulation of the driver
    Sim,
    /// The NI-DAQmx C library
    Nidaq,
}

impl Default for DriverBackend {
    fn default() -> Self {
        if cfg!(feature = "nidaq") {
            DriverBackend::Nidaq
        } else {
            DriverBackend::Sim
        }
    }
}

/// Pick the driver a task binds to.
///
/// An explicitly passed driver always wins. Otherwise `options` open a new session on
/// the configured backend, and with neither the process-wide default driver is shared.
pub fn select_driver(
    options: Option<&SessionOptions>,
    driver: Option<Arc<dyn DaqmxDriver>>,
) -> Result<Arc<dyn DaqmxDriver>> {
    match (driver, options) {
        (Some(driver), _) => Ok(driver),
        (None, Some(options)) => open_session(options),
        (None, None) => default_driver(),
    }
}

/// The driver shared by every task built without options or an explicit driver
pub fn default_driver() -> Result<Arc<dyn DaqmxDriver>> {
    static DEFAULT: OnceLock<Arc<dyn DaqmxDriver>> = OnceLock::new();

    if let Some(driver) = DEFAULT.get() {
        return Ok(driver.clone());
    }
    let driver = open_session(&SessionOptions::default())?;
    Ok(DEFAULT.get_or_init(|| driver).clone())
}

fn open_session(options: &SessionOptions) -> Result<Arc<dyn DaqmxDriver>> {
    info!(
        session = options.session_name.as_deref().unwrap_or("default"),
        backend = ?options.backend,
        "opening driver session"
    );

    match options.backend {
        #[cfg(feature = "sim")]
        DriverBackend::Sim => Ok(Arc::new(sim::SimDriver::new(options.sim.clone()))),
        #[cfg(feature = "nidaq")]
        DriverBackend::Nidaq => Ok(Arc::new(nidaq::NidaqDriver::new())),
        #[allow(unreachable_patterns)]
        backend => Err(DaqError::BackendUnavailable(backend)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "sim")]
    #[test]
    fn explicit_driver_wins_over_options() {
        let driver: Arc<dyn DaqmxDriver> = Arc::new(sim::SimDriver::default());
        let options = SessionOptions {
            backend: DriverBackend::Nidaq,
            ..SessionOptions::default()
        };
        let selected = select_driver(Some(&options), Some(driver.clone())).unwrap();
        assert!(Arc::ptr_eq(&selected, &driver));
    }

    #[cfg(not(feature = "nidaq"))]
    #[test]
    fn nidaq_backend_is_unavailable_without_feature() {
        let options = SessionOptions {
            backend: DriverBackend::Nidaq,
            ..SessionOptions::default()
        };
        assert!(matches!(
            select_driver(Some(&options), None),
            Err(DaqError::BackendUnavailable(DriverBackend::Nidaq))
        ));
    }

    #[cfg(all(feature = "sim", not(feature = "nidaq")))]
    #[test]
    fn default_driver_is_shared() {
        let first = default_driver().unwrap();
        let second = select_driver(None, None).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
