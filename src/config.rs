use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::DriverBackend;
use crate::error::{DaqError, Result};
use crate::nidaq::timing::SampleClockTiming;

/// Options used to open a driver session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Shows up in the logs of every task opened on this session
    pub session_name: Option<String>,
    pub backend: DriverBackend,
    pub sim: SimConfig,
}

impl SessionOptions {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_error = |source: Box<dyn std::error::Error + Send + Sync>| DaqError::Config {
            path: path.to_path_buf(),
            source,
        };

        let data = fs::read_to_string(path).map_err(|e| config_error(Box::new(e)))?;
        serde_json::from_str(&data).map_err(|e| config_error(Box::new(e)))
    }
}

/// Behaviour of the simulated driver backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Multiplies simulated wall-clock time, 1.0 runs at the configured sample rate
    pub time_scale: f64,
    /// Tasks the simulated task store can load by name
    pub persisted_tasks: Vec<PersistedTaskTemplate>,
    /// Ends every run early with a non-zero done status
    pub fault: Option<SimFault>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            persisted_tasks: Vec::new(),
            fault: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedTaskTemplate {
    pub name: String,
    #[serde(default)]
    pub ai_voltage_channels: Vec<String>,
    #[serde(default)]
    pub timing: Option<SampleClockTiming>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimFault {
    pub after_samples: u64,
    pub status: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_object_gives_defaults() {
        let options: SessionOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, SessionOptions::default());
        assert_eq!(options.sim.time_scale, 1.0);
    }

    #[test]
    fn loads_sim_session_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "session_name": "bench",
                "backend": "sim",
                "sim": {{
                    "time_scale": 0.5,
                    "persisted_tasks": [{{ "name": "ai_sweep", "ai_voltage_channels": ["Dev1/ai0"] }}],
                    "fault": {{ "after_samples": 10, "status": -200279 }}
                }}
            }}"#
        )
        .unwrap();

        let options = SessionOptions::from_json_file(file.path()).unwrap();
        assert_eq!(options.session_name.as_deref(), Some("bench"));
        assert_eq!(options.backend, DriverBackend::Sim);
        assert_eq!(options.sim.persisted_tasks[0].ai_voltage_channels, vec!["Dev1/ai0"]);
        assert_eq!(
            options.sim.fault,
            Some(SimFault {
                after_samples: 10,
                status: -200279
            })
        );
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = SessionOptions::from_json_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, DaqError::Config { .. }));
    }
}
