use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::backend::DriverBackend;
use crate::nidaq::events::EventKind;
use crate::nidaq::task::TaskHandle;

pub type Result<T> = std::result::Result<T, DaqError>;

/// Symbolic DAQmx status codes surfaced by this crate.
///
/// The names follow the driver's own error enumeration so callers can match on them the
/// same way they would on the C constants. Codes this crate has no name for are kept
/// verbatim in [`DaqErrorCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DaqErrorCode {
    InvalidTask,
    TaskNotInDataNeighborhood,
    CanNotPerformOpWhenNoChansInTask,
    CannotPerformOpWhileTaskRunning,
    WaitUntilDoneDoesNotIndicateDone,
    DoneEventAlreadyRegistered,
    EveryNSampsAcqIntoBufferEventAlreadyRegistered,
    EveryNSampsTransferredFromBufferEventAlreadyRegistered,
    SignalEventAlreadyRegistered,
    Other(i32),
}

impl DaqErrorCode {
    const NAMED: [(DaqErrorCode, i32); 9] = [
        (DaqErrorCode::InvalidTask, -200088),
        (DaqErrorCode::TaskNotInDataNeighborhood, -200089),
        (DaqErrorCode::CanNotPerformOpWhenNoChansInTask, -200478),
        (DaqErrorCode::CannotPerformOpWhileTaskRunning, -200479),
        (DaqErrorCode::WaitUntilDoneDoesNotIndicateDone, -200560),
        (DaqErrorCode::DoneEventAlreadyRegistered, -200950),
        (DaqErrorCode::SignalEventAlreadyRegistered, -200949),
        (
            DaqErrorCode::EveryNSampsAcqIntoBufferEventAlreadyRegistered,
            -200966,
        ),
        (
            DaqErrorCode::EveryNSampsTransferredFromBufferEventAlreadyRegistered,
            -200967,
        ),
    ];

    pub fn from_code(code: i32) -> Self {
        Self::NAMED
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(named, _)| *named)
            .unwrap_or(DaqErrorCode::Other(code))
    }

    pub fn code(self) -> i32 {
        match self {
            DaqErrorCode::Other(code) => code,
            named => Self::NAMED
                .iter()
                .find(|(n, _)| *n == named)
                .map(|(_, code)| *code)
                .unwrap_or_default(),
        }
    }

    /// Driver-style symbolic name, e.g. `DONE_EVENT_ALREADY_REGISTERED`
    pub fn name(self) -> &'static str {
        match self {
            DaqErrorCode::InvalidTask => "INVALID_TASK",
            DaqErrorCode::TaskNotInDataNeighborhood => "TASK_NOT_IN_DATA_NEIGHBORHOOD",
            DaqErrorCode::CanNotPerformOpWhenNoChansInTask => {
                "CAN_NOT_PERFORM_OP_WHEN_NO_CHANS_IN_TASK"
            }
            DaqErrorCode::CannotPerformOpWhileTaskRunning => {
                "CANNOT_PERFORM_OP_WHILE_TASK_RUNNING"
            }
            DaqErrorCode::WaitUntilDoneDoesNotIndicateDone => {
                "WAIT_UNTIL_DONE_DOES_NOT_INDICATE_DONE"
            }
            DaqErrorCode::DoneEventAlreadyRegistered => "DONE_EVENT_ALREADY_REGISTERED",
            DaqErrorCode::EveryNSampsAcqIntoBufferEventAlreadyRegistered => {
                "EVERY_N_SAMPS_ACQ_INTO_BUFFER_EVENT_ALREADY_REGISTERED"
            }
            DaqErrorCode::EveryNSampsTransferredFromBufferEventAlreadyRegistered => {
                "EVERY_N_SAMPS_TRANSFERRED_FROM_BUFFER_EVENT_ALREADY_REGISTERED"
            }
            DaqErrorCode::SignalEventAlreadyRegistered => "SIGNAL_EVENT_ALREADY_REGISTERED",
            DaqErrorCode::Other(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for DaqErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Every failure this crate reports. Nothing is retried.
#[derive(Error, Debug)]
pub enum DaqError {
    /// A second callback was registered for an event kind that already has one
    #[error("{kind} event is already registered: {code}")]
    AlreadyRegistered { kind: EventKind, code: DaqErrorCode },

    /// The driver does not know this handle (never created, or already cleared)
    #[error("task handle {handle} is invalid or no longer exists")]
    InvalidHandle { handle: TaskHandle },

    /// Any other negative status returned by the driver
    #[error("DAQmx error {code}: {message}")]
    Driver { code: DaqErrorCode, message: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("driver backend {0:?} is not compiled into this build")]
    BackendUnavailable(DriverBackend),

    #[error("unable to load session options from {path:?}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl DaqError {
    /// Build the error for a negative driver status
    pub fn from_status(status: i32, message: impl Into<String>, handle: TaskHandle) -> Self {
        match DaqErrorCode::from_code(status) {
            DaqErrorCode::InvalidTask => DaqError::InvalidHandle { handle },
            code => DaqError::Driver {
                code,
                message: message.into(),
            },
        }
    }

    pub fn already_registered(kind: EventKind) -> Self {
        DaqError::AlreadyRegistered {
            kind,
            code: kind.already_registered_code(),
        }
    }

    /// The driver error code behind this error, if it came from the driver's taxonomy
    pub fn error_code(&self) -> Option<DaqErrorCode> {
        match self {
            DaqError::AlreadyRegistered { code, .. } | DaqError::Driver { code, .. } => {
                Some(*code)
            }
            DaqError::InvalidHandle { .. } => Some(DaqErrorCode::InvalidTask),
            DaqError::InvalidArgument(_)
            | DaqError::BackendUnavailable(_)
            | DaqError::Config { .. } => None,
        }
    }
}
