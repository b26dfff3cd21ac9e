use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("bad length prefix")]
    BadLengthPrefix,

    #[error("empty payload")]
    EmptyPayload,

    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("unsupported operation for payload: {0}")]
    NoRoute(String),

    #[error("device '{0}' not found")]
    DeviceNotFound(String),

    #[error("no device specified for device-only command")]
    NoDeviceSpecified,

    #[error("no device available")]
    NoDeviceAvailable,

    #[error("no devices/emulators found")]
    NoDevices,

    #[error("more than one device/emulator")]
    AmbiguousDevice,

    #[error("Sync protocol error: {0}")]
    SyncError(String),

    #[error("interactive shell is not supported")]
    InteractiveShellUnsupported,

    #[error("exec command is not supported")]
    ExecUnsupported,

    #[error("cannot rebind existing socket")]
    CannotRebind,

    #[error("internal error")]
    Internal,
}

pub type AdbResult<T> = Result<T, AdbError>;
