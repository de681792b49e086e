mod params;
mod config;
mod channel;
mod capture;
mod window;
mod decode;
mod session;
pub mod sys;

#[derive(Debug)]
pub enum Error {
    InvalidConfiguration(String),
    OutOfRange { offset: usize, count: usize, capacity: usize },
    HardwareFault(sys::FaultCode),
    NotArmed,
    InvalidState { operation: &'static str, state: ScanState },
    Driver(Box<dyn std::error::Error + Sync + Send + 'static>),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::InvalidConfiguration(message) =>
                write!(f, "invalid configuration: {}", message),
            Self::OutOfRange { offset, count, capacity } =>
                write!(f, "read of {} elements at {} exceeds buffer capacity of {}",
                    count, offset, capacity),
            Self::HardwareFault(code) =>
                write!(f, "{}", code),
            Self::NotArmed =>
                write!(f, "scan session is not armed"),
            Self::InvalidState { operation, state } =>
                write!(f, "cannot {} a scan session in state {:?}", operation, state),
            Self::Driver(error) =>
                write!(f, "driver error: {}", error),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Driver(error) => Some(error.as_ref()),
            _ => None
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Driver(error.into())
    }
}

pub type Result<T> =
    core::result::Result<T, Error>;

pub use params::{
    ElementWidth,
    Range,
    ThermocoupleType,
    Scale,
};

pub use config::{
    ScanOptions,
    TriggerKind,
    TriggerDescriptor,
    ProgressDelivery,
    ScanConfiguration,
};

pub use channel::{
    ChannelKind,
    ChannelMetadata,
    validate_channels,
};

pub use capture::{
    RingCursor,
    RawSampleBuffer,
};

pub use window::{
    WindowMode,
    WindowRequest,
    RawWindow,
    extract,
    frame_positions,
};

pub use decode::{
    Reading,
    Warning,
    Decoded,
    ChannelWindow,
    Window,
    Decoder,
};

pub use session::{
    ScanState,
    ScanStatus,
    ScanSession,
};

pub use sys::{
    Driver,
    FaultCode,
    ProgressUpdate,
    ScanRequest,
};
