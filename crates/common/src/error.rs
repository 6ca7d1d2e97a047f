//! Common error types
//!
//! Every fallible operation in the workspace reports through [`Error`]. Native
//! status codes from the driver kit ([`DdkStatus`]) and the event transport
//! ([`EventStatus`]) are wrapped together with the call that produced them;
//! [`check`] and [`check_event`] are the only places that translate a status
//! into an error.

use thiserror::Error;

/// Status codes returned by the USB driver kit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DdkStatus {
    #[error("The operation failed")]
    Failed,
    #[error("No permission")]
    NoPermission,
    #[error("Invalid parameter")]
    InvalidParameter,
    #[error("Memory-related error")]
    MemoryError,
    #[error("Invalid operation")]
    InvalidOperation,
    #[error("Null pointer exception")]
    NullPointer,
    #[error("Device busy")]
    DeviceBusy,
    #[error("Device I/O operation failed")]
    IoFailed,
    #[error("Transmission timeout")]
    Timeout,
    #[error("Driver kit not initialized")]
    NotInitialized,
    #[error("Device not found")]
    NotFound,
    #[error("Unknown error")]
    Unknown(i32),
}

impl DdkStatus {
    /// Error category name
    pub const CATEGORY: &'static str = "USB Error";

    /// Numeric status code as reported by the driver kit
    pub fn code(&self) -> i32 {
        match self {
            DdkStatus::Failed => -1,
            DdkStatus::NoPermission => 201,
            DdkStatus::InvalidParameter => 401,
            DdkStatus::MemoryError => 27400001,
            DdkStatus::InvalidOperation => 27400002,
            DdkStatus::IoFailed => 27400003,
            DdkStatus::Timeout => 27400004,
            DdkStatus::NullPointer => -5,
            DdkStatus::DeviceBusy => -6,
            DdkStatus::NotInitialized => -8,
            DdkStatus::NotFound => -9,
            DdkStatus::Unknown(code) => *code,
        }
    }

    /// Map a raw status code; `None` means success
    pub fn from_code(code: i32) -> Option<Self> {
        let status = match code {
            0 => return None,
            -1 => DdkStatus::Failed,
            201 => DdkStatus::NoPermission,
            401 => DdkStatus::InvalidParameter,
            27400001 => DdkStatus::MemoryError,
            27400002 => DdkStatus::InvalidOperation,
            27400003 => DdkStatus::IoFailed,
            27400004 => DdkStatus::Timeout,
            -5 => DdkStatus::NullPointer,
            -6 => DdkStatus::DeviceBusy,
            -8 => DdkStatus::NotInitialized,
            -9 => DdkStatus::NotFound,
            other => DdkStatus::Unknown(other),
        };
        Some(status)
    }
}

/// Status codes returned by the event transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EventStatus {
    #[error("permission verification failed")]
    PermissionDenied,
    #[error("invalid input parameter")]
    InvalidParameter,
    #[error("this app cannot send system common events")]
    NotSystemService,
    #[error("IPC request failed to send")]
    SendingRequestFailed,
    #[error("Common event service not init")]
    InitUndone,
    #[error("obtain system parameters failed")]
    ObtainSystemParams,
    #[error("The subscriber number exceed system specification")]
    SubscriberNumExceeded,
    #[error("A memory allocation error occurs")]
    AllocMemoryFailed,
    #[error("unknown error")]
    Unknown(i32),
}

impl EventStatus {
    /// Error category name
    pub const CATEGORY: &'static str = "CommonEvent Error";

    /// Numeric status code as reported by the event transport
    pub fn code(&self) -> i32 {
        match self {
            EventStatus::PermissionDenied => 201,
            EventStatus::InvalidParameter => 401,
            EventStatus::NotSystemService => 1500004,
            EventStatus::SendingRequestFailed => 1500007,
            EventStatus::InitUndone => 1500008,
            EventStatus::ObtainSystemParams => 1500009,
            EventStatus::SubscriberNumExceeded => 1500010,
            EventStatus::AllocMemoryFailed => 1500011,
            EventStatus::Unknown(code) => *code,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{context}: {status} ({} {})", DdkStatus::CATEGORY, status.code())]
    Transport { status: DdkStatus, context: String },

    #[error("{context}: {status} ({} {})", EventStatus::CATEGORY, status.code())]
    Event {
        status: EventStatus,
        context: String,
    },

    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Device {0:#018x} not found")]
    DeviceNotFound(u64),

    #[error("Device id {0:#018x} does not fit a bus/address pair")]
    InvalidDeviceId(u64),

    #[error("Interface {interface} of device {device_id:#018x} is not claimed")]
    NotClaimed { device_id: u64, interface: u8 },

    #[error("Interface {interface} of device {device_id:#018x} is already claimed")]
    AlreadyClaimed { device_id: u64, interface: u8 },

    #[error("Invalid control request: {0}")]
    InvalidRequest(String),

    #[error("Record error: {0}")]
    Record(#[from] record::RecordError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Machine-readable code for this error
    ///
    /// Transport rejections keep their native code. Application errors reuse
    /// the closest driver-kit code so callers can branch on a single integer.
    pub fn code(&self) -> i32 {
        match self {
            Error::Transport { status, .. } => status.code(),
            Error::Event { status, .. } => status.code(),
            Error::IndexOutOfRange { .. }
            | Error::DeviceNotFound(_)
            | Error::InvalidDeviceId(_)
            | Error::InvalidRequest(_)
            | Error::Record(_)
            | Error::Config(_) => DdkStatus::InvalidParameter.code(),
            Error::NotClaimed { .. } => DdkStatus::InvalidOperation.code(),
            Error::AlreadyClaimed { .. } => DdkStatus::DeviceBusy.code(),
            Error::Io(_) => DdkStatus::IoFailed.code(),
            Error::Channel(_) | Error::Other(_) => DdkStatus::Failed.code(),
        }
    }

    /// Driver-kit status, if this error came from the driver kit
    pub fn status(&self) -> Option<DdkStatus> {
        match self {
            Error::Transport { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.status() == Some(DdkStatus::Timeout)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Error::AlreadyClaimed { .. }) || self.status() == Some(DdkStatus::DeviceBusy)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Translate a driver-kit call result into a reportable error
pub fn check<T>(result: std::result::Result<T, DdkStatus>, context: &str) -> Result<T> {
    result.map_err(|status| Error::Transport {
        status,
        context: context.to_string(),
    })
}

/// Translate an event-transport call result into a reportable error
pub fn check_event<T>(result: std::result::Result<T, EventStatus>, context: &str) -> Result<T> {
    result.map_err(|status| Error::Event {
        status,
        context: context.to_string(),
    })
}
