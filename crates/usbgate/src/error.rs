//! Error taxonomy for discovery, sessions, and transfers.

use thiserror::Error;

/// Errors reported by the transport layer underneath a session.
///
/// These pass through to callers verbatim; the only place this crate
/// interprets them is during discovery, where a few codes are recognized as
/// benign reasons to skip a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Transfer timed out
    #[error("transfer timed out")]
    Timeout,
    /// Endpoint stalled (protocol error)
    #[error("endpoint stalled")]
    Pipe,
    /// Device was disconnected
    #[error("device disconnected")]
    NoDevice,
    /// Device or endpoint not found
    #[error("device or endpoint not found")]
    NotFound,
    /// Device is busy or claimed by another process
    #[error("device busy")]
    Busy,
    /// Buffer overflow
    #[error("buffer overflow")]
    Overflow,
    /// I/O error
    #[error("i/o error")]
    Io,
    /// Invalid parameter rejected by the transport
    #[error("invalid parameter")]
    InvalidParam,
    /// Access denied (permissions)
    #[error("access denied")]
    Access,
    /// Operation not supported by this device or driver
    #[error("not supported")]
    NotSupported,
    /// Transport ran out of memory
    #[error("out of memory")]
    NoMem,
    /// Other error with message
    #[error("{message}")]
    Other { message: String },
}

/// Crate-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// No device matched the selector, or an open session no longer matches
    /// the expected identity. A defined empty result, not a failure of the
    /// enumeration machinery.
    #[error("no matching device found")]
    NotFound,

    /// Caller misuse: empty buffer or otherwise unusable argument. Detected
    /// before any hardware is touched.
    #[error("invalid argument")]
    InvalidArgument,

    /// Operation attempted on a session that is not open.
    #[error("session is not open")]
    InvalidState,

    /// Resource exhaustion reported while setting up a session.
    #[error("out of memory")]
    OutOfMemory,

    /// The enumeration subsystem itself failed. Aborts the scan immediately;
    /// per-candidate failures never take this form.
    #[error("device enumeration failed: {0}")]
    Enumeration(TransportError),

    /// A device returned an identity descriptor this crate cannot accept,
    /// e.g. an advertised serial number with no characters. Recoverable at
    /// scan level: the candidate is skipped.
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(&'static str),

    /// Verbatim transport failure (timeout, device removed, access denied...).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Type alias for crate results
pub type Result<T> = std::result::Result<T, Error>;

/// OS-style numeric codes for each error category, for callers that carry
/// status across an FFI or wire boundary.
pub mod code {
    pub const SUCCESS: u32 = 0;
    pub const ACCESS_DENIED: u32 = 5;
    pub const OUT_OF_MEMORY: u32 = 14;
    pub const GEN_FAILURE: u32 = 31;
    pub const SHARING_VIOLATION: u32 = 32;
    pub const NOT_SUPPORTED: u32 = 50;
    pub const INVALID_PARAMETER: u32 = 87;
    pub const INSUFFICIENT_BUFFER: u32 = 122;
    pub const IO_DEVICE: u32 = 1117;
    pub const DEVICE_NOT_CONNECTED: u32 = 1167;
    pub const NOT_FOUND: u32 = 1168;
    pub const TIMEOUT: u32 = 1460;
    pub const INVALID_STATE: u32 = 5023;
}

impl TransportError {
    /// Numeric code for this transport error.
    pub fn os_code(&self) -> u32 {
        match self {
            TransportError::Timeout => code::TIMEOUT,
            TransportError::Pipe => code::GEN_FAILURE,
            TransportError::NoDevice => code::DEVICE_NOT_CONNECTED,
            TransportError::NotFound => code::NOT_FOUND,
            TransportError::Busy => code::SHARING_VIOLATION,
            TransportError::Overflow => code::INSUFFICIENT_BUFFER,
            TransportError::Io => code::IO_DEVICE,
            TransportError::InvalidParam => code::INVALID_PARAMETER,
            TransportError::Access => code::ACCESS_DENIED,
            TransportError::NotSupported => code::NOT_SUPPORTED,
            TransportError::NoMem => code::OUT_OF_MEMORY,
            TransportError::Other { .. } => code::GEN_FAILURE,
        }
    }

    /// True for transport-init failures that are expected during a scan
    /// (driverless devices, devices claimed by another process) and must not
    /// be reported as anomalies.
    pub fn is_benign_claim_failure(&self) -> bool {
        matches!(self, TransportError::NotSupported | TransportError::Busy)
    }
}

impl Error {
    /// Numeric code for this error.
    pub fn os_code(&self) -> u32 {
        match self {
            Error::NotFound => code::NOT_FOUND,
            Error::InvalidArgument => code::INVALID_PARAMETER,
            Error::InvalidState => code::INVALID_STATE,
            Error::OutOfMemory => code::OUT_OF_MEMORY,
            Error::Enumeration(e) => e.os_code(),
            Error::MalformedDescriptor(_) => code::GEN_FAILURE,
            Error::Transport(e) => e.os_code(),
        }
    }
}
