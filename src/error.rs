//! Error types for the S7CommPlus client.

use thiserror::Error;

/// Result type alias for S7CommPlus operations.
pub type Result<T> = std::result::Result<T, S7Error>;

/// Broad error category.
///
/// The numeric codes returned by [`ErrorKind::code`] are stable and may be
/// logged or exported by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connect, timeout or disconnect problems.
    Transport,
    /// Malformed PDU, sequence/integrity mismatch, truncated field.
    Protocol,
    /// Non-zero return value for an otherwise well-formed exchange.
    Device,
    /// Unsupported firmware or access denied.
    Auth,
    /// A value's bytes don't match its declared shape.
    Decode,
    /// The caller passed a value outside its documented range.
    InvalidArgument,
}

impl ErrorKind {
    /// Stable integer code for this category.
    pub const fn code(&self) -> u16 {
        match self {
            Self::Transport => 1,
            Self::Protocol => 2,
            Self::Device => 3,
            Self::Auth => 4,
            Self::Decode => 5,
            Self::InvalidArgument => 6,
        }
    }
}

/// S7CommPlus error types.
#[derive(Debug, Error)]
pub enum S7Error {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Not connected to the device
    #[error("Not connected")]
    NotConnected,

    /// Connection timeout
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// No matching response within the configured read timeout
    #[error("Read timeout")]
    ReadTimeout,

    /// Peer closed the connection
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS engine failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// Operation not allowed in the current session state
    #[error("Invalid session state: {0}")]
    InvalidState(&'static str),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid frame format
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Input ended before a field was complete
    #[error("Truncated input: needed {needed} bytes, {available} available")]
    TruncatedInput { needed: usize, available: usize },

    /// Variable-length quantity does not fit the target width
    #[error("VLQ overflow for {bits}-bit value")]
    Overflow { bits: u32 },

    /// Sequence number mismatch
    #[error("Sequence number mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u16, actual: u16 },

    /// Integrity id mismatch
    #[error("Integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: u32, actual: u32 },

    /// Response carried a different function code than the request
    #[error("Unexpected function code: expected 0x{expected:04X}, got 0x{actual:04X}")]
    UnexpectedFunction { expected: u16, actual: u16 },

    /// Unknown function code
    #[error("Unknown function code: 0x{0:04X}")]
    UnknownFunctionCode(u16),

    /// Device returned a non-zero return value
    #[error("Device error 0x{return_value:016X} for function 0x{function:04X}")]
    Device { function: u16, return_value: u64 },

    /// Firmware or device family not supported
    #[error("Firmware not supported: {0}")]
    FirmwareNotSupported(String),

    /// Legitimation rejected by the device
    #[error("Access denied (return value {0})")]
    AccessDenied(i64),

    /// Value decoding error
    #[error("Decode error: {0}")]
    Decode(String),

    /// Attribute missing from an object
    #[error("Attribute {0} not found")]
    AttributeNotFound(u32),

    /// Caller supplied an out-of-range value
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl S7Error {
    /// Create a protocol error with a message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an invalid frame error.
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create an invalid value error.
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_)
            | Self::NotConnected
            | Self::ConnectionTimeout
            | Self::ReadTimeout
            | Self::ConnectionClosed
            | Self::Io(_)
            | Self::Tls(_)
            | Self::InvalidState(_) => ErrorKind::Transport,
            Self::Protocol(_)
            | Self::InvalidFrame(_)
            | Self::TruncatedInput { .. }
            | Self::Overflow { .. }
            | Self::SequenceMismatch { .. }
            | Self::IntegrityMismatch { .. }
            | Self::UnexpectedFunction { .. }
            | Self::UnknownFunctionCode(_) => ErrorKind::Protocol,
            Self::Device { .. } => ErrorKind::Device,
            Self::FirmwareNotSupported(_) | Self::AccessDenied(_) => ErrorKind::Auth,
            Self::Decode(_) | Self::AttributeNotFound(_) => ErrorKind::Decode,
            Self::InvalidValue(_) => ErrorKind::InvalidArgument,
        }
    }

    /// Check if this error indicates a connection problem.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::NotConnected
                | Self::ConnectionTimeout
                | Self::ConnectionClosed
                | Self::Io(_)
                | Self::Tls(_)
        )
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionTimeout | Self::ReadTimeout)
    }

    /// Errors after which the session can no longer be trusted.
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Protocol)
            && !matches!(self, Self::ReadTimeout | Self::InvalidState(_))
    }
}
