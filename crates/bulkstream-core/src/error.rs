//! Error types for bulkstream.
//!
//! Two tiers: `ConfigError` is returned synchronously and never mutates a
//! session; everything else in `BulkError` is a runtime error that ends up in
//! the session's error queue and cancels the whole session.

use std::fmt;

use crate::callback::CallbackKind;
use crate::entry::{Direction, StreamId, TransferStatus};

/// Result type for bulkstream operations
pub type Result<T> = std::result::Result<T, BulkError>;

/// Synchronous configuration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Stream list is empty
    NoStreams,

    /// Stream uses a different hardware context than the session
    ContextMismatch { stream: StreamId },

    /// Transfers requested in a direction without a callback for it
    MissingCallback { stream: StreamId, direction: Direction },

    /// Transfers requested with zero packets per transfer
    ZeroPacketsPerTransfer { stream: StreamId, direction: Direction },

    /// More than one write transfer on a stream
    TooManyWriteTransfers { stream: StreamId, requested: u32 },

    /// No stream declares a transfer in either direction
    NoTransfers,

    /// Device reports a zero packet or chunk size
    ZeroPacketSize { stream: StreamId },

    /// Backend descriptors don't cover its own timeouts
    TimeoutsUnsupported,

    /// Stream id out of range
    UndefinedStream(StreamId),

    /// GET_FD returned a negative descriptor
    BadReadyFd { stream: StreamId, fd: i32 },

    /// The other execution mode is already active
    ModeActive(&'static str),

    /// Unparseable line/device setting
    InvalidLineSetting { key: &'static str, value: String },

    /// Generic validation failure
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoStreams => write!(f, "no streams were defined"),
            ConfigError::ContextMismatch { stream } => {
                write!(f, "stream {} does not use the session's USB context", stream)
            }
            ConfigError::MissingCallback { stream, direction } => write!(
                f,
                "stream {}: {} transfers requested, but no {} callback is set",
                stream, direction, direction
            ),
            ConfigError::ZeroPacketsPerTransfer { stream, direction } => {
                write!(f, "stream {}: {} packets per transfer is zero", stream, direction)
            }
            ConfigError::TooManyWriteTransfers { stream, requested } => write!(
                f,
                "stream {}: only one write transfer is allowed, {} requested",
                stream, requested
            ),
            ConfigError::NoTransfers => {
                write!(f, "no streams have either reading or writing transfers")
            }
            ConfigError::ZeroPacketSize { stream } => {
                write!(f, "stream {}: device reports zero packet size", stream)
            }
            ConfigError::TimeoutsUnsupported => {
                write!(f, "backend poll descriptors do not handle timeouts")
            }
            ConfigError::UndefinedStream(id) => write!(f, "undefined stream id {}", id),
            ConfigError::BadReadyFd { stream, fd } => {
                write!(f, "stream {}: read callback reported descriptor {}", stream, fd)
            }
            ConfigError::ModeActive(mode) => write!(f, "{} version is already started", mode),
            ConfigError::InvalidLineSetting { key, value } => {
                write!(f, "invalid {} value '{}'", key, value)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// All bulkstream errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkError {
    /// Synchronous configuration error
    Config(ConfigError),

    /// OS error with errno
    Os(i32),

    /// Hardware refused a transfer submission
    SubmitRejected,

    /// A callback reported failure
    Callback { kind: CallbackKind, code: i32 },

    /// FILL_BUFFER claimed more bytes than the buffer holds
    CallbackOverrun { kind: CallbackKind, len: i32, capacity: usize },

    /// Completion with a status the reactor doesn't handle
    UnknownStatus(TransferStatus),

    /// No read activity within the watchdog timeout
    Timeout,

    /// Event handling was interrupted (not fatal)
    Interrupted,

    /// Backend-specific failure
    Hardware(String),

    /// Session state was never set up
    NotInitialized,

    /// Session state wasn't torn down before a new init
    AlreadyInitialized,

    /// Reactor thread panicked
    ThreadPanicked,

    /// Operation on a slot whose buffer is owned by the hardware
    SlotBusy,
}

impl fmt::Display for BulkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkError::Config(e) => write!(f, "{}", e),
            BulkError::Os(e) => write!(f, "OS error: errno {}", e),
            BulkError::SubmitRejected => write!(f, "submit transfer failed"),
            BulkError::Callback { kind, code } => {
                write!(f, "callback {} reported error {}", kind, code)
            }
            BulkError::CallbackOverrun { kind, len, capacity } => write!(
                f,
                "callback {} reported {} bytes for a {} byte buffer",
                kind, len, capacity
            ),
            BulkError::UnknownStatus(s) => write!(f, "unknown state: {}", s),
            BulkError::Timeout => write!(f, "timeout reached"),
            BulkError::Interrupted => write!(f, "interrupted"),
            BulkError::Hardware(msg) => write!(f, "hardware: {}", msg),
            BulkError::NotInitialized => write!(f, "state wasn't properly initialized"),
            BulkError::AlreadyInitialized => write!(f, "state wasn't properly destroyed"),
            BulkError::ThreadPanicked => write!(f, "reactor thread panicked"),
            BulkError::SlotBusy => write!(f, "transfer is still owned by the hardware"),
        }
    }
}

impl std::error::Error for BulkError {}

impl From<ConfigError> for BulkError {
    fn from(e: ConfigError) -> Self {
        BulkError::Config(e)
    }
}

impl BulkError {
    /// True for the synchronous configuration tier
    #[inline]
    pub fn is_config(&self) -> bool {
        matches!(self, BulkError::Config(_))
    }
}
