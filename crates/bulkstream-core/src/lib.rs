//! # bulkstream-core - Types and traits for the bulk-transfer reactor
//!
//! This crate defines the seams of the system. The reactor in `bulkstream`
//! depends only on these traits; the Linux implementations live in
//! `bulkstream-module`.
//!
//! - [`backend::UsbBackend`] - asynchronous bulk transfers on one hardware context
//! - [`notifier::Notifier`] - cross-thread wake channel
//! - [`callback::StreamCallback`] - the caller's per-direction data hooks
//!
//! Plus the plain data shared by all of them: slot ids, completions, errors,
//! frame splitting, line settings, logging and env helpers.

pub mod entry;
pub mod callback;
pub mod backend;
pub mod notifier;
pub mod frame;
pub mod line;
pub mod error;
pub mod env;
#[macro_use]
pub mod log;

pub use backend::{PollFd, PollFdChange, Rejected, UsbBackend};
pub use callback::{CallbackKind, CounterCallback, ResetCallback, StreamCallback};
pub use entry::{
    ContextId, DeviceHandle, Direction, SlotId, StreamId, TransferCompletion, TransferHandle,
    TransferStatus,
};
pub use error::{BulkError, ConfigError, Result};
pub use frame::{for_each_frame, ModemStatus};
pub use line::{DataBits, DeviceSelector, FlowControl, Interface, LineConfig, Parity, StopBits};
pub use notifier::Notifier;
