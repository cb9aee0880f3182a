//! # bulkstream - USB bulk-transfer reactor
//!
//! Keeps a fixed set of bulk transfers in flight on one shared hardware
//! context and bridges them to caller-supplied stream callbacks.
//!
//! ## Features
//!
//! - **Two execution modes**: a dedicated reactor thread, or caller-driven
//!   polling through a single readiness descriptor
//! - **Read side**: N parallel reads per stream, split into packets, with the
//!   2-byte modem status kept or stripped per stream
//! - **Write side**: one write per stream, armed by a data-ready descriptor
//! - **Control**: enable/disable reading and stream reset from any thread
//! - **Watchdog**: ends the session when nothing is read for `timeout` seconds
//! - **Fail fast**: any runtime error cancels the whole session and lands in
//!   a bounded error queue
//!
//! ## Quick Start
//!
//! ```ignore
//! use bulkstream::{BulkStream, LoopbackBackend, SessionConfig, StreamConfig, LineConfig};
//!
//! let backend = LoopbackBackend::create()?;
//! let device = backend.device(&LineConfig::default(), 64, 4096);
//! let stream = StreamConfig::new(device)
//!     .callback(echo.clone())
//!     .read_transfers(1, 2)
//!     .write_transfers(1, 1);
//!
//! let session = BulkStream::new(backend, vec![stream], SessionConfig::from_env())?;
//! session.start_thread()?;
//! // ... callbacks run on the reactor thread ...
//! session.stop_thread();
//! session.print_errors("bulkstream: ");
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   BulkStream (facade)                       │
//! │   start/stop thread|poll, enable/disable reading, errors    │
//! └─────────────────────────────────────────────────────────────┘
//!          │ control queue + eventfd wake     ▲ error queue
//!          ▼                                  │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Reactor (SessionCore)                      │
//! │      epoll: hardware │ wake │ tick │ write data-ready       │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                  │
//!          ▼                                  ▼
//!    ┌───────────────┐                ┌──────────────────┐
//!    │  UsbBackend   │                │  StreamCallback  │
//!    │ submit/cancel │                │ fill/confirm/read│
//!    └───────────────┘                └──────────────────┘
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod stream;
mod slot;
mod control;
mod session;
mod reactor;
pub mod facade;

#[cfg(test)]
mod testutil;

pub use config::SessionConfig;
pub use facade::BulkStream;
pub use stream::{negotiate, PacketSizes, StreamConfig};

pub use bulkstream_core::{
    log_debug, log_error, log_info, log_trace, log_warn, BulkError, CallbackKind, ConfigError,
    ContextId, CounterCallback, DataBits, DeviceHandle, DeviceSelector, Direction, FlowControl,
    Interface, LineConfig, ModemStatus, Parity, ResetCallback, Result, StopBits, StreamCallback,
    Notifier, StreamId, TransferStatus, UsbBackend,
};
pub use bulkstream_core::log::{init as init_logging, set_flush_enabled, set_log_level, LogLevel};
pub use bulkstream_core::env::{env_get, env_get_bool, env_get_opt};
pub use bulkstream_module::{ErrorQueue, ErrorRecord, EventFdNotifier, LoopbackBackend, LoopbackProbe};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
