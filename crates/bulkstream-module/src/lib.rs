//! # bulkstream-module - Default Linux implementations
//!
//! ## Default stack
//!
//! | Concern             | Impl              | Backed by                 |
//! |---------------------|-------------------|---------------------------|
//! | Notifier            | EventFdNotifier   | eventfd                   |
//! | Top-level poller    | Poller            | epoll                     |
//! | Watchdog tick       | TickTimer         | timerfd (monotonic)       |
//! | Hardware readiness  | HardwareEvents    | nested epoll              |
//! | Error queue         | ErrorQueue        | bounded lock-free queue   |
//! | UsbBackend          | LoopbackBackend   | in-memory device + eventfd|

use bulkstream_core::error::BulkError;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod eventfd_notifier;
        pub mod poller;
        pub mod tick_timer;
        pub mod hw_events;
        pub mod loopback;

        pub use eventfd_notifier::EventFdNotifier;
        pub use hw_events::HardwareEvents;
        pub use loopback::{LoopbackBackend, LoopbackProbe};
        pub use poller::{Poller, Ready};
        pub use tick_timer::TickTimer;
    } else {
        compile_error!("bulkstream-module requires Linux (epoll, eventfd, timerfd)");
    }
}

pub mod error_queue;

pub use error_queue::{ErrorQueue, ErrorRecord};

/// Map a nix errno to the crate error.
#[cfg(target_os = "linux")]
#[inline]
pub fn errno_error(errno: nix::errno::Errno) -> BulkError {
    BulkError::Os(errno as i32)
}
