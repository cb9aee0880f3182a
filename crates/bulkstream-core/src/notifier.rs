//! Wake channel abstraction.
//!
//! A `Notifier` makes the reactor re-check its control queue promptly.
//!
//! # Implementors
//!
//! - `EventFdNotifier` (default): writes 1 to an eventfd registered with the
//!   reactor's poller. The reactor drains it when it becomes readable.

use std::os::unix::io::RawFd;

use crate::error::Result;

/// Wakes the reactor from any thread.
///
/// **Contract:**
/// - `notify()` must NEVER block.
/// - Multiple calls before the reactor wakes are coalesced
///   (eventfd semantics: counter increments, one read drains).
pub trait Notifier: Send + Sync {
    /// Signal that control requests are pending.
    fn notify(&self) -> Result<()>;

    /// Consume pending wakes. Returns how many were coalesced (0 if none).
    fn drain(&self) -> Result<u64>;

    /// Descriptor to register with the poller.
    fn fd(&self) -> RawFd;
}
