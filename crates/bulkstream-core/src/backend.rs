//! Hardware backend abstraction.
//!
//! A `UsbBackend` models the asynchronous bulk-transfer API of the hardware
//! library: allocate, submit, cancel, free, and an event pump that turns
//! finished transfers into `TransferCompletion` values.
//!
//! # Implementors
//!
//! - `LoopbackBackend` (bulkstream-module): in-memory device used by tests
//!   and the demo binary. Writes complete immediately, reads complete when
//!   inbound data is queued.
//!
//! - A libusb binding implements the same trait by mapping `pollfds()` to
//!   `libusb_get_pollfds`, the notifier callbacks to `take_pollfd_changes()`
//!   and `handle_events()` to `libusb_handle_events_timeout`.
//!
//! # Buffer ownership
//!
//! `submit()` takes the slot's buffer by value. It comes back either in the
//! `Rejected` error or in the matching completion, so a buffer is owned by
//! exactly one party at any time.

use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::entry::{ContextId, DeviceHandle, Direction, SlotId, TransferCompletion, TransferHandle};
use crate::error::{BulkError, Result};

/// A descriptor the backend wants watched, with epoll-style event bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollFd {
    pub fd: RawFd,
    pub events: u32,
}

/// Change to the backend's descriptor set since the last query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollFdChange {
    Added(PollFd),
    Removed(RawFd),
}

/// A submission the hardware refused; the buffer is handed back.
#[derive(Debug)]
pub struct Rejected {
    pub error: BulkError,
    pub buffer: Box<[u8]>,
}

/// Asynchronous bulk transfers over one shared hardware context.
///
/// **Contract:**
/// - No method blocks except `handle_events()`, and that one at most for
///   `timeout`.
/// - `cancel()` on a transfer that isn't in flight is a no-op.
/// - Every submitted buffer is returned exactly once: through a completion,
///   through `Rejected`, or through `free_transfer()`.
pub trait UsbBackend: Send {
    /// Identity of the shared context; every stream's device must match it.
    fn context_id(&self) -> ContextId;

    /// Whether the descriptors from `pollfds()` also cover the backend's own
    /// timeouts. A session refuses a backend that returns false.
    fn handles_timeouts(&self) -> bool {
        true
    }

    /// Allocate a transfer bound to `device`'s endpoint for `direction`.
    /// Completions for it carry `slot`.
    fn alloc_transfer(
        &mut self,
        device: &DeviceHandle,
        direction: Direction,
        slot: SlotId,
    ) -> Result<TransferHandle>;

    /// Submit `length` bytes of `buffer` (reads: capacity to fill).
    fn submit(
        &mut self,
        handle: TransferHandle,
        buffer: Box<[u8]>,
        length: usize,
    ) -> std::result::Result<(), Rejected>;

    /// Request asynchronous cancellation.
    fn cancel(&mut self, handle: TransferHandle) -> Result<()>;

    /// Release a transfer. Returns its buffer if it was still in flight.
    fn free_transfer(&mut self, handle: TransferHandle) -> Option<Box<[u8]>>;

    /// Current descriptor set.
    fn pollfds(&self) -> Result<Vec<PollFd>>;

    /// Descriptor additions/removals since the last call.
    fn take_pollfd_changes(&mut self) -> Vec<PollFdChange>;

    /// Process pending events and append finished transfers to `out`.
    fn handle_events(&mut self, timeout: Duration, out: &mut Vec<TransferCompletion>) -> Result<()>;

    /// Hardware-level reset: leave any special mode, purge both directions.
    fn reset_device(&mut self, device: &DeviceHandle) -> Result<()>;
}
