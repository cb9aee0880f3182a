//! `EventFdNotifier` - default `Notifier` implementation.
//!
//! Writes to an eventfd that the reactor's poller watches.
//! Coalescing: multiple calls to `notify()` before the reactor
//! drains the eventfd result in a single wakeup (eventfd counter semantics).

use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::io::RawFd;

use bulkstream_core::error::Result;
use bulkstream_core::notifier::Notifier;
use nix::errno::Errno;
use nix::sys::eventfd::{EfdFlags, EventFd};

use crate::errno_error;

pub struct EventFdNotifier {
    efd: EventFd,
}

impl EventFdNotifier {
    /// Create a new non-blocking, close-on-exec eventfd.
    ///
    /// The notifier owns the descriptor; it is closed on drop.
    pub fn create() -> Result<Self> {
        let efd = EventFd::from_value_and_flags(0, EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC)
            .map_err(errno_error)?;
        Ok(Self { efd })
    }
}

impl Notifier for EventFdNotifier {
    fn notify(&self) -> Result<()> {
        match self.efd.write(1) {
            Ok(_) => Ok(()),
            // Counter would overflow: a wake is already pending.
            Err(Errno::EAGAIN) => Ok(()),
            Err(e) => Err(errno_error(e)),
        }
    }

    fn drain(&self) -> Result<u64> {
        match self.efd.read() {
            Ok(n) => Ok(n),
            Err(Errno::EAGAIN) => Ok(0),
            Err(e) => Err(errno_error(e)),
        }
    }

    fn fd(&self) -> RawFd {
        self.efd.as_fd().as_raw_fd()
    }
}
