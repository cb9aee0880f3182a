//! `HardwareEvents` - hardware readiness as one descriptor.
//!
//! The backend may want any number of descriptors watched, and the set can
//! change while transfers run. They all live in a nested epoll instance;
//! the top-level poller only ever sees `fd()`, and `pump()` is the single
//! operation the dispatch loop performs when it becomes readable.

use std::os::unix::io::RawFd;
use std::time::Duration;

use bulkstream_core::backend::{PollFdChange, UsbBackend};
use bulkstream_core::entry::TransferCompletion;
use bulkstream_core::error::{BulkError, Result};
use bulkstream_core::log_trace;

use crate::poller::Poller;

pub struct HardwareEvents {
    inner: Poller,
    watched: Vec<RawFd>,
}

impl HardwareEvents {
    /// Register every descriptor the backend currently reports.
    pub fn new<B: UsbBackend + ?Sized>(backend: &mut B) -> Result<Self> {
        let inner = Poller::new(16)?;
        let mut watched = Vec::new();
        for pfd in backend.pollfds()? {
            inner.add(pfd.fd, pfd.events)?;
            watched.push(pfd.fd);
        }
        watched.sort_unstable();
        watched.dedup();

        let mut hw = Self { inner, watched };
        hw.apply_changes(backend.take_pollfd_changes())?;
        log_trace!("hardware events: watching {} descriptor(s)", hw.watched.len());
        Ok(hw)
    }

    /// Descriptor for the top-level poller.
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.inner.fd()
    }

    /// Number of backend descriptors currently watched.
    #[inline]
    pub fn watched(&self) -> usize {
        self.watched.len()
    }

    /// Run the backend's event handling and follow descriptor changes.
    ///
    /// An interrupted pump is not an error.
    pub fn pump<B: UsbBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        timeout: Duration,
        out: &mut Vec<TransferCompletion>,
    ) -> Result<()> {
        let pumped = match backend.handle_events(timeout, out) {
            Err(BulkError::Interrupted) => Ok(()),
            other => other,
        };
        self.apply_changes(backend.take_pollfd_changes())?;
        pumped
    }

    fn apply_changes(&mut self, changes: Vec<PollFdChange>) -> Result<()> {
        for change in changes {
            match change {
                PollFdChange::Added(pfd) => {
                    self.inner.add(pfd.fd, pfd.events)?;
                    if let Err(pos) = self.watched.binary_search(&pfd.fd) {
                        self.watched.insert(pos, pfd.fd);
                    }
                }
                PollFdChange::Removed(fd) => {
                    self.inner.delete(fd)?;
                    if let Ok(pos) = self.watched.binary_search(&fd) {
                        self.watched.remove(pos);
                    }
                }
            }
        }
        Ok(())
    }
}
