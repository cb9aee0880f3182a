//! `Poller` - thin epoll wrapper.
//!
//! Every registration carries its own descriptor as the event token, so a
//! ready event maps straight back to the fd the caller registered.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::time::Duration;

use bulkstream_core::error::Result;
use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use crate::errno_error;

/// One ready descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub fd: RawFd,
    pub events: u32,
}

pub struct Poller {
    epoll: Epoll,
    events: Vec<EpollEvent>,
}

/// Descriptors handed to the poller belong to the caller and stay open at
/// least until they are deleted or the poller is dropped.
fn borrow(fd: RawFd) -> BorrowedFd<'static> {
    unsafe { BorrowedFd::borrow_raw(fd) }
}

/// Milliseconds, rounded up so a sub-millisecond timeout still waits.
fn epoll_timeout(timeout: Option<Duration>) -> EpollTimeout {
    match timeout {
        None => EpollTimeout::NONE,
        Some(d) => EpollTimeout::try_from(d.as_nanos().div_ceil(1_000_000)).unwrap_or(EpollTimeout::MAX),
    }
}

impl Poller {
    /// Create an epoll instance reporting at most `max_events` per wait.
    pub fn new(max_events: usize) -> Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(errno_error)?;
        Ok(Self {
            epoll,
            events: vec![EpollEvent::empty(); max_events.max(1)],
        })
    }

    /// The epoll descriptor itself (readable when any registration is ready).
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.epoll.0.as_fd().as_raw_fd()
    }

    /// Register `fd` for `events` (EPOLLIN etc). Registering an fd twice is
    /// not an error; several slots may share one data-ready descriptor.
    pub fn add(&self, fd: RawFd, events: u32) -> Result<()> {
        let flags = EpollFlags::from_bits_truncate(events as i32);
        match self.epoll.add(borrow(fd), EpollEvent::new(flags, fd as u64)) {
            Ok(()) | Err(Errno::EEXIST) => Ok(()),
            Err(e) => Err(errno_error(e)),
        }
    }

    /// Remove `fd`. Removing an unknown or closed fd is not an error.
    pub fn delete(&self, fd: RawFd) -> Result<()> {
        match self.epoll.delete(borrow(fd)) {
            Ok(()) | Err(Errno::ENOENT) | Err(Errno::EBADF) => Ok(()),
            Err(e) => Err(errno_error(e)),
        }
    }

    /// Wait for readiness and append ready descriptors to `out`.
    ///
    /// `None` waits indefinitely. An interrupted wait reports zero events.
    pub fn wait(&mut self, timeout: Option<Duration>, out: &mut Vec<Ready>) -> Result<usize> {
        let n = match self.epoll.wait(&mut self.events, epoll_timeout(timeout)) {
            Ok(n) => n,
            Err(Errno::EINTR) => return Ok(0),
            Err(e) => return Err(errno_error(e)),
        };

        out.extend(self.events[..n].iter().map(|ev| Ready {
            fd: ev.data() as RawFd,
            events: ev.events().bits() as u32,
        }));
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventFdNotifier;
    use bulkstream_core::notifier::Notifier;

    #[test]
    fn test_wait_reports_registered_fd() {
        let mut poller = Poller::new(8).unwrap();
        let n = EventFdNotifier::create().unwrap();
        poller.add(n.fd(), libc::EPOLLIN as u32).unwrap();
        // Second add of the same fd is accepted
        poller.add(n.fd(), libc::EPOLLIN as u32).unwrap();

        let mut ready = Vec::new();
        assert_eq!(poller.wait(Some(Duration::ZERO), &mut ready).unwrap(), 0);

        n.notify().unwrap();
        assert_eq!(poller.wait(Some(Duration::from_millis(100)), &mut ready).unwrap(), 1);
        assert_eq!(ready[0].fd, n.fd());
        assert!(ready[0].events & libc::EPOLLIN as u32 != 0);
    }

    #[test]
    fn test_timeout_rounds_up() {
        assert_eq!(i32::from(epoll_timeout(None)), -1);
        assert_eq!(i32::from(epoll_timeout(Some(Duration::ZERO))), 0);
        assert_eq!(i32::from(epoll_timeout(Some(Duration::from_micros(10)))), 1);
        assert_eq!(i32::from(epoll_timeout(Some(Duration::from_millis(20)))), 20);
        assert_eq!(i32::from(epoll_timeout(Some(Duration::from_secs(u64::MAX)))), i32::MAX);
    }

    #[test]
    fn test_delete() {
        let mut poller = Poller::new(4).unwrap();
        let n = EventFdNotifier::create().unwrap();
        poller.add(n.fd(), libc::EPOLLIN as u32).unwrap();
        poller.delete(n.fd()).unwrap();
        poller.delete(n.fd()).unwrap();

        n.notify().unwrap();
        let mut ready = Vec::new();
        assert_eq!(poller.wait(Some(Duration::ZERO), &mut ready).unwrap(), 0);
    }
}
