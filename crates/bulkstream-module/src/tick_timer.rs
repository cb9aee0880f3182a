//! `TickTimer` - periodic monotonic timerfd.
//!
//! Drives the per-tick counter report and the inactivity watchdog. The
//! first expiry fires almost immediately, then every `interval`.

use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::io::RawFd;
use std::time::Duration;

use bulkstream_core::error::{BulkError, Result};
use nix::errno::Errno;
use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};

use crate::errno_error;

pub struct TickTimer {
    timer: TimerFd,
    interval: Duration,
}

impl TickTimer {
    pub fn new(interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(BulkError::Hardware("tick interval must be non-zero".into()));
        }

        let timer = TimerFd::new(
            ClockId::CLOCK_MONOTONIC,
            TimerFlags::TFD_NONBLOCK | TimerFlags::TFD_CLOEXEC,
        )
        .map_err(errno_error)?;

        timer
            .set(
                Expiration::IntervalDelayed(
                    TimeSpec::from_duration(Duration::from_nanos(1)),
                    TimeSpec::from_duration(interval),
                ),
                TimerSetTimeFlags::empty(),
            )
            .map_err(errno_error)?;

        Ok(Self { timer, interval })
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.timer.as_fd().as_raw_fd()
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Consume pending expirations. `false` if the timer hasn't fired yet.
    pub fn acknowledge(&self) -> Result<bool> {
        match self.timer.wait() {
            Ok(()) => Ok(true),
            Err(Errno::EAGAIN) => Ok(false),
            Err(e) => Err(errno_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Poller;

    #[test]
    fn test_zero_interval_rejected() {
        assert!(TickTimer::new(Duration::ZERO).is_err());
    }

    #[test]
    fn test_first_tick_is_immediate() {
        let timer = TickTimer::new(Duration::from_secs(3600)).unwrap();
        let mut poller = Poller::new(4).unwrap();
        poller.add(timer.fd(), libc::EPOLLIN as u32).unwrap();

        let mut ready = Vec::new();
        poller.wait(Some(Duration::from_millis(500)), &mut ready).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].fd, timer.fd());

        assert!(timer.acknowledge().unwrap());
        // Next expiry is an hour away
        assert!(!timer.acknowledge().unwrap());
    }
}
