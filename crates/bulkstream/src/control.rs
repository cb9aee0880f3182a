//! Control requests from caller threads.
//!
//! Callers push requests onto a lock-free queue and wake the reactor. Only
//! the reactor's own step folds them into `PendingControl` and applies them,
//! so a step never sees a half-applied request.

use std::collections::BTreeSet;
use std::os::unix::io::RawFd;

use bulkstream_core::entry::StreamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlRequest {
    /// Re-arm the read slots keyed by this descriptor.
    Enable(RawFd),
    /// Cancel the read slots keyed by this descriptor.
    Disable(RawFd),
    /// Run the stream's reset.
    Reset(StreamId),
}

/// Requests folded since the last application. Enable and disable of the
/// same descriptor cancel each other, so the last request wins.
#[derive(Debug, Default)]
pub(crate) struct PendingControl {
    pub enable: BTreeSet<RawFd>,
    pub disable: BTreeSet<RawFd>,
    pub reset: BTreeSet<StreamId>,
}

impl PendingControl {
    pub fn fold(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Enable(fd) => {
                self.disable.remove(&fd);
                self.enable.insert(fd);
            }
            ControlRequest::Disable(fd) => {
                self.enable.remove(&fd);
                self.disable.insert(fd);
            }
            ControlRequest::Reset(stream) => {
                self.reset.insert(stream);
            }
        }
    }

    pub fn clear(&mut self) {
        self.enable.clear();
        self.disable.clear();
        self.reset.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.enable.is_empty() && self.disable.is_empty() && self.reset.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_request_wins() {
        let mut p = PendingControl::default();
        p.fold(ControlRequest::Enable(4));
        p.fold(ControlRequest::Disable(4));
        p.fold(ControlRequest::Enable(4));
        p.fold(ControlRequest::Disable(4));
        assert!(p.enable.is_empty());
        assert_eq!(p.disable.iter().copied().collect::<Vec<_>>(), vec![4]);

        p.fold(ControlRequest::Enable(4));
        assert!(p.disable.is_empty());
        assert!(p.enable.contains(&4));
    }

    #[test]
    fn test_resets_dedup() {
        let mut p = PendingControl::default();
        p.fold(ControlRequest::Reset(1));
        p.fold(ControlRequest::Reset(1));
        p.fold(ControlRequest::Reset(0));
        assert_eq!(p.reset.len(), 2);
        p.clear();
        assert!(p.is_empty());
    }
}
