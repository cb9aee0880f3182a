//! `LoopbackBackend` - in-memory `UsbBackend`.
//!
//! Stands in for the hardware library in tests and the demo binary.
//! Every device it hands out is a pair of byte queues:
//!
//! - writes complete on submit with `actual_length = length`, and their bytes
//!   are collected for `LoopbackProbe::take_outbound()`;
//! - reads stay in flight until `LoopbackProbe::push_inbound()` queues data;
//!   a payload larger than the transfer buffer spans several completions;
//! - cancels complete with `Cancelled`, unless `swallow_cancels()` is set.
//!
//! Finished transfers are parked until `handle_events()` collects them. The
//! single poll descriptor is an eventfd that is signalled whenever something
//! is parked.

use std::collections::{BTreeMap, VecDeque};
use std::os::fd::{AsFd, AsRawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bulkstream_core::backend::{PollFd, PollFdChange, Rejected, UsbBackend};
use bulkstream_core::entry::{
    ContextId, DeviceHandle, Direction, SlotId, TransferCompletion, TransferHandle, TransferStatus,
};
use bulkstream_core::error::{BulkError, Result};
use bulkstream_core::line::LineConfig;
use nix::errno::Errno;
use nix::sys::eventfd::{EfdFlags, EventFd};

use crate::errno_error;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

struct LoopDevice {
    handle: DeviceHandle,
    line: LineConfig,
    inbound: VecDeque<Vec<u8>>,
    outbound: Vec<u8>,
    resets: u32,
}

struct LoopTransfer {
    device: u32,
    direction: Direction,
    slot: SlotId,
    /// Buffer and requested length while submitted.
    in_flight: Option<(Box<[u8]>, usize)>,
}

struct Parked {
    handle: u64,
    completion: TransferCompletion,
}

#[derive(Default)]
struct LoopState {
    devices: Vec<LoopDevice>,
    /// Ordered so reads are matched to inbound data deterministically.
    transfers: BTreeMap<u64, LoopTransfer>,
    next_handle: u64,
    parked: VecDeque<Parked>,
    reject_submits: u32,
    status_override: Option<TransferStatus>,
    /// Cancels leave the transfer in flight and never complete.
    swallow_cancels: bool,
    pollfd_changes: Vec<PollFdChange>,
}

impl LoopState {
    fn park(&mut self, handle: u64, slot: SlotId, status: TransferStatus, actual: usize, buffer: Box<[u8]>) {
        let status = match status {
            TransferStatus::Completed => self.status_override.take().unwrap_or(status),
            other => other,
        };
        self.parked.push_back(Parked {
            handle,
            completion: TransferCompletion { slot, status, actual_length: actual, buffer },
        });
    }

    /// Match queued inbound data of `device` against in-flight reads.
    fn complete_reads(&mut self, device: u32) {
        let Some(dev) = self.devices.get_mut(device as usize) else {
            return;
        };
        let mut done = Vec::new();

        for (&handle, xfer) in self.transfers.iter_mut() {
            if dev.inbound.is_empty() {
                break;
            }
            if xfer.device != device || xfer.direction != Direction::Read {
                continue;
            }
            let Some((mut buffer, length)) = xfer.in_flight.take() else {
                continue;
            };
            let Some(front) = dev.inbound.front_mut() else {
                xfer.in_flight = Some((buffer, length));
                break;
            };

            let n = front.len().min(length).min(buffer.len());
            buffer[..n].copy_from_slice(&front[..n]);
            if n == front.len() {
                dev.inbound.pop_front();
            } else {
                front.drain(..n);
            }
            done.push((handle, xfer.slot, n, buffer));
        }

        for (handle, slot, n, buffer) in done {
            self.park(handle, slot, TransferStatus::Completed, n, buffer);
        }
    }

    fn device(&self, device: &DeviceHandle) -> Option<&LoopDevice> {
        self.devices
            .get(device.device as usize)
            .filter(|d| d.handle.context == device.context)
    }
}

fn lock(state: &Mutex<LoopState>) -> MutexGuard<'_, LoopState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Counter overflow (EAGAIN) still leaves the descriptor readable.
fn signal(efd: &EventFd) {
    let _ = efd.write(1);
}

pub struct LoopbackBackend {
    context: ContextId,
    state: Arc<Mutex<LoopState>>,
    signal: Arc<EventFd>,
    timeouts_supported: bool,
}

impl LoopbackBackend {
    /// A fresh context with no devices.
    ///
    /// Fails only if the eventfd can't be created.
    pub fn create() -> Result<Self> {
        let efd = EventFd::from_value_and_flags(0, EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC)
            .map_err(errno_error)?;
        Ok(Self {
            context: ContextId(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed)),
            state: Arc::new(Mutex::new(LoopState::default())),
            signal: Arc::new(efd),
            timeouts_supported: true,
        })
    }

    /// Pretend the poll descriptors don't cover the backend's timeouts.
    pub fn with_timeout_support(mut self, supported: bool) -> Self {
        self.timeouts_supported = supported;
        self
    }

    /// Open a new device on this context with the given line settings.
    pub fn device(&self, line: &LineConfig, max_packet_size: usize, write_chunk_size: usize) -> DeviceHandle {
        let mut st = lock(&self.state);
        let index = st.devices.len() as u32;
        let handle = DeviceHandle {
            context: self.context,
            device: index,
            in_endpoint: 0x81 + (index as u8 & 0x0f),
            out_endpoint: 0x02 + (index as u8 & 0x0f),
            max_packet_size,
            write_chunk_size,
        };
        st.devices.push(LoopDevice {
            handle: handle.clone(),
            line: line.clone(),
            inbound: VecDeque::new(),
            outbound: Vec::new(),
            resets: 0,
        });
        handle
    }

    /// Cross-thread handle for driving and inspecting the devices.
    pub fn probe(&self) -> LoopbackProbe {
        LoopbackProbe {
            state: Arc::clone(&self.state),
            signal: Arc::clone(&self.signal),
        }
    }
}

impl UsbBackend for LoopbackBackend {
    fn context_id(&self) -> ContextId {
        self.context
    }

    fn handles_timeouts(&self) -> bool {
        self.timeouts_supported
    }

    fn alloc_transfer(&mut self, device: &DeviceHandle, direction: Direction, slot: SlotId) -> Result<TransferHandle> {
        if device.context != self.context {
            return Err(BulkError::Hardware("device belongs to another context".into()));
        }
        let mut st = lock(&self.state);
        if st.device(device).is_none() {
            return Err(BulkError::Hardware(format!("unknown device {}", device.device)));
        }
        st.next_handle += 1;
        let handle = st.next_handle;
        st.transfers.insert(
            handle,
            LoopTransfer { device: device.device, direction, slot, in_flight: None },
        );
        Ok(TransferHandle(handle))
    }

    fn submit(&mut self, handle: TransferHandle, buffer: Box<[u8]>, length: usize) -> std::result::Result<(), Rejected> {
        let mut st = lock(&self.state);

        if st.reject_submits > 0 {
            st.reject_submits -= 1;
            return Err(Rejected { error: BulkError::SubmitRejected, buffer });
        }

        let (device, direction, slot, busy) = match st.transfers.get(&handle.0) {
            Some(x) => (x.device, x.direction, x.slot, x.in_flight.is_some()),
            None => {
                return Err(Rejected {
                    error: BulkError::Hardware(format!("unknown transfer {}", handle.0)),
                    buffer,
                })
            }
        };
        if busy {
            return Err(Rejected { error: BulkError::SlotBusy, buffer });
        }

        let length = length.min(buffer.len());
        match direction {
            Direction::Write => {
                if let Some(dev) = st.devices.get_mut(device as usize) {
                    dev.outbound.extend_from_slice(&buffer[..length]);
                }
                st.park(handle.0, slot, TransferStatus::Completed, length, buffer);
            }
            Direction::Read => {
                if let Some(x) = st.transfers.get_mut(&handle.0) {
                    x.in_flight = Some((buffer, length));
                }
                st.complete_reads(device);
            }
        }

        let parked = !st.parked.is_empty();
        drop(st);
        if parked {
            signal(&self.signal);
        }
        Ok(())
    }

    fn cancel(&mut self, handle: TransferHandle) -> Result<()> {
        let mut st = lock(&self.state);
        if st.swallow_cancels {
            return Ok(());
        }
        let taken = st
            .transfers
            .get_mut(&handle.0)
            .and_then(|x| x.in_flight.take().map(|(buf, _)| (x.slot, buf)));

        if let Some((slot, buffer)) = taken {
            st.park(handle.0, slot, TransferStatus::Cancelled, 0, buffer);
            drop(st);
            signal(&self.signal);
        }
        Ok(())
    }

    fn free_transfer(&mut self, handle: TransferHandle) -> Option<Box<[u8]>> {
        let mut st = lock(&self.state);
        let in_flight = st
            .transfers
            .remove(&handle.0)
            .and_then(|x| x.in_flight.map(|(buf, _)| buf));
        if in_flight.is_some() {
            return in_flight;
        }

        let pos = st.parked.iter().position(|p| p.handle == handle.0)?;
        st.parked.remove(pos).map(|p| p.completion.buffer)
    }

    fn pollfds(&self) -> Result<Vec<PollFd>> {
        Ok(vec![PollFd {
            fd: self.signal.as_fd().as_raw_fd(),
            events: libc::EPOLLIN as u32,
        }])
    }

    fn take_pollfd_changes(&mut self) -> Vec<PollFdChange> {
        std::mem::take(&mut lock(&self.state).pollfd_changes)
    }

    fn handle_events(&mut self, _timeout: Duration, out: &mut Vec<TransferCompletion>) -> Result<()> {
        match self.signal.read() {
            Ok(_) | Err(Errno::EAGAIN) => {}
            Err(Errno::EINTR) => return Err(BulkError::Interrupted),
            Err(e) => return Err(errno_error(e)),
        }
        let mut st = lock(&self.state);
        out.extend(st.parked.drain(..).map(|p| p.completion));
        Ok(())
    }

    fn reset_device(&mut self, device: &DeviceHandle) -> Result<()> {
        let mut st = lock(&self.state);
        let dev = st
            .devices
            .get_mut(device.device as usize)
            .filter(|d| d.handle.context == device.context)
            .ok_or_else(|| BulkError::Hardware(format!("unknown device {}", device.device)))?;
        dev.inbound.clear();
        dev.resets += 1;
        Ok(())
    }
}

/// Test-side view of a `LoopbackBackend`. Cheap to clone, usable from any
/// thread while the backend is owned by a running session.
#[derive(Clone)]
pub struct LoopbackProbe {
    state: Arc<Mutex<LoopState>>,
    signal: Arc<EventFd>,
}

impl LoopbackProbe {
    /// Queue one inbound USB payload (modem status bytes included).
    pub fn push_inbound(&self, device: &DeviceHandle, bytes: &[u8]) {
        let mut st = lock(&self.state);
        if let Some(dev) = st.devices.get_mut(device.device as usize) {
            if !bytes.is_empty() {
                dev.inbound.push_back(bytes.to_vec());
            }
        }
        st.complete_reads(device.device);
        let parked = !st.parked.is_empty();
        drop(st);
        if parked {
            signal(&self.signal);
        }
    }

    /// Bytes written to `device` since the last call.
    pub fn take_outbound(&self, device: &DeviceHandle) -> Vec<u8> {
        let mut st = lock(&self.state);
        st.devices
            .get_mut(device.device as usize)
            .map(|d| std::mem::take(&mut d.outbound))
            .unwrap_or_default()
    }

    /// Inbound bytes not yet picked up by a read.
    pub fn pending_inbound(&self, device: &DeviceHandle) -> usize {
        let st = lock(&self.state);
        st.devices
            .get(device.device as usize)
            .map(|d| d.inbound.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Refuse the next `n` submissions.
    pub fn reject_next_submits(&self, n: u32) {
        lock(&self.state).reject_submits = n;
    }

    /// Report `status` for the next successful completion.
    pub fn override_next_status(&self, status: TransferStatus) {
        lock(&self.state).status_override = Some(status);
    }

    /// Report a descriptor set change on the next `take_pollfd_changes()`.
    pub fn queue_pollfd_change(&self, change: PollFdChange) {
        lock(&self.state).pollfd_changes.push(change);
    }

    /// Accept cancel requests without ever completing them.
    pub fn swallow_cancels(&self, swallow: bool) {
        lock(&self.state).swallow_cancels = swallow;
    }

    /// How many hardware-level resets `device` has seen.
    pub fn resets(&self, device: &DeviceHandle) -> u32 {
        let st = lock(&self.state);
        st.devices.get(device.device as usize).map(|d| d.resets).unwrap_or(0)
    }

    pub fn applied_line(&self, device: &DeviceHandle) -> Option<LineConfig> {
        let st = lock(&self.state);
        st.devices.get(device.device as usize).map(|d| d.line.clone())
    }

    /// Transfers currently submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        let st = lock(&self.state);
        st.transfers.values().filter(|x| x.in_flight.is_some()).count()
    }

    /// Transfers allocated and not yet freed.
    pub fn live_transfers(&self) -> usize {
        lock(&self.state).transfers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pump(backend: &mut LoopbackBackend) -> Vec<TransferCompletion> {
        let mut out = Vec::new();
        backend.handle_events(Duration::ZERO, &mut out).unwrap();
        out
    }

    #[test]
    fn test_write_completes_immediately() {
        let mut backend = LoopbackBackend::create().unwrap();
        let probe = backend.probe();
        let dev = backend.device(&LineConfig::default(), 64, 4096);

        let h = backend.alloc_transfer(&dev, Direction::Write, SlotId(3)).unwrap();
        backend.submit(h, b"hello world".to_vec().into_boxed_slice(), 5).unwrap();

        let done = pump(&mut backend);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].slot, SlotId(3));
        assert_eq!(done[0].status, TransferStatus::Completed);
        assert_eq!(done[0].actual_length, 5);
        assert_eq!(probe.take_outbound(&dev), b"hello");
        assert!(probe.take_outbound(&dev).is_empty());
    }

    #[test]
    fn test_read_waits_for_inbound() {
        let mut backend = LoopbackBackend::create().unwrap();
        let probe = backend.probe();
        let dev = backend.device(&LineConfig::default(), 8, 4096);

        let h = backend.alloc_transfer(&dev, Direction::Read, SlotId(0)).unwrap();
        backend.submit(h, vec![0u8; 8].into_boxed_slice(), 8).unwrap();
        assert!(pump(&mut backend).is_empty());
        assert_eq!(probe.in_flight(), 1);

        // 12 bytes into an 8-byte transfer: the rest waits for a resubmit
        probe.push_inbound(&dev, &[1; 12]);
        let done = pump(&mut backend);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].actual_length, 8);
        assert_eq!(probe.pending_inbound(&dev), 4);

        let buffer = done.into_iter().next().unwrap().buffer;
        backend.submit(h, buffer, 8).unwrap();
        let done = pump(&mut backend);
        assert_eq!(done[0].actual_length, 4);
        assert_eq!(probe.pending_inbound(&dev), 0);
    }

    #[test]
    fn test_cancel_and_free() {
        let mut backend = LoopbackBackend::create().unwrap();
        let probe = backend.probe();
        let dev = backend.device(&LineConfig::default(), 8, 4096);

        let h1 = backend.alloc_transfer(&dev, Direction::Read, SlotId(0)).unwrap();
        let h2 = backend.alloc_transfer(&dev, Direction::Read, SlotId(1)).unwrap();
        backend.submit(h1, vec![0u8; 8].into_boxed_slice(), 8).unwrap();
        backend.submit(h2, vec![0u8; 8].into_boxed_slice(), 8).unwrap();

        backend.cancel(h1).unwrap();
        backend.cancel(h1).unwrap();
        let done = pump(&mut backend);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].status, TransferStatus::Cancelled);

        assert_eq!(probe.live_transfers(), 2);
        assert!(backend.free_transfer(h1).is_none());
        assert_eq!(backend.free_transfer(h2).map(|b| b.len()), Some(8));
        assert_eq!(probe.live_transfers(), 0);
        assert_eq!(probe.in_flight(), 0);
    }

    #[test]
    fn test_swallowed_cancel_stays_in_flight() {
        let mut backend = LoopbackBackend::create().unwrap();
        let probe = backend.probe();
        let dev = backend.device(&LineConfig::default(), 8, 4096);
        let h = backend.alloc_transfer(&dev, Direction::Read, SlotId(0)).unwrap();
        backend.submit(h, vec![0u8; 8].into_boxed_slice(), 8).unwrap();

        probe.swallow_cancels(true);
        backend.cancel(h).unwrap();
        assert!(pump(&mut backend).is_empty());
        assert_eq!(probe.in_flight(), 1);
        assert_eq!(backend.free_transfer(h).map(|b| b.len()), Some(8));
    }

    #[test]
    fn test_free_reclaims_parked_buffer() {
        let mut backend = LoopbackBackend::create().unwrap();
        let dev = backend.device(&LineConfig::default(), 8, 4096);
        let h = backend.alloc_transfer(&dev, Direction::Write, SlotId(0)).unwrap();
        backend.submit(h, vec![0u8; 4].into_boxed_slice(), 4).unwrap();

        assert_eq!(backend.free_transfer(h).map(|b| b.len()), Some(4));
        assert!(pump(&mut backend).is_empty());
    }

    #[test]
    fn test_reject_and_override() {
        let mut backend = LoopbackBackend::create().unwrap();
        let probe = backend.probe();
        let dev = backend.device(&LineConfig::default(), 8, 4096);
        let h = backend.alloc_transfer(&dev, Direction::Write, SlotId(0)).unwrap();

        probe.reject_next_submits(1);
        let rejected = backend.submit(h, vec![0u8; 4].into_boxed_slice(), 4).unwrap_err();
        assert_eq!(rejected.error, BulkError::SubmitRejected);
        assert_eq!(rejected.buffer.len(), 4);

        probe.override_next_status(TransferStatus::Stall);
        backend.submit(h, rejected.buffer, 4).unwrap();
        let done = pump(&mut backend);
        assert_eq!(done[0].status, TransferStatus::Stall);
    }

    #[test]
    fn test_reset_and_line() {
        let mut backend = LoopbackBackend::create().unwrap();
        let probe = backend.probe();
        let line = LineConfig::default().baud_rate(9600);
        let dev = backend.device(&line, 64, 4096);

        probe.push_inbound(&dev, &[1, 2, 3]);
        backend.reset_device(&dev).unwrap();
        assert_eq!(probe.resets(&dev), 1);
        assert_eq!(probe.pending_inbound(&dev), 0);
        assert_eq!(probe.applied_line(&dev).map(|l| l.baud_rate), Some(9600));
    }

    #[test]
    fn test_foreign_device_rejected() {
        let mut a = LoopbackBackend::create().unwrap();
        let b = LoopbackBackend::create().unwrap();
        assert_ne!(a.context_id(), b.context_id());

        let dev = b.device(&LineConfig::default(), 64, 4096);
        assert!(a.alloc_transfer(&dev, Direction::Read, SlotId(0)).is_err());
    }
}
