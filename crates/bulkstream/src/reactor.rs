//! # Reactor - init, step and cleanup of a session
//!
//! All dispatch happens on the thread that calls `step()`:
//! 1. Wait on the top-level poller
//! 2. Hardware readiness → pump the backend, handle each completion
//! 3. Wake channel → fold and apply queued control requests
//! 4. Tick → report counters, check the inactivity watchdog
//! 5. Anything else → a write slot's data-ready signal
//!
//! Once `should_run` drops, every step cancels the slots that are still
//! enabled, and the loop ends when all are disabled or the pass budget runs
//! out. Any runtime error cancels the whole session and queues one record.

use std::os::unix::io::RawFd;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bulkstream_core::backend::UsbBackend;
use bulkstream_core::callback::CallbackKind;
use bulkstream_core::entry::{Direction, SlotId, StreamId, TransferCompletion, TransferStatus};
use bulkstream_core::error::{BulkError, ConfigError, Result};
use bulkstream_core::frame::for_each_frame;
use bulkstream_core::notifier::Notifier;
use bulkstream_core::{log_debug, log_info, log_warn};
use bulkstream_module::{ErrorRecord, HardwareEvents, Poller, TickTimer};

use crate::session::SessionCore;
use crate::slot::{AfterCancel, TransferSlot};
use crate::stream::StreamConfig;

const EPOLLIN: u32 = libc::EPOLLIN as u32;
const EPOLLET: u32 = libc::EPOLLET as u32;

impl<B: UsbBackend> SessionCore<B> {
    /// Set up descriptors, reset every stream, create and arm every slot.
    ///
    /// On failure everything acquired so far is released, the error is also
    /// queued, and the session is left stopped.
    pub fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Err(BulkError::AlreadyInitialized);
        }

        self.should_run = true;
        self.shared.should_cancel.store(false, Ordering::Release);
        self.cancel_passes = self.config.cancel_passes as i64;
        let now = self.now_secs();
        self.ts_now = now;
        self.ts_activity = now;
        self.pending.clear();
        while self.shared.control.pop().is_some() {}
        let _ = self.shared.notifier.drain();
        self.initialized = true;

        if let Err(e) = self.init_inner() {
            self.cleanup();
            self.shared.record(ErrorRecord::new(e.clone()));
            return Err(e);
        }
        Ok(())
    }

    fn init_inner(&mut self) -> Result<()> {
        // ── Step 1: top-level poller, hardware readiness, wake channel, tick ──
        let poller = Poller::new(self.config.max_events)?;
        let hw = HardwareEvents::new(&mut self.backend)?;
        poller.add(hw.fd(), EPOLLIN)?;
        poller.add(self.shared.notifier.fd(), EPOLLIN)?;
        let timer = TickTimer::new(self.config.tick_interval)?;
        poller.add(timer.fd(), EPOLLIN)?;

        self.poller = Some(poller);
        self.hw = Some(hw);
        self.timer = Some(timer);

        // ── Step 2: the device state is unknown, reset everything ──
        self.reset_all()?;

        // ── Step 3: one slot per (stream, direction, transfer) ──
        let shared = Arc::clone(&self.shared);
        for (stream_id, stream) in shared.streams.iter().enumerate() {
            let stream_id = stream_id as StreamId;
            log_debug!(
                "init stream {}: read transfers = {}, write transfers = {}",
                stream_id, stream.read_transfers, stream.write_transfers
            );
            for i in 0..stream.read_transfers {
                self.create_slot(stream_id, stream, Direction::Read, i)?;
            }
            for i in 0..stream.write_transfers {
                self.create_slot(stream_id, stream, Direction::Write, stream.read_transfers + i)?;
            }
        }

        log_info!(
            "session started: {} stream(s), read packet {} B, write packet {} B, {} transfer(s)",
            shared.streams.len(),
            shared.packet_sizes.read,
            shared.packet_sizes.write,
            self.slots.len()
        );
        Ok(())
    }

    fn create_slot(
        &mut self,
        stream_id: StreamId,
        stream: &StreamConfig,
        direction: Direction,
        transfer_id: u32,
    ) -> Result<()> {
        let cb = stream
            .callback_for(direction)
            .ok_or(ConfigError::MissingCallback { stream: stream_id, direction })?;
        let ready_fd = cb.data_ready_fd(direction);

        let packet = match direction {
            Direction::Read => self.shared.packet_sizes.read,
            Direction::Write => self.shared.packet_sizes.write,
        };
        let buffer_size = packet * stream.packets_per_transfer(direction) as usize;

        let handle = self.backend.alloc_transfer(&stream.device, direction, self.slots.next_id())?;
        let mut slot = TransferSlot::new(stream_id, transfer_id, direction, ready_fd, handle, buffer_size);
        if direction.is_read() {
            slot.enabled = stream.read_start_enabled;
            slot.include_modem_status = stream.read_include_modem_status;
        }
        let id = self.slots.insert(slot);
        log_debug!("init transfer @{},{}: {}, fd = {}", stream_id, transfer_id, direction, ready_fd);

        // Write slots are re-armed by their data-ready descriptor
        if direction == Direction::Write {
            if ready_fd < 0 {
                return Err(BulkError::Callback { kind: CallbackKind::GetFd(direction), code: ready_fd });
            }
            if let Some(poller) = &self.poller {
                poller.add(ready_fd, EPOLLIN | EPOLLET)?;
            }
        }

        self.submit(id)
    }

    /// Arm an enabled, idle slot: reads use the whole buffer, writes ask
    /// FILL_BUFFER first. A fill of 0 disables the slot.
    pub(crate) fn submit(&mut self, id: SlotId) -> Result<()> {
        if !self.should_run {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let Some(slot) = self.slots.get_mut(id) else {
            return Ok(());
        };
        if !slot.enabled {
            return Ok(());
        }
        let Some(mut buffer) = slot.buffer.take() else {
            return Ok(());
        };

        let length = match slot.direction {
            Direction::Read => buffer.len(),
            Direction::Write => {
                let capacity = buffer.len();
                let filled = shared.streams[slot.stream_id as usize]
                    .write_callback
                    .as_ref()
                    .map_or(0, |cb| cb.fill_buffer(&mut buffer));

                if filled <= 0 || filled as usize > capacity {
                    slot.buffer = Some(buffer);
                    slot.enabled = false;
                    return match filled {
                        0 => Ok(()),
                        n if n < 0 => Err(BulkError::Callback { kind: CallbackKind::FillBuffer, code: n }),
                        n => Err(BulkError::CallbackOverrun { kind: CallbackKind::FillBuffer, len: n, capacity }),
                    };
                }
                filled as usize
            }
        };

        match self.backend.submit(slot.handle, buffer, length) {
            Ok(()) => Ok(()),
            Err(rejected) => {
                slot.buffer = Some(rejected.buffer);
                slot.enabled = false;
                Err(rejected.error)
            }
        }
    }

    /// `submit()`, with any failure attributed to the slot.
    fn submit_or_fail(&mut self, id: SlotId) {
        if let Err(e) = self.submit(id) {
            let slot = &self.slots[id];
            let (stream, transfer) = (slot.stream_id, slot.transfer_id);
            self.error_at(stream, transfer, e);
        }
    }

    /// Request cancellation of an enabled slot. An idle one is simply disabled.
    fn cancel_slot(&mut self, id: SlotId) -> Result<()> {
        let slot = &mut self.slots[id];
        if !slot.enabled {
            return Ok(());
        }
        if !slot.in_flight() {
            slot.enabled = false;
            return Ok(());
        }
        self.backend.cancel(slot.handle)
    }

    fn reset_stream(&mut self, stream_id: StreamId) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let stream = shared
            .streams
            .get(stream_id as usize)
            .ok_or(ConfigError::UndefinedStream(stream_id))?;

        match &stream.reset_callback {
            Some(cb) => {
                cb(&stream.device);
                Ok(())
            }
            None => self.backend.reset_device(&stream.device),
        }
    }

    fn reset_all(&mut self) -> Result<()> {
        for stream_id in 0..self.shared.streams.len() {
            self.reset_stream(stream_id as StreamId)?;
        }
        Ok(())
    }

    /// One bounded (or, with `None`, unbounded) wait plus dispatch.
    ///
    /// Returns false once the session has fully wound down.
    pub fn step(&mut self, timeout: Option<Duration>) -> bool {
        if !self.initialized {
            return false;
        }

        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();
        let waited = match self.poller.as_mut() {
            Some(poller) => poller.wait(timeout, &mut ready),
            None => Err(BulkError::NotInitialized),
        };

        let n = match waited {
            Ok(n) => n,
            Err(e) => {
                self.ready = ready;
                self.error(e);
                return false;
            }
        };
        if n == 0 {
            self.ready = ready;
            return true;
        }

        for ev in &ready {
            self.dispatch(ev.fd);
        }
        self.ready = ready;

        if !self.should_run {
            return self.shutdown_pass();
        }
        true
    }

    fn dispatch(&mut self, fd: RawFd) {
        let result = if self.hw.as_ref().map(HardwareEvents::fd) == Some(fd) {
            self.on_hardware()
        } else if fd == self.shared.notifier.fd() {
            self.on_notice()
        } else if self.timer.as_ref().map(TickTimer::fd) == Some(fd) {
            self.on_timer()
        } else {
            self.on_data_ready(fd);
            Ok(())
        };

        if let Err(e) = result {
            self.error(e);
        }
    }

    fn shutdown_pass(&mut self) -> bool {
        if self.cancel_passes == self.config.cancel_passes as i64 {
            if let Err(e) = self.reset_all() {
                log_debug!("reset during shutdown failed: {}", e);
            }
        }

        let mut all_disabled = true;
        for id in self.slots.ids() {
            if self.slots[id].enabled {
                let _ = self.cancel_slot(id);
                all_disabled &= !self.slots[id].enabled;
            }
        }

        self.cancel_passes -= 1;
        if self.cancel_passes < 0 {
            if !all_disabled {
                log_warn!("forcing shutdown with transfers still enabled");
            }
            all_disabled = true;
        }
        !all_disabled
    }

    fn on_hardware(&mut self) -> Result<()> {
        let mut completions = std::mem::take(&mut self.completions);
        let pumped = match self.hw.as_mut() {
            Some(hw) => hw.pump(&mut self.backend, self.config.hardware_poll_timeout, &mut completions),
            None => Ok(()),
        };
        for completion in completions.drain(..) {
            self.on_completion(completion);
        }
        self.completions = completions;
        pumped
    }

    fn on_completion(&mut self, completion: TransferCompletion) {
        let TransferCompletion { slot: id, status, actual_length, buffer } = completion;
        let Some(slot) = self.slots.get_mut(id) else {
            log_warn!("completion for unknown transfer slot {}", id.0);
            return;
        };

        slot.count_callback();
        slot.buffer = Some(buffer);
        let (stream, transfer, direction) = (slot.stream_id, slot.transfer_id, slot.direction);

        if !slot.enabled {
            log_warn!("@{},{}: {} completion on a disabled transfer", stream, transfer, direction);
            return;
        }

        let result = match direction {
            Direction::Read => self.on_read(id, status, actual_length),
            Direction::Write => self.on_write(id, status, actual_length),
        };
        if let Err(e) = result {
            self.slots[id].enabled = false;
            self.error_at(stream, transfer, e);
        }
    }

    fn on_read(&mut self, id: SlotId, status: TransferStatus, actual: usize) -> Result<()> {
        if status == TransferStatus::Cancelled || !self.should_run {
            let slot = &mut self.slots[id];
            let after = std::mem::replace(&mut slot.after_cancel, AfterCancel::Fatal);
            if self.should_run && status == TransferStatus::Cancelled {
                match after {
                    AfterCancel::Disable => {
                        slot.enabled = false;
                        return Ok(());
                    }
                    AfterCancel::Resubmit => return self.submit(id),
                    AfterCancel::Fatal => {}
                }
            }
            slot.enabled = false;
            self.cancel();
            return Ok(());
        }

        if status != TransferStatus::Completed {
            return Err(BulkError::UnknownStatus(status));
        }

        if actual > 2 {
            self.ts_activity = self.ts_now;
        }

        let shared = Arc::clone(&self.shared);
        let payload = {
            let slot = &self.slots[id];
            let cb = shared.streams[slot.stream_id as usize].read_callback.as_ref();
            match (cb, slot.buffer.as_deref()) {
                (Some(cb), Some(buffer)) => {
                    let data = &buffer[..actual.min(buffer.len())];
                    for_each_frame(data, shared.packet_sizes.read, slot.include_modem_status, |frame| {
                        cb.read_buffer(frame);
                    })
                }
                _ => 0,
            }
        };
        let slot = &mut self.slots[id];
        slot.count_bytes(payload);

        // A disable that raced this completion found nothing to cancel
        if std::mem::replace(&mut slot.after_cancel, AfterCancel::Fatal) == AfterCancel::Disable {
            slot.enabled = false;
            return Ok(());
        }
        self.submit(id)
    }

    fn on_write(&mut self, id: SlotId, status: TransferStatus, actual: usize) -> Result<()> {
        if status == TransferStatus::Cancelled || !self.should_run {
            self.slots[id].enabled = false;
            self.cancel();
            return Ok(());
        }

        if status != TransferStatus::Completed {
            return Err(BulkError::UnknownStatus(status));
        }

        if actual > 0 {
            let slot = &mut self.slots[id];
            slot.count_bytes(actual);
            let stream = slot.stream_id as usize;
            if let Some(cb) = self.shared.streams[stream].write_callback.as_ref() {
                let rc = cb.confirm_transfer(actual);
                if rc != 0 {
                    return Err(BulkError::Callback { kind: CallbackKind::ConfirmTransfer, code: rc });
                }
            }
        }

        self.submit(id)
    }

    fn on_notice(&mut self) -> Result<()> {
        self.shared.notifier.drain()?;

        if !self.should_run {
            return Ok(());
        }
        if self.shared.should_cancel.load(Ordering::Acquire) {
            self.should_run = false;
            return Ok(());
        }

        while let Some(request) = self.shared.control.pop() {
            self.pending.fold(request);
        }
        self.apply_control()
    }

    /// Resets first, then enables, then disables.
    fn apply_control(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);

        for stream_id in pending.reset {
            self.reset_stream(stream_id)?;
        }

        for fd in pending.enable {
            for id in self.slots.ids_for_fd(fd, Direction::Read) {
                let slot = &mut self.slots[id];
                if slot.enabled {
                    // Disable still in flight; re-arm when it lands
                    if slot.after_cancel == AfterCancel::Disable {
                        slot.after_cancel = AfterCancel::Resubmit;
                    }
                } else {
                    slot.enabled = true;
                    self.submit_or_fail(id);
                }
            }
        }

        for fd in pending.disable {
            for id in self.slots.ids_for_fd(fd, Direction::Read) {
                let slot = &mut self.slots[id];
                if !slot.enabled {
                    continue;
                }
                if slot.in_flight() {
                    slot.after_cancel = AfterCancel::Disable;
                    let handle = slot.handle;
                    self.backend.cancel(handle)?;
                } else {
                    slot.enabled = false;
                }
            }
        }
        Ok(())
    }

    fn on_timer(&mut self) -> Result<()> {
        let fired = match &self.timer {
            Some(timer) => timer.acknowledge()?,
            None => false,
        };
        if fired {
            let now = self.now_secs();
            self.tick(now);
        }
        Ok(())
    }

    /// Report and zero the per-slot counters, then check the watchdog
    /// against `now` (monotonic seconds).
    pub(crate) fn tick(&mut self, now: u64) {
        let shared = Arc::clone(&self.shared);
        for slot in self.slots.iter_mut() {
            let (callbacks, bytes) = slot.take_counters();
            if let Some(cb) = &shared.streams[slot.stream_id as usize].counter_callback {
                cb(slot.direction, slot.transfer_id, callbacks, bytes);
            }
        }

        self.ts_now = now;
        let timeout = shared.timeout_secs.load(Ordering::Relaxed);
        if timeout == 0 || !self.should_run {
            return;
        }
        if self.ts_activity.saturating_add(timeout) < self.ts_now {
            self.error(BulkError::Timeout);
        }
    }

    /// A write slot's data-ready descriptor fired: re-arm it if it was idle.
    fn on_data_ready(&mut self, fd: RawFd) {
        for id in self.slots.ids_for_fd(fd, Direction::Write) {
            let slot = &mut self.slots[id];
            if !slot.enabled {
                slot.enabled = true;
                self.submit_or_fail(id);
            }
        }
    }

    /// Thread-mode body: step until the session winds down, then clean up.
    pub fn run(&mut self) {
        if !self.initialized {
            self.shared.record(ErrorRecord::new(BulkError::NotInitialized));
            return;
        }
        while self.step(None) {}
        self.cleanup();
    }

    /// Cancel what is in flight, release every descriptor and slot.
    /// Safe to call any number of times.
    pub fn cleanup(&mut self) {
        if !self.initialized {
            return;
        }

        self.should_run = false;
        self.shared.should_cancel.store(true, Ordering::Release);

        for slot in self.slots.iter() {
            if slot.in_flight() {
                let _ = self.backend.cancel(slot.handle);
            }
        }

        self.hw = None;
        self.timer = None;
        self.poller = None;

        for slot in self.slots.drain() {
            // The backend hands back a buffer still in flight; dropping it here
            // is its one release.
            let _ = self.backend.free_transfer(slot.handle);
            log_debug!("destroy transfer @{},{}", slot.stream_id, slot.transfer_id);
        }

        self.completions.clear();
        self.ready.clear();
        self.pending.clear();
        self.initialized = false;
        log_info!("session stopped");
    }
}
