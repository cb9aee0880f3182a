//! Session state.
//!
//! `SessionShared` is what caller threads may touch: the stream list, the
//! cross-thread flags, the control queue, the error queue and the wake
//! channel. `SessionCore` is owned by whichever thread drives the reactor
//! and holds everything else: the backend, descriptors, slots and timers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bulkstream_core::backend::UsbBackend;
use bulkstream_core::entry::{StreamId, TransferCompletion};
use bulkstream_core::error::{BulkError, Result};
use bulkstream_core::notifier::Notifier;
use bulkstream_core::{log_error, log_warn};
use bulkstream_module::{
    ErrorQueue, ErrorRecord, EventFdNotifier, HardwareEvents, Poller, Ready, TickTimer,
};
use crossbeam_queue::SegQueue;

use crate::config::SessionConfig;
use crate::control::{ControlRequest, PendingControl};
use crate::slot::SlotArena;
use crate::stream::{PacketSizes, StreamConfig};

/// State shared between the facade, caller threads and the reactor.
pub(crate) struct SessionShared {
    pub streams: Vec<StreamConfig>,
    pub packet_sizes: PacketSizes,
    /// Set once shutdown is requested; cleared only by the next init.
    pub should_cancel: AtomicBool,
    pub started_thread: AtomicBool,
    pub started_poll: AtomicBool,
    pub timeout_secs: AtomicU64,
    pub control: SegQueue<ControlRequest>,
    pub errors: ErrorQueue,
    pub notifier: EventFdNotifier,
}

impl SessionShared {
    pub fn new(streams: Vec<StreamConfig>, packet_sizes: PacketSizes, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            streams,
            packet_sizes,
            should_cancel: AtomicBool::new(false),
            started_thread: AtomicBool::new(false),
            started_poll: AtomicBool::new(false),
            timeout_secs: AtomicU64::new(timeout_secs),
            control: SegQueue::new(),
            errors: ErrorQueue::new(),
            notifier: EventFdNotifier::create()?,
        })
    }

    #[inline]
    pub fn is_ending(&self) -> bool {
        self.should_cancel.load(Ordering::Relaxed)
    }

    /// Control requests only matter while a mode is running.
    #[inline]
    pub fn accepts_control(&self) -> bool {
        let started = self.started_thread.load(Ordering::Acquire) || self.started_poll.load(Ordering::Acquire);
        started && !self.should_cancel.load(Ordering::Acquire)
    }

    /// Queue a control request and wake the reactor.
    pub fn request(&self, request: ControlRequest) {
        self.control.push(request);
        self.wake();
    }

    pub fn wake(&self) {
        if let Err(e) = self.notifier.notify() {
            log_warn!("unable to wake reactor: {}", e);
        }
    }

    /// Store a runtime error record; it is dropped if the queue is full.
    pub fn record(&self, record: ErrorRecord) {
        log_error!("{}", record);
        let _ = self.errors.push(record);
    }
}

/// Everything owned by the thread driving the reactor.
pub(crate) struct SessionCore<B: UsbBackend> {
    pub shared: Arc<SessionShared>,
    pub backend: B,
    pub config: SessionConfig,

    /// true from init until the session starts shutting down
    pub should_run: bool,
    /// Shutdown steps left before exit is forced
    pub cancel_passes: i64,
    pub initialized: bool,

    /// Monotonic seconds since `clock`
    pub clock: Instant,
    pub ts_now: u64,
    pub ts_activity: u64,

    pub poller: Option<Poller>,
    pub hw: Option<HardwareEvents>,
    pub timer: Option<TickTimer>,

    pub slots: SlotArena,
    pub pending: PendingControl,
    pub ready: Vec<Ready>,
    pub completions: Vec<TransferCompletion>,
}

impl<B: UsbBackend> SessionCore<B> {
    pub fn new(shared: Arc<SessionShared>, backend: B, config: SessionConfig) -> Self {
        let ready = Vec::with_capacity(config.max_events);
        Self {
            shared,
            backend,
            config,
            should_run: false,
            cancel_passes: 0,
            initialized: false,
            clock: Instant::now(),
            ts_now: 0,
            ts_activity: 0,
            poller: None,
            hw: None,
            timer: None,
            slots: SlotArena::new(),
            pending: PendingControl::default(),
            ready,
            completions: Vec::new(),
        }
    }

    #[inline]
    pub fn now_secs(&self) -> u64 {
        self.clock.elapsed().as_secs()
    }

    /// Move the whole session toward shutdown. Idempotent.
    pub fn cancel(&mut self) {
        self.should_run = false;
        self.shared.should_cancel.store(true, Ordering::Release);
        self.shared.wake();
    }

    /// Runtime error: cancel the session and queue one record.
    pub fn error(&mut self, error: BulkError) {
        self.cancel();
        self.shared.record(ErrorRecord::new(error));
    }

    /// Runtime error attributed to one transfer.
    pub fn error_at(&mut self, stream: StreamId, transfer: u32, error: BulkError) {
        self.cancel();
        self.shared.record(ErrorRecord::at(stream, transfer, error));
    }
}

impl<B: UsbBackend> Drop for SessionCore<B> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
