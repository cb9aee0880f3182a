//! # `BulkStream` - session facade
//!
//! Owns one session and runs it in exactly one of two modes:
//!
//! - **thread**: a dedicated reactor thread steps until shutdown
//! - **poll**: the caller drives `poll()` and may integrate `poll_fd()`
//!   into its own event loop
//!
//! Starting one mode while the other runs is a `ConfigError::ModeActive`
//! and leaves the running mode untouched. Control operations may be called
//! from any thread, including from inside a callback.
//!
//! ```ignore
//! let stream = StreamConfig::new(device).callback(echo).read_transfers(1, 2).write_transfers(1, 1);
//! let session = BulkStream::new(backend, vec![stream], SessionConfig::from_env())?;
//! session.start_thread()?;
//! // ...
//! session.stop_thread();
//! session.print_errors("bulk: ");
//! ```

use std::mem;
use std::os::unix::io::RawFd;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bulkstream_core::backend::UsbBackend;
use bulkstream_core::entry::{Direction, StreamId};
use bulkstream_core::error::{BulkError, ConfigError, Result};
use bulkstream_core::{log_debug, log_error, log_info};
use bulkstream_module::{ErrorRecord, Poller};

use crate::config::SessionConfig;
use crate::control::ControlRequest;
use crate::session::{SessionCore, SessionShared};
use crate::stream::{negotiate, PacketSizes, StreamConfig};

enum Mode<B: UsbBackend> {
    Idle(Box<SessionCore<B>>),
    Polling(Box<SessionCore<B>>),
    Threaded(JoinHandle<Box<SessionCore<B>>>),
    /// Reactor thread panicked or could not be spawned; the session is gone.
    Lost,
}

pub struct BulkStream<B: UsbBackend + 'static> {
    shared: Arc<SessionShared>,
    mode: Mutex<Mode<B>>,
}

impl<B: UsbBackend + 'static> BulkStream<B> {
    /// Validate the stream list against `backend` and build an idle session.
    ///
    /// Nothing touches the hardware until a mode is started.
    pub fn new(backend: B, streams: Vec<StreamConfig>, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        if !backend.handles_timeouts() {
            return Err(ConfigError::TimeoutsUnsupported.into());
        }
        let sizes = negotiate(&streams, backend.context_id())?;
        log_debug!(
            "session: {} stream(s), read packet {} B, write packet {} B",
            streams.len(),
            sizes.read,
            sizes.write
        );

        let shared = Arc::new(SessionShared::new(streams, sizes, config.timeout_secs)?);
        let core = SessionCore::new(Arc::clone(&shared), backend, config);
        Ok(Self { shared, mode: Mutex::new(Mode::Idle(Box::new(core))) })
    }

    fn mode(&self) -> MutexGuard<'_, Mode<B>> {
        self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Thread mode ────────────────────────────────────────────────────

    /// Init on the caller's thread, then hand the session to a reactor thread.
    /// A no-op if the thread is already running.
    pub fn start_thread(&self) -> Result<()> {
        let mut mode = self.mode();
        match mem::replace(&mut *mode, Mode::Lost) {
            Mode::Polling(core) => {
                *mode = Mode::Polling(core);
                Err(ConfigError::ModeActive("polling").into())
            }
            Mode::Threaded(handle) => {
                *mode = Mode::Threaded(handle);
                Ok(())
            }
            Mode::Lost => Err(BulkError::NotInitialized),
            Mode::Idle(mut core) => {
                if let Err(e) = core.init() {
                    *mode = Mode::Idle(core);
                    return Err(e);
                }

                let name = core.config.thread_name.clone();
                self.shared.started_thread.store(true, Ordering::Release);
                let spawned = thread::Builder::new().name(name).spawn(move || {
                    core.run();
                    core
                });

                match spawned {
                    Ok(handle) => {
                        *mode = Mode::Threaded(handle);
                        log_info!("reactor thread started");
                        Ok(())
                    }
                    Err(e) => {
                        // The closure, and the session in it, is already dropped
                        // and cleaned up.
                        self.shared.started_thread.store(false, Ordering::Release);
                        self.shared.should_cancel.store(true, Ordering::Release);
                        let err = BulkError::Os(e.raw_os_error().unwrap_or(0));
                        self.shared.record(ErrorRecord::new(err.clone()));
                        Err(err)
                    }
                }
            }
        }
    }

    /// Ask the reactor thread to wind down and wait for it. A no-op unless
    /// thread mode is running.
    pub fn stop_thread(&self) {
        let mut mode = self.mode();
        match mem::replace(&mut *mode, Mode::Lost) {
            Mode::Threaded(handle) => {
                self.shared.should_cancel.store(true, Ordering::Release);
                self.shared.wake();

                match handle.join() {
                    Ok(mut core) => {
                        core.cleanup();
                        *mode = Mode::Idle(core);
                        log_info!("reactor thread stopped");
                    }
                    Err(_) => self.shared.record(ErrorRecord::new(BulkError::ThreadPanicked)),
                }
                self.shared.started_thread.store(false, Ordering::Release);
            }
            other => *mode = other,
        }
    }

    // ── Poll mode ──────────────────────────────────────────────────────

    /// Init for caller-driven polling. A no-op if polling already runs.
    pub fn start_poll(&self) -> Result<()> {
        let mut mode = self.mode();
        match mem::replace(&mut *mode, Mode::Lost) {
            Mode::Threaded(handle) => {
                *mode = Mode::Threaded(handle);
                Err(ConfigError::ModeActive("thread").into())
            }
            Mode::Polling(core) => {
                *mode = Mode::Polling(core);
                Ok(())
            }
            Mode::Lost => Err(BulkError::NotInitialized),
            Mode::Idle(mut core) => {
                let started = core.init();
                if started.is_ok() {
                    self.shared.started_poll.store(true, Ordering::Release);
                    *mode = Mode::Polling(core);
                } else {
                    *mode = Mode::Idle(core);
                }
                started
            }
        }
    }

    /// One step with at most `timeout` of waiting (`None` blocks).
    ///
    /// Returns false when not polling or once the session has wound down
    /// after an error; check `get_errors()` then and call `stop_poll()`.
    /// Must not be called from inside a callback.
    pub fn poll(&self, timeout: Option<Duration>) -> bool {
        match &mut *self.mode() {
            Mode::Polling(core) => core.step(timeout),
            _ => false,
        }
    }

    /// Cancel everything, step until all transfers are disabled, release.
    pub fn stop_poll(&self) {
        let mut mode = self.mode();
        match mem::replace(&mut *mode, Mode::Lost) {
            Mode::Polling(mut core) => {
                core.cancel();
                while core.step(None) {}
                core.cleanup();
                *mode = Mode::Idle(core);
                self.shared.started_poll.store(false, Ordering::Release);
            }
            other => *mode = other,
        }
    }

    /// Readiness descriptor of the session's poller while polling.
    ///
    /// Readable whenever `poll()` has work to do.
    pub fn poll_fd(&self) -> Option<RawFd> {
        match &*self.mode() {
            Mode::Polling(core) => core.poller.as_ref().map(Poller::fd),
            _ => None,
        }
    }

    // ── Control ────────────────────────────────────────────────────────

    fn read_fd(&self, stream_id: StreamId) -> std::result::Result<RawFd, ConfigError> {
        let stream = self
            .shared
            .streams
            .get(stream_id as usize)
            .ok_or(ConfigError::UndefinedStream(stream_id))?;
        let cb = stream
            .callback_for(Direction::Read)
            .ok_or(ConfigError::MissingCallback { stream: stream_id, direction: Direction::Read })?;

        let fd = cb.data_ready_fd(Direction::Read);
        if fd < 0 {
            return Err(ConfigError::BadReadyFd { stream: stream_id, fd });
        }
        Ok(fd)
    }

    /// Re-arm the stream's read transfers. Applied by the next step;
    /// ignored while no mode is running.
    pub fn enable_reading(&self, stream_id: StreamId) -> std::result::Result<(), ConfigError> {
        let fd = self.read_fd(stream_id)?;
        if self.shared.accepts_control() {
            self.shared.request(ControlRequest::Enable(fd));
        }
        Ok(())
    }

    /// Cancel the stream's read transfers without ending the session.
    pub fn disable_reading(&self, stream_id: StreamId) -> std::result::Result<(), ConfigError> {
        let fd = self.read_fd(stream_id)?;
        if self.shared.accepts_control() {
            self.shared.request(ControlRequest::Disable(fd));
        }
        Ok(())
    }

    /// Run the stream's reset (its reset callback, else the hardware reset).
    pub fn reset_stream(&self, stream_id: StreamId) -> std::result::Result<(), ConfigError> {
        if stream_id as usize >= self.shared.streams.len() {
            return Err(ConfigError::UndefinedStream(stream_id));
        }
        if self.shared.accepts_control() {
            self.shared.request(ControlRequest::Reset(stream_id));
        }
        Ok(())
    }

    /// Inactivity watchdog in seconds; 0 disables it.
    pub fn set_timeout(&self, secs: u64) {
        self.shared.timeout_secs.store(secs, Ordering::Relaxed);
    }

    pub fn timeout(&self) -> u64 {
        self.shared.timeout_secs.load(Ordering::Relaxed)
    }

    // ── State ──────────────────────────────────────────────────────────

    #[inline]
    pub fn packet_sizes(&self) -> PacketSizes {
        self.shared.packet_sizes
    }

    #[inline]
    pub fn read_packet_size(&self) -> usize {
        self.shared.packet_sizes.read
    }

    #[inline]
    pub fn write_packet_size(&self) -> usize {
        self.shared.packet_sizes.write
    }

    #[inline]
    pub fn stream_count(&self) -> usize {
        self.shared.streams.len()
    }

    /// Shutdown has been requested, by the caller or by an error.
    #[inline]
    pub fn is_ending(&self) -> bool {
        self.shared.is_ending()
    }

    #[inline]
    pub fn is_started_thread(&self) -> bool {
        self.shared.started_thread.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_started_poll(&self) -> bool {
        self.shared.started_poll.load(Ordering::Acquire)
    }

    /// Thread mode runs and is not winding down.
    #[inline]
    pub fn is_active_thread(&self) -> bool {
        self.is_started_thread() && !self.is_ending()
    }

    // ── Errors ─────────────────────────────────────────────────────────

    /// Drain the runtime error queue.
    pub fn get_errors(&self) -> Vec<ErrorRecord> {
        let mut out = Vec::new();
        self.shared.errors.drain_into(&mut out);
        out
    }

    pub fn get_errors_into(&self, out: &mut Vec<ErrorRecord>) -> usize {
        self.shared.errors.drain_into(out)
    }

    /// Drain and log every queued error with `prefix`; returns the count.
    pub fn print_errors(&self, prefix: &str) -> usize {
        let mut n = 0;
        while let Some(record) = self.shared.errors.pop() {
            log_error!("{}{}", prefix, record);
            n += 1;
        }
        n
    }
}

impl<B: UsbBackend + 'static> Drop for BulkStream<B> {
    fn drop(&mut self) {
        self.stop_thread();
        self.stop_poll();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestStream;
    use bulkstream_core::callback::{CallbackKind, StreamCallback};
    use bulkstream_core::entry::DeviceHandle;
    use bulkstream_core::line::LineConfig;
    use bulkstream_module::{LoopbackBackend, LoopbackProbe};
    use std::time::Instant;

    struct Rig {
        session: BulkStream<LoopbackBackend>,
        probe: LoopbackProbe,
        dev: DeviceHandle,
        cb: Arc<TestStream>,
    }

    fn rig_with(config: SessionConfig, build: impl FnOnce(StreamConfig) -> StreamConfig) -> Rig {
        let backend = LoopbackBackend::create().unwrap();
        let probe = backend.probe();
        let dev = backend.device(&LineConfig::default(), 64, 4096);
        let cb = TestStream::new();
        let stream = build(StreamConfig::new(dev.clone()).callback(cb.clone() as Arc<dyn StreamCallback>));
        let session = BulkStream::new(backend, vec![stream], config).unwrap();
        Rig { session, probe, dev, cb }
    }

    fn rig() -> Rig {
        rig_with(SessionConfig::default(), |s| s.read_transfers(1, 2).write_transfers(1, 1))
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn poll_until(session: &BulkStream<LoopbackBackend>, mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            session.poll(Some(Duration::from_millis(20)));
        }
        assert!(done(), "condition not reached");
    }

    #[test]
    fn test_negotiated_sizes() {
        let backend = LoopbackBackend::create().unwrap();
        let a = backend.device(&LineConfig::default(), 512, 4096);
        let b = backend.device(&LineConfig::default(), 64, 8192);
        let cb = TestStream::new() as Arc<dyn StreamCallback>;
        let streams = vec![
            StreamConfig::new(a).callback(cb.clone()).read_transfers(1, 2),
            StreamConfig::new(b).callback(cb).write_transfers(1, 1),
        ];
        let session = BulkStream::new(backend, streams, SessionConfig::default()).unwrap();
        assert_eq!(session.read_packet_size(), 64);
        assert_eq!(session.write_packet_size(), 4096);
        assert_eq!(session.stream_count(), 2);
    }

    #[test]
    fn test_construction_errors() {
        let backend = LoopbackBackend::create().unwrap().with_timeout_support(false);
        let dev = backend.device(&LineConfig::default(), 64, 4096);
        let cb = TestStream::new() as Arc<dyn StreamCallback>;
        let streams = vec![StreamConfig::new(dev).callback(cb).read_transfers(1, 1)];
        let err = BulkStream::new(backend, streams, SessionConfig::default()).err();
        assert_eq!(err, Some(ConfigError::TimeoutsUnsupported.into()));

        let other = LoopbackBackend::create().unwrap();
        let backend = LoopbackBackend::create().unwrap();
        let dev = other.device(&LineConfig::default(), 64, 4096);
        let cb = TestStream::new() as Arc<dyn StreamCallback>;
        let streams = vec![StreamConfig::new(dev).callback(cb).read_transfers(1, 1)];
        let err = BulkStream::new(backend, streams, SessionConfig::default()).err();
        assert_eq!(err, Some(ConfigError::ContextMismatch { stream: 0 }.into()));

        let backend = LoopbackBackend::create().unwrap();
        let err = BulkStream::new(backend, Vec::new(), SessionConfig::default().max_events(0)).err();
        assert!(err.map_or(false, |e| e.is_config()));
    }

    #[test]
    fn test_modes_are_exclusive() {
        let r = rig();
        r.session.start_poll().unwrap();
        assert_eq!(r.session.start_thread(), Err(ConfigError::ModeActive("polling").into()));
        assert!(r.session.is_started_poll());
        assert!(!r.session.is_started_thread());
        r.session.start_poll().unwrap();
        r.session.stop_poll();

        r.session.start_thread().unwrap();
        assert_eq!(r.session.start_poll(), Err(ConfigError::ModeActive("thread").into()));
        assert!(r.session.is_active_thread());
        assert!(!r.session.is_started_poll());
        assert!(r.session.poll_fd().is_none());
        r.session.stop_thread();
        assert!(!r.session.is_started_thread());
        assert!(r.session.get_errors().is_empty());
    }

    #[test]
    fn test_poll_mode_echo() {
        let r = rig();
        assert!(!r.session.poll(Some(Duration::ZERO)));
        r.session.start_poll().unwrap();
        assert!(r.session.poll_fd().is_some());

        r.probe.push_inbound(&r.dev, &[0x11, 0x60, b'h', b'i']);
        poll_until(&r.session, || r.cb.received() == b"hi");

        r.cb.queue(b"hello");
        poll_until(&r.session, || r.cb.confirmed() == 5);
        assert_eq!(r.probe.take_outbound(&r.dev), b"hello");

        r.session.stop_poll();
        assert!(!r.session.is_started_poll());
        assert!(r.session.is_ending());
        assert_eq!(r.probe.live_transfers(), 0);
        assert!(r.session.get_errors().is_empty());
    }

    #[test]
    fn test_two_streams_share_packet_size_and_fate() {
        let backend = LoopbackBackend::create().unwrap();
        let probe = backend.probe();
        let wide = backend.device(&LineConfig::default(), 64, 4096);
        let narrow = backend.device(&LineConfig::default(), 8, 4096);
        let reader = TestStream::new();
        let writer = TestStream::new();
        let streams = vec![
            StreamConfig::new(wide.clone())
                .read_callback(reader.clone() as Arc<dyn StreamCallback>)
                .read_transfers(2, 1)
                .read_include_modem_status(true),
            StreamConfig::new(narrow).write_callback(writer.clone() as Arc<dyn StreamCallback>).write_transfers(1, 1),
        ];
        let session = BulkStream::new(backend, streams, SessionConfig::default()).unwrap();
        assert_eq!(session.read_packet_size(), 8);
        session.start_poll().unwrap();

        // One 10-byte completion on the 64-byte device, split at 8
        let data: Vec<u8> = (0..10).collect();
        probe.push_inbound(&wide, &data);
        poll_until(&session, || reader.frames().len() == 2);
        assert_eq!(reader.frames(), vec![(0..8).collect::<Vec<u8>>(), vec![8, 9]]);
        assert_eq!(probe.in_flight(), 1);

        // A failure on stream 1 takes stream 0 down with it
        writer.fail_fill(-3);
        writer.signal();
        poll_until(&session, || session.is_ending() && probe.in_flight() == 0);
        probe.push_inbound(&wide, &[0x11, 0x60, 7]);
        session.poll(Some(Duration::from_millis(20)));
        assert_eq!(reader.frames().len(), 2);

        session.stop_poll();
        let errors = session.get_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].origin, Some((1, 0)));
        assert_eq!(errors[0].error, BulkError::Callback { kind: CallbackKind::FillBuffer, code: -3 });
        assert_eq!(probe.live_transfers(), 0);
    }

    #[test]
    fn test_restart_after_stop() {
        let r = rig();
        r.session.start_poll().unwrap();
        r.session.stop_poll();
        r.session.start_poll().unwrap();
        assert!(!r.session.is_ending());
        assert_eq!(r.probe.in_flight(), 2);
        // init, the first shutdown pass, init again
        assert_eq!(r.probe.resets(&r.dev), 3);
        r.session.stop_poll();
        assert_eq!(r.probe.live_transfers(), 0);
    }

    #[test]
    fn test_thread_mode_echo() {
        let r = rig();
        r.session.start_thread().unwrap();
        r.session.start_thread().unwrap();

        r.probe.push_inbound(&r.dev, &[0x11, 0x60, 1, 2, 3]);
        wait_for(|| r.cb.received() == [1, 2, 3]);

        r.cb.queue(b"ping");
        wait_for(|| r.cb.confirmed() == 4);
        assert_eq!(r.probe.take_outbound(&r.dev), b"ping");

        r.session.stop_thread();
        assert!(!r.session.is_active_thread());
        assert_eq!(r.probe.live_transfers(), 0);
        assert!(r.session.get_errors().is_empty());
    }

    #[test]
    fn test_thread_error_ends_session() {
        let r = rig();
        r.session.start_thread().unwrap();
        r.cb.fail_fill(-1);
        r.cb.signal();
        wait_for(|| r.session.is_ending());
        assert!(!r.session.is_active_thread());
        // The thread has wound down and released everything on its own
        wait_for(|| r.probe.live_transfers() == 0);

        r.session.stop_thread();
        assert_eq!(r.session.print_errors("test: "), 1);
        assert_eq!(r.session.print_errors("test: "), 0);
    }

    #[test]
    fn test_thread_watchdog() {
        let config = SessionConfig::default().timeout_secs(1).tick_interval(Duration::from_millis(50));
        let r = rig_with(config, |s| s.read_transfers(1, 1));
        assert_eq!(r.session.timeout(), 1);
        r.session.start_thread().unwrap();
        wait_for(|| r.session.is_ending());
        r.session.stop_thread();

        let errors = r.session.get_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error, BulkError::Timeout);
    }

    #[test]
    fn test_control_validation() {
        let backend = LoopbackBackend::create().unwrap();
        let dev = backend.device(&LineConfig::default(), 64, 4096);
        let cb = TestStream::new() as Arc<dyn StreamCallback>;
        let streams = vec![StreamConfig::new(dev).write_callback(cb).write_transfers(1, 1)];
        let session = BulkStream::new(backend, streams, SessionConfig::default()).unwrap();

        assert_eq!(
            session.disable_reading(0),
            Err(ConfigError::MissingCallback { stream: 0, direction: Direction::Read })
        );
        assert_eq!(session.enable_reading(3), Err(ConfigError::UndefinedStream(3)));
        assert_eq!(session.reset_stream(1), Err(ConfigError::UndefinedStream(1)));
        assert_eq!(session.reset_stream(0), Ok(()));
    }

    #[test]
    fn test_control_before_start_is_ignored() {
        let r = rig();
        r.session.disable_reading(0).unwrap();
        r.session.start_poll().unwrap();
        // Reads were armed despite the earlier disable
        assert_eq!(r.probe.in_flight(), 2);
        r.session.stop_poll();
    }

    #[test]
    fn test_disable_and_enable_reading() {
        let r = rig();
        r.session.start_poll().unwrap();

        r.session.disable_reading(0).unwrap();
        r.session.disable_reading(0).unwrap();
        poll_until(&r.session, || r.probe.in_flight() == 0);

        r.probe.push_inbound(&r.dev, &[0x11, 0x60, 7]);
        for _ in 0..3 {
            r.session.poll(Some(Duration::from_millis(10)));
        }
        assert!(r.cb.frames().is_empty());
        assert!(!r.session.is_ending());

        r.session.enable_reading(0).unwrap();
        r.session.enable_reading(0).unwrap();
        poll_until(&r.session, || r.cb.received() == [7]);
        assert!(r.session.get_errors().is_empty());
    }

    #[test]
    fn test_reset_stream_while_running() {
        let r = rig();
        r.session.start_poll().unwrap();
        assert_eq!(r.probe.resets(&r.dev), 1);
        r.session.reset_stream(0).unwrap();
        poll_until(&r.session, || r.probe.resets(&r.dev) == 2);
    }

    #[test]
    fn test_drop_stops_thread() {
        let r = rig();
        let probe = r.probe.clone();
        r.session.start_thread().unwrap();
        drop(r);
        assert_eq!(probe.live_transfers(), 0);
    }
}
