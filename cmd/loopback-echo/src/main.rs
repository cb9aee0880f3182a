//! bulkstream loopback smoke run
//!
//! Drives one echo stream over the in-memory loopback backend:
//!   Part A - thread mode: inbound frames are echoed back out
//!   Part B - poll mode: same echo, caller-driven
//!   Part C - control: disable/enable reading, stream reset
//!   Part D - faults: a failing FILL_BUFFER ends the session with one error
//!
//! Line settings come from LOOPBACK_* variables (LOOPBACK_BAUDRATE, ...),
//! session settings from BULKSTREAM_*.
//!
//! Run: ./target/release/loopback-echo

use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bulkstream::{
    BulkStream, DeviceHandle, Direction, EventFdNotifier, LineConfig, LoopbackBackend, LoopbackProbe,
    Notifier, SessionConfig, StreamCallback, StreamConfig,
};

const PACKET: usize = 64;
const CHUNK: usize = 4096;

// ── Echo callback ──

/// Every received frame is queued for sending back.
struct Echo {
    ready: EventFdNotifier,
    pending: Mutex<VecDeque<u8>>,
    received: AtomicUsize,
    confirmed: AtomicUsize,
    fail_fill: AtomicI32,
}

impl Echo {
    fn new() -> Arc<Self> {
        let ready = match EventFdNotifier::create() {
            Ok(n) => n,
            Err(e) => {
                println!("FATAL: eventfd: {}", e);
                std::process::exit(1);
            }
        };
        Arc::new(Self {
            ready,
            pending: Mutex::new(VecDeque::new()),
            received: AtomicUsize::new(0),
            confirmed: AtomicUsize::new(0),
            fail_fill: AtomicI32::new(0),
        })
    }
}

impl StreamCallback for Echo {
    fn data_ready_fd(&self, _direction: Direction) -> RawFd {
        self.ready.fd()
    }

    fn fill_buffer(&self, buffer: &mut [u8]) -> i32 {
        let forced = self.fail_fill.load(Ordering::Relaxed);
        if forced < 0 {
            return forced;
        }
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        let n = pending.len().min(buffer.len());
        for (dst, src) in buffer.iter_mut().zip(pending.drain(..n)) {
            *dst = src;
        }
        n as i32
    }

    fn confirm_transfer(&self, len: usize) -> i32 {
        self.confirmed.fetch_add(len, Ordering::Relaxed);
        0
    }

    fn read_buffer(&self, data: &[u8]) -> i32 {
        self.received.fetch_add(data.len(), Ordering::Relaxed);
        self.pending.lock().unwrap_or_else(|p| p.into_inner()).extend(data.iter().copied());
        let _ = self.ready.notify();
        0
    }
}

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        self.total += 1;
        if ok {
            self.passed += 1;
            println!("  [{:2}] {:<52} PASS", self.total, name);
        } else {
            self.failed += 1;
            println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
        }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!("  Total: {}  Passed: {}  Failed: {}", self.total, self.passed, self.failed);
        println!("{}", LINE);
    }
}

struct Setup {
    session: BulkStream<LoopbackBackend>,
    probe: LoopbackProbe,
    dev: DeviceHandle,
    echo: Arc<Echo>,
}

fn setup(line: &LineConfig) -> Result<Setup, String> {
    let backend = LoopbackBackend::create().map_err(|e| e.to_string())?;
    let probe = backend.probe();
    let dev = backend.device(line, PACKET, CHUNK);
    let echo = Echo::new();

    let stream = StreamConfig::new(dev.clone())
        .callback(echo.clone() as Arc<dyn StreamCallback>)
        .read_transfers(1, 4)
        .write_transfers(1, 1);
    let session =
        BulkStream::new(backend, vec![stream], SessionConfig::from_env()).map_err(|e| e.to_string())?;
    Ok(Setup { session, probe, dev, echo })
}

/// One inbound payload: `frames` packets, each with a status prefix.
fn payload(frames: usize, seed: u8) -> (Vec<u8>, Vec<u8>) {
    let mut wire = Vec::new();
    let mut data = Vec::new();
    for f in 0..frames {
        wire.extend_from_slice(&[0x11, 0x60]);
        for i in 0..PACKET - 2 {
            let b = seed.wrapping_add((f * 7 + i) as u8);
            wire.push(b);
            data.push(b);
        }
    }
    (wire, data)
}

fn wait_until(mut drive: impl FnMut(), mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        drive();
    }
    done()
}

fn sleep_tick() {
    std::thread::sleep(Duration::from_millis(2));
}

// ════════════════════════════════════════════════════════════
// Part A: Thread mode
// ════════════════════════════════════════════════════════════

fn test_thread(t: &mut TestRunner, line: &LineConfig) {
    t.section("Part A: Thread mode echo");

    let s = match setup(line) {
        Ok(s) => s,
        Err(e) => {
            t.check("create session", false, &e);
            return;
        }
    };
    t.check(
        "negotiated packet sizes",
        s.session.read_packet_size() == PACKET && s.session.write_packet_size() == CHUNK,
        &format!("{:?}", s.session.packet_sizes()),
    );

    let started = s.session.start_thread();
    t.check("start_thread", started.is_ok(), &format!("{:?}", started.err()));
    t.check("is_active_thread", s.session.is_active_thread(), "not active");
    t.check(
        "start_poll refused while thread runs",
        s.session.start_poll().is_err() && !s.session.is_started_poll(),
        "poll mode started",
    );

    let (wire, data) = payload(3, 1);
    s.probe.push_inbound(&s.dev, &wire);
    let mut out = Vec::new();
    let echoed = wait_until(sleep_tick, || {
        out.extend(s.probe.take_outbound(&s.dev));
        out.len() >= data.len()
    });
    t.check("3 frames echoed", echoed && out == data, &format!("{} of {} bytes", out.len(), data.len()));
    t.check(
        "CONFIRM_TRANSFER covered every byte",
        wait_until(sleep_tick, || s.echo.confirmed.load(Ordering::Relaxed) == data.len()),
        &format!("{}", s.echo.confirmed.load(Ordering::Relaxed)),
    );

    s.session.stop_thread();
    t.check("stop_thread", !s.session.is_started_thread(), "still started");
    t.check("all transfers freed", s.probe.live_transfers() == 0, &format!("{}", s.probe.live_transfers()));
    t.check("no errors", s.session.print_errors("thread: ") == 0, "errors queued");
}

// ════════════════════════════════════════════════════════════
// Part B: Poll mode
// ════════════════════════════════════════════════════════════

fn test_poll(t: &mut TestRunner, line: &LineConfig) {
    t.section("Part B: Poll mode echo");

    let s = match setup(line) {
        Ok(s) => s,
        Err(e) => {
            t.check("create session", false, &e);
            return;
        }
    };

    let started = s.session.start_poll();
    t.check("start_poll", started.is_ok(), &format!("{:?}", started.err()));
    t.check("poll_fd available", s.session.poll_fd().is_some(), "none");
    t.check("start_thread refused while polling", s.session.start_thread().is_err(), "thread started");

    let poll = || {
        s.session.poll(Some(Duration::from_millis(10)));
    };
    let mut total = Vec::new();
    for round in 0..4u8 {
        let (wire, data) = payload(2, round * 31);
        s.probe.push_inbound(&s.dev, &wire);
        total.extend(data);
    }
    let mut out = Vec::new();
    let echoed = wait_until(poll, || {
        out.extend(s.probe.take_outbound(&s.dev));
        out.len() >= total.len()
    });
    t.check("8 frames echoed in order", echoed && out == total, &format!("{} of {} bytes", out.len(), total.len()));

    s.session.stop_poll();
    t.check("stop_poll", !s.session.is_started_poll(), "still started");
    t.check("all transfers freed", s.probe.live_transfers() == 0, &format!("{}", s.probe.live_transfers()));
    t.check("no errors", s.session.print_errors("poll: ") == 0, "errors queued");
}

// ════════════════════════════════════════════════════════════
// Part C: Control
// ════════════════════════════════════════════════════════════

fn test_control(t: &mut TestRunner, line: &LineConfig) {
    t.section("Part C: Control operations");

    let s = match setup(line) {
        Ok(s) => s,
        Err(e) => {
            t.check("create session", false, &e);
            return;
        }
    };
    t.check("undefined stream refused", s.session.enable_reading(9).is_err(), "accepted");

    if let Err(e) = s.session.start_poll() {
        t.check("start_poll", false, &e.to_string());
        return;
    }
    let poll = || {
        s.session.poll(Some(Duration::from_millis(10)));
    };

    let r = s.session.disable_reading(0);
    t.check("disable_reading accepted", r.is_ok(), &format!("{:?}", r.err()));
    t.check("disable_reading cancels reads", wait_until(poll, || s.probe.in_flight() == 0), "reads in flight");

    let (wire, data) = payload(1, 99);
    s.probe.push_inbound(&s.dev, &wire);
    for _ in 0..5 {
        poll();
    }
    t.check(
        "nothing delivered while disabled",
        s.echo.received.load(Ordering::Relaxed) == 0 && !s.session.is_ending(),
        "data delivered",
    );

    let r = s.session.enable_reading(0);
    t.check("enable_reading accepted", r.is_ok(), &format!("{:?}", r.err()));
    t.check(
        "enable_reading delivers queued data",
        wait_until(poll, || s.echo.received.load(Ordering::Relaxed) == data.len()),
        &format!("{}", s.echo.received.load(Ordering::Relaxed)),
    );

    let before = s.probe.resets(&s.dev);
    let r = s.session.reset_stream(0);
    t.check("reset_stream accepted", r.is_ok(), &format!("{:?}", r.err()));
    t.check("reset_stream", wait_until(poll, || s.probe.resets(&s.dev) == before + 1), "no reset");
    t.check(
        "line settings recorded",
        s.probe.applied_line(&s.dev).as_ref() == Some(line),
        "mismatch",
    );

    s.session.stop_poll();
    t.check("no errors", s.session.print_errors("control: ") == 0, "errors queued");
}

// ════════════════════════════════════════════════════════════
// Part D: Faults
// ════════════════════════════════════════════════════════════

fn test_faults(t: &mut TestRunner, line: &LineConfig) {
    t.section("Part D: Fault handling");

    let s = match setup(line) {
        Ok(s) => s,
        Err(e) => {
            t.check("create session", false, &e);
            return;
        }
    };
    if let Err(e) = s.session.start_thread() {
        t.check("start_thread", false, &e.to_string());
        return;
    }

    s.echo.fail_fill.store(-3, Ordering::Relaxed);
    let (wire, _) = payload(1, 5);
    s.probe.push_inbound(&s.dev, &wire);
    t.check("session ends on FILL_BUFFER < 0", wait_until(sleep_tick, || s.session.is_ending()), "still running");
    t.check(
        "reactor released everything",
        wait_until(sleep_tick, || s.probe.live_transfers() == 0),
        &format!("{}", s.probe.live_transfers()),
    );
    s.session.stop_thread();

    let errors = s.session.get_errors();
    t.check("exactly one error", errors.len() == 1, &format!("{} errors", errors.len()));
    if let Some(record) = errors.first() {
        println!("       {}", record);
    }
}

// ════════════════════════════════════════════════════════════

fn main() {
    bulkstream::init_logging();
    println!("=== bulkstream loopback smoke run (v{}) ===", bulkstream::VERSION);

    let line = match LineConfig::from_env("LOOPBACK") {
        Ok(line) => line,
        Err(e) => {
            println!("FATAL: {}", e);
            std::process::exit(2);
        }
    };
    println!("    line: {} baud, parity {:?}, flow {:?}", line.baud_rate, line.parity, line.flow);

    let mut t = TestRunner::new();
    test_thread(&mut t, &line);
    test_poll(&mut t, &line);
    test_control(&mut t, &line);
    test_faults(&mut t, &line);

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
