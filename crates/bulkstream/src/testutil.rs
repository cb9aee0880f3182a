//! Test callback: an in-memory outbox for writes, a frame log for reads and
//! an eventfd as the data-ready descriptor of both directions.

use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bulkstream_core::callback::StreamCallback;
use bulkstream_core::entry::Direction;
use bulkstream_core::notifier::Notifier;
use bulkstream_module::EventFdNotifier;

pub(crate) struct TestStream {
    ready: EventFdNotifier,
    outbox: Mutex<VecDeque<u8>>,
    frames: Mutex<Vec<Vec<u8>>>,
    confirmed: AtomicUsize,
    fill_result: AtomicI32,
    confirm_result: AtomicI32,
}

impl TestStream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ready: EventFdNotifier::create().unwrap(),
            outbox: Mutex::new(VecDeque::new()),
            frames: Mutex::new(Vec::new()),
            confirmed: AtomicUsize::new(0),
            fill_result: AtomicI32::new(0),
            confirm_result: AtomicI32::new(0),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.ready.fd()
    }

    /// Add bytes to send without signalling.
    pub fn stage(&self, bytes: &[u8]) {
        self.outbox.lock().unwrap().extend(bytes.iter().copied());
    }

    pub fn signal(&self) {
        self.ready.notify().unwrap();
    }

    pub fn queue(&self, bytes: &[u8]) {
        self.stage(bytes);
        self.signal();
    }

    /// FILL_BUFFER returns `code` from now on.
    pub fn fail_fill(&self, code: i32) {
        self.fill_result.store(code, Ordering::SeqCst);
    }

    /// FILL_BUFFER claims `len` bytes without writing any.
    pub fn fill_claim(&self, len: i32) {
        self.fill_result.store(len, Ordering::SeqCst);
    }

    pub fn fail_confirm(&self, code: i32) {
        self.confirm_result.store(code, Ordering::SeqCst);
    }

    pub fn confirmed(&self) -> usize {
        self.confirmed.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }

    /// All delivered frames, concatenated.
    pub fn received(&self) -> Vec<u8> {
        self.frames.lock().unwrap().concat()
    }
}

impl StreamCallback for TestStream {
    fn data_ready_fd(&self, _direction: Direction) -> RawFd {
        self.fd()
    }

    fn fill_buffer(&self, buffer: &mut [u8]) -> i32 {
        let forced = self.fill_result.load(Ordering::SeqCst);
        if forced != 0 {
            return forced;
        }
        let mut outbox = self.outbox.lock().unwrap();
        let n = outbox.len().min(buffer.len());
        for (dst, src) in buffer.iter_mut().zip(outbox.drain(..n)) {
            *dst = src;
        }
        n as i32
    }

    fn confirm_transfer(&self, len: usize) -> i32 {
        self.confirmed.fetch_add(len, Ordering::SeqCst);
        self.confirm_result.load(Ordering::SeqCst)
    }

    fn read_buffer(&self, data: &[u8]) -> i32 {
        self.frames.lock().unwrap().push(data.to_vec());
        0
    }
}
