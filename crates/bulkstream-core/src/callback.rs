//! Stream callback contract.
//!
//! Callbacks run synchronously on whichever thread is driving the reactor's
//! step, never on a separate I/O thread. `data_ready_fd()` may also be called
//! from a caller's thread by the control operations, so implementors must not
//! assume exclusive access to anything they share.
//!
//! Return values follow the fixed ABI:
//!
//! | Kind               | Return                                               |
//! |--------------------|------------------------------------------------------|
//! | `GET_FD`           | descriptor signalling data readiness                 |
//! | `FILL_BUFFER`      | bytes written; 0 = nothing ready; negative = fatal   |
//! | `CONFIRM_TRANSFER` | 0 = ok; anything else = fatal                        |
//! | `READ_BUFFER`      | ignored                                              |

use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use crate::entry::{DeviceHandle, Direction};

/// The four callback operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    GetFd(Direction),
    FillBuffer,
    ConfirmTransfer,
    ReadBuffer,
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallbackKind::GetFd(Direction::Read) => "READ_GET_FD",
            CallbackKind::GetFd(Direction::Write) => "WRITE_GET_FD",
            CallbackKind::FillBuffer => "WRITE_FILL_BUFFER",
            CallbackKind::ConfirmTransfer => "WRITE_CONFIRM_TRANSFER",
            CallbackKind::ReadBuffer => "READ_BUFFER",
        };
        f.write_str(s)
    }
}

/// Per-direction data callback.
///
/// One object may serve both directions (see `StreamConfig::callback`);
/// the direction passed to `data_ready_fd()` tells them apart.
pub trait StreamCallback: Send + Sync {
    /// GET_FD: descriptor that becomes readable when data is ready.
    ///
    /// For writes it is registered with the poller once, at slot init.
    /// For reads it is only used as the key for enable/disable requests.
    fn data_ready_fd(&self, direction: Direction) -> RawFd;

    /// FILL_BUFFER: write up to `buffer.len()` bytes, return how many.
    fn fill_buffer(&self, buffer: &mut [u8]) -> i32 {
        let _ = buffer;
        0
    }

    /// CONFIRM_TRANSFER: `len` bytes were physically sent.
    fn confirm_transfer(&self, len: usize) -> i32 {
        let _ = len;
        0
    }

    /// READ_BUFFER: received frame. If modem status is included, the first
    /// two bytes carry it and `data.len() >= 2`.
    fn read_buffer(&self, data: &[u8]) -> i32 {
        let _ = data;
        0
    }
}

/// Per-tick counter report: (direction, transfer id, callbacks, bytes).
pub type CounterCallback = Arc<dyn Fn(Direction, u32, u32, u32) + Send + Sync>;

/// Stream reset hook; replaces the hardware-level reset when set.
pub type ResetCallback = Arc<dyn Fn(&DeviceHandle) + Send + Sync>;
