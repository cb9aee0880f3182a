//! Slot, stream and completion types.
//!
//! These are the *lingua franca* between the reactor, the hardware backend
//! and the readiness adapter.

use std::fmt;

/// Index of a stream inside one session (position in the stream list).
pub type StreamId = u32;

/// Slot ID - index into the session's slot arena.
///
/// Handed to the backend at `alloc_transfer()` time and echoed back in
/// every completion, so routing a completion is a plain index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SlotId(pub u32);

impl SlotId {
    pub const NONE: Self = Self(u32::MAX);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

/// Transfer direction, seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device → host (bulk IN).
    Read,
    /// Host → device (bulk OUT).
    Write,
}

impl Direction {
    #[inline]
    pub fn is_read(self) -> bool {
        matches!(self, Direction::Read)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => write!(f, "read"),
            Direction::Write => write!(f, "write"),
        }
    }
}

/// Identity of a shared hardware context (one libusb context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ContextId(pub u64);

/// Opaque handle to a transfer allocated by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TransferHandle(pub u64);

/// Final status of a bulk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Cancelled,
    TimedOut,
    Stall,
    NoDevice,
    Overflow,
    Error,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStatus::Completed => "completed",
            TransferStatus::Cancelled => "cancelled",
            TransferStatus::TimedOut => "timed out",
            TransferStatus::Stall => "stall",
            TransferStatus::NoDevice => "no device",
            TransferStatus::Overflow => "overflow",
            TransferStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// A finished transfer, handed back by the backend's event pump.
///
/// The buffer that was moved into the backend at submit time comes back
/// here; `actual_length` bytes at its front are valid.
#[derive(Debug)]
pub struct TransferCompletion {
    pub slot: SlotId,
    pub status: TransferStatus,
    pub actual_length: usize,
    pub buffer: Box<[u8]>,
}

/// An already-opened device, as produced by the external device opener.
///
/// Only the fields the reactor consumes are kept: the shared context,
/// the two bulk endpoints and the negotiated sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub context: ContextId,
    /// Backend-local device index.
    pub device: u32,
    /// Bulk IN endpoint address (device → host).
    pub in_endpoint: u8,
    /// Bulk OUT endpoint address (host → device).
    pub out_endpoint: u8,
    /// Usually 64 or 512 bytes.
    pub max_packet_size: usize,
    /// Usually 4096 bytes.
    pub write_chunk_size: usize,
}

impl DeviceHandle {
    #[inline]
    pub fn endpoint(&self, direction: Direction) -> u8 {
        match direction {
            Direction::Read => self.in_endpoint,
            Direction::Write => self.out_endpoint,
        }
    }
}
