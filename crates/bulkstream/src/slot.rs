//! Transfer slots and the slot arena.
//!
//! A slot is one live bulk transfer: its buffer, the backend's handle for
//! it and the enabled flag. While the transfer is in flight the backend
//! owns the buffer and `buffer` is `None`.

use std::collections::HashMap;
use std::ops::{Index, IndexMut};
use std::os::unix::io::RawFd;

use bulkstream_core::entry::{Direction, SlotId, StreamId, TransferHandle};

/// What a `Cancelled` completion means for a read slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AfterCancel {
    /// Unrequested cancellation: the session goes down.
    Fatal,
    /// Cancelled by `disable_reading`: just disable the slot.
    Disable,
    /// Disabled then re-enabled while the cancel was in flight.
    Resubmit,
}

pub(crate) struct TransferSlot {
    pub stream_id: StreamId,
    /// Reads are numbered first, the write transfer follows them.
    pub transfer_id: u32,
    pub direction: Direction,
    pub include_modem_status: bool,
    /// GET_FD result: write data-ready signal, or the key for read control.
    pub ready_fd: RawFd,
    pub handle: TransferHandle,
    pub buffer: Option<Box<[u8]>>,
    pub enabled: bool,
    pub after_cancel: AfterCancel,
    pub counter_callbacks: u32,
    pub counter_bytes: u32,
}

impl TransferSlot {
    pub fn new(
        stream_id: StreamId,
        transfer_id: u32,
        direction: Direction,
        ready_fd: RawFd,
        handle: TransferHandle,
        buffer_size: usize,
    ) -> Self {
        Self {
            stream_id,
            transfer_id,
            direction,
            include_modem_status: false,
            ready_fd,
            handle,
            buffer: Some(vec![0u8; buffer_size].into_boxed_slice()),
            enabled: true,
            after_cancel: AfterCancel::Fatal,
            counter_callbacks: 0,
            counter_bytes: 0,
        }
    }

    /// The backend currently owns the buffer.
    #[inline]
    pub fn in_flight(&self) -> bool {
        self.buffer.is_none()
    }

    #[inline]
    pub fn count_callback(&mut self) {
        self.counter_callbacks = self.counter_callbacks.wrapping_add(1);
    }

    #[inline]
    pub fn count_bytes(&mut self, n: usize) {
        self.counter_bytes = self.counter_bytes.wrapping_add(n as u32);
    }

    /// Return and zero the per-tick counters.
    #[inline]
    pub fn take_counters(&mut self) -> (u32, u32) {
        let counters = (self.counter_callbacks, self.counter_bytes);
        self.counter_callbacks = 0;
        self.counter_bytes = 0;
        counters
    }
}

/// Slots indexed by `SlotId`, plus a multimap from data-ready descriptor to
/// the slots registered under it.
#[derive(Default)]
pub(crate) struct SlotArena {
    slots: Vec<TransferSlot>,
    by_fd: HashMap<RawFd, Vec<SlotId>>,
}

impl SlotArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next `insert()` will return.
    #[inline]
    pub fn next_id(&self) -> SlotId {
        SlotId(self.slots.len() as u32)
    }

    pub fn insert(&mut self, slot: TransferSlot) -> SlotId {
        let id = self.next_id();
        self.by_fd.entry(slot.ready_fd).or_default().push(id);
        self.slots.push(slot);
        id
    }

    #[inline]
    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut TransferSlot> {
        self.slots.get_mut(id.index())
    }

    /// Slots of `direction` registered under `fd`.
    pub fn ids_for_fd(&self, fd: RawFd, direction: Direction) -> Vec<SlotId> {
        self.by_fd
            .get(&fd)
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|id| self.slots[id.index()].direction == direction)
                    .collect()
            })
            .unwrap_or_default()
    }

    #[inline]
    pub fn ids(&self) -> impl Iterator<Item = SlotId> {
        (0..self.slots.len() as u32).map(SlotId)
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &TransferSlot> {
        self.slots.iter()
    }

    #[inline]
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TransferSlot> {
        self.slots.iter_mut()
    }

    /// Remove every slot, leaving the arena empty.
    pub fn drain(&mut self) -> std::vec::Drain<'_, TransferSlot> {
        self.by_fd.clear();
        self.slots.drain(..)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Index<SlotId> for SlotArena {
    type Output = TransferSlot;

    fn index(&self, id: SlotId) -> &TransferSlot {
        &self.slots[id.index()]
    }
}

impl IndexMut<SlotId> for SlotArena {
    fn index_mut(&mut self, id: SlotId) -> &mut TransferSlot {
        &mut self.slots[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(stream: StreamId, transfer: u32, direction: Direction, fd: RawFd) -> TransferSlot {
        TransferSlot::new(stream, transfer, direction, fd, TransferHandle(transfer as u64), 8)
    }

    #[test]
    fn test_multimap_by_fd() {
        let mut arena = SlotArena::new();
        let r0 = arena.insert(slot(0, 0, Direction::Read, 5));
        let r1 = arena.insert(slot(0, 1, Direction::Read, 5));
        let w = arena.insert(slot(0, 2, Direction::Write, 5));
        arena.insert(slot(1, 0, Direction::Read, 6));

        assert_eq!(arena.ids_for_fd(5, Direction::Read), vec![r0, r1]);
        assert_eq!(arena.ids_for_fd(5, Direction::Write), vec![w]);
        assert!(arena.ids_for_fd(7, Direction::Read).is_empty());
        assert_eq!(arena.len(), 4);

        assert_eq!(arena.drain().count(), 4);
        assert!(arena.is_empty());
        assert!(arena.ids_for_fd(5, Direction::Read).is_empty());
    }

    #[test]
    fn test_counters_wrap_and_reset() {
        let mut s = slot(0, 0, Direction::Read, 1);
        assert!(!s.in_flight());
        s.counter_bytes = u32::MAX;
        s.count_bytes(2);
        s.count_callback();
        assert_eq!(s.take_counters(), (1, 1));
        assert_eq!(s.take_counters(), (0, 0));
    }
}
