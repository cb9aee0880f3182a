//! Per-stream configuration and the construction checks on a stream list.

use std::sync::Arc;

use bulkstream_core::callback::{CounterCallback, ResetCallback, StreamCallback};
use bulkstream_core::entry::{ContextId, DeviceHandle, Direction, StreamId};
use bulkstream_core::error::ConfigError;

/// One logical stream over an opened device.
///
/// ```ignore
/// let stream = StreamConfig::new(device)
///     .callback(echo.clone())
///     .read_transfers(1, 2)
///     .write_transfers(1, 1);
/// ```
#[derive(Clone)]
pub struct StreamConfig {
    pub(crate) device: DeviceHandle,
    pub(crate) read_start_enabled: bool,
    pub(crate) read_include_modem_status: bool,
    pub(crate) read_packets_per_transfer: u32,
    pub(crate) read_transfers: u32,
    pub(crate) write_packets_per_transfer: u32,
    pub(crate) write_transfers: u32,
    pub(crate) read_callback: Option<Arc<dyn StreamCallback>>,
    pub(crate) write_callback: Option<Arc<dyn StreamCallback>>,
    pub(crate) counter_callback: Option<CounterCallback>,
    pub(crate) reset_callback: Option<ResetCallback>,
}

impl StreamConfig {
    pub fn new(device: DeviceHandle) -> Self {
        Self {
            device,
            read_start_enabled: true,
            read_include_modem_status: false,
            read_packets_per_transfer: 1,
            read_transfers: 0,
            write_packets_per_transfer: 1,
            write_transfers: 0,
            read_callback: None,
            write_callback: None,
            counter_callback: None,
            reset_callback: None,
        }
    }

    /// Whether read transfers are armed at session start (default: true)
    pub fn read_start_enabled(mut self, enabled: bool) -> Self {
        self.read_start_enabled = enabled;
        self
    }

    /// Keep the 2 modem status bytes in every delivered frame (default: false)
    pub fn read_include_modem_status(mut self, include: bool) -> Self {
        self.read_include_modem_status = include;
        self
    }

    /// `transfers` parallel reads of `packets` packets each
    pub fn read_transfers(mut self, packets: u32, transfers: u32) -> Self {
        self.read_packets_per_transfer = packets;
        self.read_transfers = transfers;
        self
    }

    /// `transfers` writes (at most 1) of `packets` chunks each
    pub fn write_transfers(mut self, packets: u32, transfers: u32) -> Self {
        self.write_packets_per_transfer = packets;
        self.write_transfers = transfers;
        self
    }

    /// Use one callback object for both directions
    pub fn callback(mut self, cb: Arc<dyn StreamCallback>) -> Self {
        self.read_callback = Some(Arc::clone(&cb));
        self.write_callback = Some(cb);
        self
    }

    pub fn read_callback(mut self, cb: Arc<dyn StreamCallback>) -> Self {
        self.read_callback = Some(cb);
        self
    }

    pub fn write_callback(mut self, cb: Arc<dyn StreamCallback>) -> Self {
        self.write_callback = Some(cb);
        self
    }

    pub fn counter_callback(mut self, cb: CounterCallback) -> Self {
        self.counter_callback = Some(cb);
        self
    }

    pub fn reset_callback(mut self, cb: ResetCallback) -> Self {
        self.reset_callback = Some(cb);
        self
    }

    #[inline]
    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    #[inline]
    pub(crate) fn callback_for(&self, direction: Direction) -> Option<&Arc<dyn StreamCallback>> {
        match direction {
            Direction::Read => self.read_callback.as_ref(),
            Direction::Write => self.write_callback.as_ref(),
        }
    }

    #[inline]
    pub(crate) fn transfers(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Read => self.read_transfers,
            Direction::Write => self.write_transfers,
        }
    }

    #[inline]
    pub(crate) fn packets_per_transfer(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Read => self.read_packets_per_transfer,
            Direction::Write => self.write_packets_per_transfer,
        }
    }

    fn check(&self, stream: StreamId, context: ContextId) -> Result<(), ConfigError> {
        if self.device.context != context {
            return Err(ConfigError::ContextMismatch { stream });
        }
        for direction in [Direction::Read, Direction::Write] {
            if self.transfers(direction) == 0 {
                continue;
            }
            if self.callback_for(direction).is_none() {
                return Err(ConfigError::MissingCallback { stream, direction });
            }
            if self.packets_per_transfer(direction) == 0 {
                return Err(ConfigError::ZeroPacketsPerTransfer { stream, direction });
            }
        }
        if self.write_transfers > 1 {
            return Err(ConfigError::TooManyWriteTransfers { stream, requested: self.write_transfers });
        }
        if self.device.max_packet_size == 0 || self.device.write_chunk_size == 0 {
            return Err(ConfigError::ZeroPacketSize { stream });
        }
        Ok(())
    }
}

/// Negotiated packet sizes of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketSizes {
    /// Smallest max packet size over all streams
    pub read: usize,
    /// Smallest write chunk size over all streams
    pub write: usize,
}

/// Check a stream list against a hardware context and negotiate sizes.
pub fn negotiate(streams: &[StreamConfig], context: ContextId) -> Result<PacketSizes, ConfigError> {
    if streams.is_empty() {
        return Err(ConfigError::NoStreams);
    }

    let mut any_transfers = false;
    let mut sizes = PacketSizes { read: usize::MAX, write: usize::MAX };

    for (id, stream) in streams.iter().enumerate() {
        stream.check(id as StreamId, context)?;
        any_transfers |= stream.read_transfers > 0 || stream.write_transfers > 0;
        sizes.read = sizes.read.min(stream.device.max_packet_size);
        sizes.write = sizes.write.min(stream.device.write_chunk_size);
    }

    if !any_transfers {
        return Err(ConfigError::NoTransfers);
    }
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::RawFd;

    struct Nop;

    impl StreamCallback for Nop {
        fn data_ready_fd(&self, _direction: Direction) -> RawFd {
            -1
        }
    }

    fn device(context: u64, packet: usize, chunk: usize) -> DeviceHandle {
        DeviceHandle {
            context: ContextId(context),
            device: 0,
            in_endpoint: 0x81,
            out_endpoint: 0x02,
            max_packet_size: packet,
            write_chunk_size: chunk,
        }
    }

    fn nop() -> Arc<dyn StreamCallback> {
        Arc::new(Nop)
    }

    #[test]
    fn test_negotiates_minimum_sizes() {
        let streams = vec![
            StreamConfig::new(device(1, 512, 4096)).callback(nop()).read_transfers(1, 2),
            StreamConfig::new(device(1, 64, 8192)).callback(nop()).write_transfers(1, 1),
            StreamConfig::new(device(1, 128, 1024)),
        ];
        let sizes = negotiate(&streams, ContextId(1)).unwrap();
        assert_eq!(sizes, PacketSizes { read: 64, write: 1024 });
    }

    #[test]
    fn test_rejects_bad_lists() {
        assert_eq!(negotiate(&[], ContextId(1)), Err(ConfigError::NoStreams));

        let s = [StreamConfig::new(device(2, 64, 4096)).callback(nop()).read_transfers(1, 1)];
        assert_eq!(negotiate(&s, ContextId(1)), Err(ConfigError::ContextMismatch { stream: 0 }));

        let s = [StreamConfig::new(device(1, 64, 4096)).read_transfers(1, 1)];
        assert_eq!(
            negotiate(&s, ContextId(1)),
            Err(ConfigError::MissingCallback { stream: 0, direction: Direction::Read })
        );

        let s = [StreamConfig::new(device(1, 64, 4096)).callback(nop()).write_transfers(1, 2)];
        assert_eq!(
            negotiate(&s, ContextId(1)),
            Err(ConfigError::TooManyWriteTransfers { stream: 0, requested: 2 })
        );

        let s = [StreamConfig::new(device(1, 64, 4096)).callback(nop()).write_transfers(0, 1)];
        assert_eq!(
            negotiate(&s, ContextId(1)),
            Err(ConfigError::ZeroPacketsPerTransfer { stream: 0, direction: Direction::Write })
        );

        let s = [StreamConfig::new(device(1, 64, 4096)).callback(nop())];
        assert_eq!(negotiate(&s, ContextId(1)), Err(ConfigError::NoTransfers));

        let s = [StreamConfig::new(device(1, 0, 4096)).callback(nop()).read_transfers(1, 1)];
        assert_eq!(negotiate(&s, ContextId(1)), Err(ConfigError::ZeroPacketSize { stream: 0 }));
    }

    #[test]
    fn test_write_only_stream_needs_no_read_callback() {
        let s = [StreamConfig::new(device(1, 64, 4096)).write_callback(nop()).write_transfers(2, 1)];
        assert!(negotiate(&s, ContextId(1)).is_ok());
    }
}
