//! Inbound frame delivery and modem status decoding.
//!
//! One bulk IN transfer can carry several device packets. Every packet
//! starts with two modem status bytes, so a transfer is split at the
//! negotiated packet size and each frame is delivered on its own.

/// Split `data` into frames of at most `packet_size` bytes and hand each to
/// `deliver`, keeping or stripping the 2-byte status prefix.
///
/// - more than 2 bytes: with status kept, frames of 2+ bytes are delivered
///   whole; with status stripped, frames longer than 2 bytes are delivered
///   without their prefix and shorter ones are dropped.
/// - exactly 2 bytes with status kept: the status bytes alone are delivered.
/// - anything else delivers nothing.
///
/// Returns the payload byte count (frame length minus the prefix, summed
/// over delivered frames).
pub fn for_each_frame<F>(data: &[u8], packet_size: usize, include_status: bool, mut deliver: F) -> usize
where
    F: FnMut(&[u8]),
{
    debug_assert!(packet_size > 0, "packet size must be negotiated first");
    let packet_size = packet_size.max(1);
    let mut payload = 0;

    if data.len() > 2 {
        for frame in data.chunks(packet_size) {
            if include_status {
                if frame.len() >= 2 {
                    payload += frame.len() - 2;
                    deliver(frame);
                }
            } else if frame.len() > 2 {
                payload += frame.len() - 2;
                deliver(&frame[2..]);
            }
        }
    } else if include_status && data.len() == 2 {
        deliver(data);
    }

    payload
}

/// The 2-byte line state prefix of every inbound frame.
///
/// Byte 0: bits 0–3 are zero, then CTS, DSR, RI, RLSD.
/// Byte 1: DR, OE, PE, FE, BI, THRE, TEMT, RCVR FIFO error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModemStatus(pub [u8; 2]);

impl ModemStatus {
    /// Read the prefix of a frame delivered with status included.
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        match frame {
            [b0, b1, ..] => Some(Self([*b0, *b1])),
            _ => None,
        }
    }

    #[inline]
    fn bit(&self, byte: usize, bit: u8) -> bool {
        self.0[byte] & (1 << bit) != 0
    }

    /// Clear to send
    pub fn cts(&self) -> bool {
        self.bit(0, 4)
    }

    /// Data set ready
    pub fn dsr(&self) -> bool {
        self.bit(0, 5)
    }

    /// Ring indicator
    pub fn ri(&self) -> bool {
        self.bit(0, 6)
    }

    /// Receive line signal detect
    pub fn rlsd(&self) -> bool {
        self.bit(0, 7)
    }

    pub fn data_ready(&self) -> bool {
        self.bit(1, 0)
    }

    pub fn overrun_error(&self) -> bool {
        self.bit(1, 1)
    }

    pub fn parity_error(&self) -> bool {
        self.bit(1, 2)
    }

    pub fn framing_error(&self) -> bool {
        self.bit(1, 3)
    }

    pub fn break_interrupt(&self) -> bool {
        self.bit(1, 4)
    }

    pub fn transmitter_holding_empty(&self) -> bool {
        self.bit(1, 5)
    }

    pub fn transmitter_empty(&self) -> bool {
        self.bit(1, 6)
    }

    pub fn fifo_error(&self) -> bool {
        self.bit(1, 7)
    }

    /// Any of OE/PE/FE/BI/FIFO error.
    pub fn has_line_error(&self) -> bool {
        self.0[1] & 0b1001_1110 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(data: &[u8], packet: usize, status: bool) -> (Vec<Vec<u8>>, usize) {
        let mut frames = Vec::new();
        let n = for_each_frame(data, packet, status, |f| frames.push(f.to_vec()));
        (frames, n)
    }

    #[test]
    fn test_split_keep_status() {
        let data: Vec<u8> = (0..10).collect();
        let (frames, payload) = collect(&data, 8, true);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 8);
        assert_eq!(frames[1], vec![8, 9]);
        assert_eq!(payload, 6);
    }

    #[test]
    fn test_split_strip_status() {
        let data: Vec<u8> = (0..10).collect();
        let (frames, payload) = collect(&data, 8, false);
        // The 2-byte tail frame is status only and gets dropped
        assert_eq!(frames, vec![vec![2, 3, 4, 5, 6, 7]]);
        assert_eq!(payload, 6);
    }

    #[test]
    fn test_each_packet_has_own_prefix() {
        let data = [0x11, 0x60, b'a', b'b', 0x11, 0x60, b'c'];
        let (frames, payload) = collect(&data, 4, false);
        assert_eq!(frames, vec![b"ab".to_vec(), b"c".to_vec()]);
        assert_eq!(payload, 3);
    }

    #[test]
    fn test_status_only_transfer() {
        let (frames, payload) = collect(&[0x11, 0x60], 64, true);
        assert_eq!(frames, vec![vec![0x11, 0x60]]);
        assert_eq!(payload, 0);

        let (frames, _) = collect(&[0x11, 0x60], 64, false);
        assert!(frames.is_empty());

        let (frames, _) = collect(&[0x11], 64, true);
        assert!(frames.is_empty());
    }

    #[test]
    fn test_modem_status_bits() {
        let st = ModemStatus::from_frame(&[0b1011_0000, 0b0110_0001, 0xAA]).unwrap();
        assert!(st.cts());
        assert!(st.dsr());
        assert!(!st.ri());
        assert!(st.rlsd());
        assert!(st.data_ready());
        assert!(st.transmitter_holding_empty());
        assert!(st.transmitter_empty());
        assert!(!st.fifo_error());
        assert!(!st.has_line_error());

        let st = ModemStatus([0, 0b0000_0100]);
        assert!(st.parity_error());
        assert!(st.has_line_error());

        assert!(ModemStatus::from_frame(&[1]).is_none());
    }
}
