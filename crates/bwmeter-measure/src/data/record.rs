use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::data::definition::MIN_PACKET_SIZE;
use crate::error::{MeasureError, Result};

/// Header of one packet-train datagram.
///
/// Layout, big-endian: `sender_ns: u64`, `iteration: u16`, `sequence: u16`,
/// followed by zero padding up to the configured packet size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainRecord {
    /// Sender timestamp in nanoseconds on the sender's own monotonic clock.
    pub sender_ns: u64,
    /// Train this packet belongs to.
    pub iteration: u16,
    /// Position of the packet within its train as sent.
    pub sequence:  u16,
}

impl TrainRecord {
    pub const HEADER_LEN: usize = MIN_PACKET_SIZE;

    pub fn new(sender_ns: u64, iteration: u16, sequence: u16) -> Self {
        Self {
            sender_ns,
            iteration,
            sequence,
        }
    }

    /// Encode into a datagram of exactly `max(packet_size, HEADER_LEN)` bytes.
    pub fn encode(&self, packet_size: usize) -> Bytes {
        let len = packet_size.max(Self::HEADER_LEN);
        let mut buf = BytesMut::with_capacity(len);
        buf.put_u64(self.sender_ns);
        buf.put_u16(self.iteration);
        buf.put_u16(self.sequence);
        buf.resize(len, 0);
        buf.freeze()
    }

    pub fn decode(mut datagram: &[u8]) -> Result<Self> {
        if datagram.len() < Self::HEADER_LEN {
            return Err(MeasureError::Record(format!(
                "datagram of {} bytes is shorter than the {}-byte header",
                datagram.len(),
                Self::HEADER_LEN
            )));
        }

        Ok(Self {
            sender_ns: datagram.get_u64(),
            iteration: datagram.get_u16(),
            sequence:  datagram.get_u16(),
        })
    }
}
