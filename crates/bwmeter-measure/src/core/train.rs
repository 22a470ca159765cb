use crate::data::{PacketTrainsResult, TrainRecord};

/// A train packet as seen by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedPacket {
    pub sequence:    u16,
    pub sender_ns:   u64,
    pub receiver_ns: u64,
    /// Global arrival counter across all trains.
    pub receive_seq: u32,
}

/// A packet whose iteration index has no bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfRange {
    pub iteration:  u16,
    pub iterations: u16,
}

/// Fixed set of per-train buckets, indexed by iteration.
#[derive(Debug, Clone)]
pub struct TrainBuckets {
    trains:   Vec<Vec<ReceivedPacket>>,
    received: u32,
}

impl TrainBuckets {
    pub fn new(iterations: u16) -> Self {
        Self {
            trains:   vec![Vec::new(); iterations as usize],
            received: 0,
        }
    }

    /// Stamp the next receive sequence number on `record` and file it.
    ///
    /// The counter advances for every packet, including ones that are then
    /// rejected as out of range.
    pub fn insert(&mut self, record: TrainRecord, receiver_ns: u64) -> Result<u32, OutOfRange> {
        let receive_seq = self.received;
        self.received = self.received.wrapping_add(1);

        let Some(train) = self.trains.get_mut(record.iteration as usize) else {
            return Err(OutOfRange {
                iteration:  record.iteration,
                iterations: self.trains.len() as u16,
            });
        };

        train.push(ReceivedPacket {
            sequence: record.sequence,
            sender_ns: record.sender_ns,
            receiver_ns,
            receive_seq,
        });
        Ok(receive_seq)
    }

    pub fn trains(&self) -> &[Vec<ReceivedPacket>] { &self.trains }

    pub fn packets_received(&self) -> u32 { self.received }
}

/// Verdict on a single train.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrainEvaluation {
    /// Nothing arrived for this iteration.
    Empty,
    /// Sender or receiver interval is not positive; the rate would be infinite.
    InfiniteRate,
    Rate {
        send_kbps: f64,
        recv_kbps: f64,
        /// Packets that arrived after one with a higher sender sequence.
        reordered: usize,
    },
}

/// Rate of one train from its first and last packet in arrival order.
///
/// Reordered packets are counted but still part of the computation.
pub fn evaluate_train(train: &[ReceivedPacket], packet_size: usize) -> TrainEvaluation {
    let (Some(first), Some(last)) = (train.first(), train.last()) else {
        return TrainEvaluation::Empty;
    };

    let reordered = count_reordered(train);

    let send_span = last.sender_ns as i128 - first.sender_ns as i128;
    let recv_span = last.receiver_ns as i128 - first.receiver_ns as i128;
    if send_span <= 0 || recv_span <= 0 {
        return TrainEvaluation::InfiniteRate;
    }

    let bytes = (packet_size * train.len()) as f64;
    TrainEvaluation::Rate {
        send_kbps: kbps(bytes, send_span as f64),
        recv_kbps: kbps(bytes, recv_span as f64),
        reordered,
    }
}

/// Collect the rates of every usable train, in iteration order.
pub fn collect_rates(evaluations: impl IntoIterator<Item = TrainEvaluation>) -> PacketTrainsResult {
    let mut result = PacketTrainsResult::default();
    for evaluation in evaluations {
        if let TrainEvaluation::Rate { send_kbps, recv_kbps, .. } = evaluation {
            result.send_rates_kbps.push(send_kbps);
            result.recv_rates_kbps.push(recv_kbps);
        }
    }
    result
}

/// Lost packets leave gaps in the sequence but do not count as reordering.
fn count_reordered(train: &[ReceivedPacket]) -> usize {
    let mut highest: Option<u16> = None;
    let mut reordered = 0;
    for packet in train {
        match highest {
            Some(seen) if packet.sequence < seen => reordered += 1,
            _ => highest = Some(packet.sequence),
        }
    }
    reordered
}

fn kbps(bytes: f64, span_ns: f64) -> f64 {
    let bytes_per_second = bytes / (span_ns / 1_000_000_000.0);
    bytes_per_second * 8.0 / 1000.0
}
