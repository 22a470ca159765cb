use std::io;
use std::time::Duration;

use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::data::{PacketTrainsDefinition, TrainRecord};
use crate::error::{MeasureError, Result};

/// Totals of one sending run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SendReport {
    pub packets: u64,
    pub bytes:   u64,
}

/// Sending side of a packet-train run.
///
/// Each train is `train_length` records sent back-to-back, followed by a
/// pause of `train_gap_ms`. Sender timestamps count from the first packet.
#[derive(Debug, Clone)]
pub struct PacketTrainSender {
    definition: PacketTrainsDefinition,
}

impl PacketTrainSender {
    pub fn new(definition: PacketTrainsDefinition) -> Result<Self> {
        definition.validate()?;
        Ok(Self { definition })
    }

    pub fn definition(&self) -> &PacketTrainsDefinition { &self.definition }

    /// Send every train on a connected socket.
    pub async fn send(&self, socket: &UdpSocket, cancel: &CancellationToken) -> Result<SendReport> {
        let PacketTrainsDefinition {
            iterations,
            train_length,
            packet_size,
            train_gap_ms,
        } = self.definition;
        let gap = Duration::from_millis(train_gap_ms);
        let epoch = Instant::now();
        let mut report = SendReport::default();

        for iteration in 0..iterations {
            if cancel.is_cancelled() {
                return Err(MeasureError::Cancelled);
            }

            for sequence in 0..train_length {
                let sender_ns = u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
                let datagram = TrainRecord::new(sender_ns, iteration, sequence).encode(packet_size);
                match socket.send(&datagram).await {
                    Ok(sent) => {
                        report.packets += 1;
                        report.bytes += sent as u64;
                    }
                    // Left over from an earlier ICMP unreachable; the datagram is lost.
                    Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                        debug!(iteration, sequence, "receiver not listening");
                    }
                    Err(e) => return Err(MeasureError::Socket(e)),
                }
            }

            debug!(iteration, packets = train_length, "train sent");
            if iteration + 1 < iterations {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(MeasureError::Cancelled),
                    _ = tokio::time::sleep(gap) => {}
                }
            }
        }

        info!(packets = report.packets, bytes = report.bytes, "all trains sent");
        Ok(report)
    }
}
