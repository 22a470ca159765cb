//! Multi-worker HTTP throughput and UDP packet-train measurement.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - [`data`] - Definitions, samples, wire records, results and events
//! - [`core`] - Pure transformations: rate reduction, trust policy, run bookkeeping
//! - [`effects`] - Sockets, timers and worker tasks behind trait seams
//!
//! # Measurements
//!
//! - **HTTP download**: `threads` concurrent TCP connections download the same
//!   object; after a ramp-up the aggregate throughput is measured over a fixed
//!   window and reported per worker and per time slice.
//! - **Packet trains**: trains of timestamped UDP datagrams are received and
//!   the sending and receiving rate of every train is derived.
//!
//! Runs report progress on an [`EventSink`] and stop on a
//! [`CancellationToken`](tokio_util::sync::CancellationToken).

pub mod core;
pub mod data;
pub mod effects;
mod error;

pub use data::{
    DownloadResult, EventSink, HttpDownloadDefinition, HttpTarget, MeasurementEvent, MeasurementResult,
    PacketTrainsDefinition, PacketTrainsResult, Sample, Status, TrainRecord, WorkerState,
};
pub use effects::{
    DatagramSocket, HttpDownload, Measurement, MeasurementKind, PacketTrainSender, PacketTrains, ProbeState,
    ProbeTimers, Resolver, SendReport, StaticResolver, Timeouts, TokioResolver, TrafficBudget, TrafficBudgetManager,
    Unlimited,
};
pub use error::{MeasureError, Result};
