//! Immutable data types for measurement runs.
//!
//! Definitions, samples, wire records, results and lifecycle events. Nothing
//! in here performs I/O; values are built once and passed between the pure
//! core and the effectful edge.

pub mod definition;
pub mod event;
pub mod record;
pub mod result;
pub mod sample;

pub use definition::{HttpDownloadDefinition, HttpTarget, PacketTrainsDefinition};
pub use event::{EventSink, MeasurementEvent, Status};
pub use record::TrainRecord;
pub use result::{DownloadResult, MeasurementResult, PacketTrainsResult};
pub use sample::{Sample, WorkerState};
