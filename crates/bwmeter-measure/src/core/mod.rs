//! Pure transformations over measurement data.
//!
//! Rate reduction, the trust policy, run bookkeeping and packet-train
//! evaluation. Nothing here performs I/O or reads a clock; the effects layer
//! feeds timestamps in and acts on the answers.

mod rate;
mod rendezvous;
mod tracker;
mod train;
mod trust;

pub use rate::{average_throughput, bits_per_second, time_slices, total_bytes};
pub use rendezvous::{Rendezvous, RendezvousOutcome};
pub use tracker::{RunTracker, Step, WorkerEvent};
pub use train::{OutOfRange, ReceivedPacket, TrainBuckets, TrainEvaluation, collect_rates, evaluate_train};
pub use trust::{MIN_COVERAGE, WorkerCoverage, results_trustable};
