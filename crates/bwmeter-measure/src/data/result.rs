use serde::{Deserialize, Serialize};

/// Outcome of a trusted HTTP download run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadResult {
    /// Workers that contributed, i.e. finished successfully.
    pub actual_num_threads: usize,

    /// Sum of the per-worker averages, in bits per second.
    pub bandwidth_bps: f64,

    /// Average throughput of each contributing worker, in bits per second.
    pub bps_per_thread: Vec<f64>,

    /// Time-sliced throughput of each contributing worker, in bits per second.
    pub bps_slots_per_thread: Vec<Vec<f64>>,
}

impl DownloadResult {
    pub fn bandwidth_mbps(&self) -> f64 { self.bandwidth_bps / 1_000_000.0 }
}

/// Per-train rates of a packet-train run, in kbit/s.
///
/// Trains with an unusable interval are left out, so both lists may be
/// shorter than the number of iterations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PacketTrainsResult {
    #[serde(rename = "sending_speed")]
    pub send_rates_kbps: Vec<f64>,

    #[serde(rename = "receiving_speed")]
    pub recv_rates_kbps: Vec<f64>,
}

impl PacketTrainsResult {
    pub fn is_empty(&self) -> bool { self.recv_rates_kbps.is_empty() }
}

/// Result value handed to the report pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "measurement", rename_all = "snake_case")]
pub enum MeasurementResult {
    HttpDownload(DownloadResult),
    PacketTrains(PacketTrainsResult),
}
