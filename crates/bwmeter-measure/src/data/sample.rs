use std::fmt;

/// One readable event observed by a worker.
///
/// `elapsed_ns` is measured from the moment the worker sent its request, on
/// a monotonic clock. Samples of one worker are never reordered or mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub elapsed_ns: i64,
    pub bytes:      i64,
}

impl Sample {
    pub const fn new(elapsed_ns: i64, bytes: i64) -> Self { Self { elapsed_ns, bytes } }

    pub const fn from_millis(elapsed_ms: i64, bytes: i64) -> Self { Self::new(elapsed_ms * 1_000_000, bytes) }
}

/// Lifecycle of a single download worker.
///
/// ```text
/// Inactive → ConnectingTcp → ConnectedTcp → AwaitingFirstByte → DownloadInProgress → FinishedSuccess
///                  ↘               ↘                 ↘
///                                   FinishedError
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    #[default]
    Inactive,
    ConnectingTcp,
    ConnectedTcp,
    AwaitingFirstByte,
    DownloadInProgress,
    FinishedSuccess,
    FinishedError,
}

impl WorkerState {
    pub fn is_finished(&self) -> bool { matches!(self, WorkerState::FinishedSuccess | WorkerState::FinishedError) }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Inactive => "inactive",
            WorkerState::ConnectingTcp => "connecting",
            WorkerState::ConnectedTcp => "connected",
            WorkerState::AwaitingFirstByte => "awaiting first byte",
            WorkerState::DownloadInProgress => "downloading",
            WorkerState::FinishedSuccess => "finished",
            WorkerState::FinishedError => "failed",
        };
        f.write_str(name)
    }
}
