//! Error types for bwmeter-measure.

use std::io;
use thiserror::Error;

/// Terminal failure of a measurement run.
///
/// Individual worker failures are not errors at this level: they are counted
/// by the coordinator and only surface here once every worker has failed.
#[derive(Debug, Error)]
pub enum MeasureError {
    #[error("invalid measurement definition: {0}")]
    Validation(String),

    #[error("name resolution failed for {host}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("Unable to establish a TCP connection")]
    Connection,

    #[error("No thread able to download after TCP connection was established.")]
    Transfer,

    #[error("Unable to calculate accurate results on the measurement.")]
    Untrustworthy,

    #[error("measurement cancelled")]
    Cancelled,

    #[error("traffic budget exhausted ({available} bytes available)")]
    BudgetExhausted { available: u64 },

    #[error("socket error: {0}")]
    Socket(#[source] io::Error),

    #[error("malformed packet-train record: {0}")]
    Record(String),
}

impl MeasureError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self { MeasureError::Validation(msg.into()) }
}

pub type Result<T> = std::result::Result<T, MeasureError>;
