use std::fmt;
use std::str::FromStr;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::http_download::HttpDownload;
use super::packet_trains::{DatagramSocket, PacketTrains};
use super::resolver::Resolver;
use crate::data::{MeasurementResult, Status};
use crate::error::{MeasureError, Result};

/// Measurement types known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementKind {
    HttpDownload,
    PacketTrains,
}

impl MeasurementKind {
    pub const ALL: [MeasurementKind; 2] = [MeasurementKind::HttpDownload, MeasurementKind::PacketTrains];

    pub fn name(&self) -> &'static str {
        match self {
            MeasurementKind::HttpDownload => "http_download",
            MeasurementKind::PacketTrains => "packet_trains",
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

impl FromStr for MeasurementKind {
    type Err = MeasureError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        MeasurementKind::ALL
            .into_iter()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| MeasureError::validation(format!("unknown measurement '{s}'")))
    }
}

/// A prepared measurement, ready to be started once.
pub trait Measurement: Send {
    fn kind(&self) -> MeasurementKind;

    fn status(&self) -> Status;

    /// Run to completion. Cancelling `cancel` stops the run with
    /// [`MeasureError::Cancelled`]; cancelling again has no further effect.
    fn start(self: Box<Self>, cancel: CancellationToken) -> BoxFuture<'static, Result<MeasurementResult>>;
}

impl<R: Resolver + 'static> Measurement for HttpDownload<R> {
    fn kind(&self) -> MeasurementKind { MeasurementKind::HttpDownload }

    fn status(&self) -> Status { HttpDownload::status(self) }

    fn start(self: Box<Self>, cancel: CancellationToken) -> BoxFuture<'static, Result<MeasurementResult>> {
        Box::pin(async move { self.run(cancel).await.map(MeasurementResult::HttpDownload) })
    }
}

impl<S: DatagramSocket + 'static> Measurement for PacketTrains<S> {
    fn kind(&self) -> MeasurementKind { MeasurementKind::PacketTrains }

    fn status(&self) -> Status { PacketTrains::status(self) }

    fn start(self: Box<Self>, cancel: CancellationToken) -> BoxFuture<'static, Result<MeasurementResult>> {
        Box::pin(async move { self.run(cancel).await.map(MeasurementResult::PacketTrains) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("http-download".parse::<MeasurementKind>().unwrap(), MeasurementKind::HttpDownload);
        assert_eq!("Packet_Trains".parse::<MeasurementKind>().unwrap(), MeasurementKind::PacketTrains);
        assert!("ping".parse::<MeasurementKind>().is_err());
    }

    #[test]
    fn test_kind_names_round_trip_through_display() {
        for kind in MeasurementKind::ALL {
            assert_eq!(kind.to_string().parse::<MeasurementKind>().unwrap(), kind);
        }
    }
}
