//! Table of the measurements this binary can run, built once in `main`.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bwmeter_measure::{
    EventSink, HttpDownload, HttpDownloadDefinition, Measurement, MeasurementKind, PacketTrains,
    PacketTrainsDefinition, StaticResolver, TrafficBudget, Unlimited,
};
use futures_util::future::BoxFuture;
use tokio::net::UdpSocket;

/// Everything a constructor may need. Each constructor picks its part.
pub struct MeasurementSetup {
    pub http_download: HttpDownloadDefinition,
    pub packet_trains: PacketTrainsDefinition,
    /// Skip name resolution and download from this address.
    pub address:       Option<SocketAddr>,
    /// Local address of the packet-train probe.
    pub probe_bind:    SocketAddr,
    /// Only accept datagrams from this sender.
    pub probe_peer:    Option<SocketAddr>,
    pub events:        EventSink,
    pub budget:        Arc<dyn TrafficBudget>,
}

impl Default for MeasurementSetup {
    fn default() -> Self {
        Self {
            http_download: HttpDownloadDefinition::default(),
            packet_trains: PacketTrainsDefinition::default(),
            address:       None,
            probe_bind:    SocketAddr::from(([0, 0, 0, 0], 0)),
            probe_peer:    None,
            events:        EventSink::disabled(),
            budget:        Arc::new(Unlimited),
        }
    }
}

type Constructor = Box<dyn Fn(MeasurementSetup) -> BoxFuture<'static, Result<Box<dyn Measurement>>> + Send + Sync>;

struct Entry {
    description: &'static str,
    constructor: Constructor,
}

#[derive(Default)]
pub struct MeasurementRegistry {
    entries: BTreeMap<MeasurementKind, Entry>,
}

impl MeasurementRegistry {
    pub fn new() -> Self { Self::default() }

    /// Registry holding every measurement of the engine.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            MeasurementKind::HttpDownload,
            "multi-connection HTTP download throughput",
            http_download,
        );
        registry.register(
            MeasurementKind::PacketTrains,
            "UDP packet-train dispersion (receiving side)",
            packet_trains,
        );
        registry
    }

    /// Add or replace the constructor of `kind`.
    pub fn register<F, Fut>(&mut self, kind: MeasurementKind, description: &'static str, constructor: F)
    where
        F: Fn(MeasurementSetup) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Box<dyn Measurement>>> + Send + 'static,
    {
        let constructor: Constructor = Box::new(move |setup| Box::pin(constructor(setup)));
        self.entries.insert(kind, Entry { description, constructor });
    }

    pub fn kinds(&self) -> impl Iterator<Item = (MeasurementKind, &'static str)> + '_ {
        self.entries.iter().map(|(kind, entry)| (*kind, entry.description))
    }

    pub async fn create(&self, kind: MeasurementKind, setup: MeasurementSetup) -> Result<Box<dyn Measurement>> {
        let Some(entry) = self.entries.get(&kind) else {
            bail!("no measurement registered for '{kind}'");
        };
        (entry.constructor)(setup).await
    }
}

async fn http_download(setup: MeasurementSetup) -> Result<Box<dyn Measurement>> {
    let download = HttpDownload::prepare(setup.http_download)?
        .with_events(setup.events)
        .with_budget(setup.budget);

    let measurement: Box<dyn Measurement> = match setup.address {
        Some(addr) => Box::new(download.with_resolver(StaticResolver::new([addr]))),
        None => Box::new(download),
    };
    Ok(measurement)
}

async fn packet_trains(setup: MeasurementSetup) -> Result<Box<dyn Measurement>> {
    setup.packet_trains.validate()?;

    let socket = UdpSocket::bind(setup.probe_bind)
        .await
        .with_context(|| format!("failed to bind {}", setup.probe_bind))?;
    if let Some(peer) = setup.probe_peer {
        socket
            .connect(peer)
            .await
            .with_context(|| format!("failed to connect to {peer}"))?;
    }

    let probe = PacketTrains::prepare(setup.packet_trains, socket)?
        .with_events(setup.events)
        .with_budget(setup.budget);
    Ok(Box::new(probe))
}
