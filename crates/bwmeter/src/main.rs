//! bwmeter: run bandwidth measurements from the command line.
//!
//! Results are printed as JSON; progress goes to stderr through `tracing`.

mod cli;
mod config;
mod registry;

use std::path::Path;

use anyhow::{Context, Result};
use bwmeter_measure::{
    EventSink, MeasurementEvent, MeasurementKind, MeasurementResult, PacketTrainSender, TrafficBudget,
};
use clap::Parser;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{App, Commands, TrainSendArgs};
use crate::config::Config;
use crate::registry::{MeasurementRegistry, MeasurementSetup};

#[tokio::main]
async fn main() -> Result<()> {
    let app = App::parse();
    let config = Config::load(app.config.as_deref()).context("failed to load configuration")?;
    init_logging(app.log_level.as_deref().unwrap_or(&config.log.level));

    let registry = MeasurementRegistry::with_builtin();
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping");
                cancel.cancel();
            }
        }
    });

    match &app.cmd {
        Commands::List => {
            for (kind, description) in registry.kinds() {
                println!("{kind:<16}{description}");
            }
            Ok(())
        }
        Commands::HttpDownload(args) => {
            let setup = MeasurementSetup {
                http_download: args.apply(config.http_download.clone()),
                address: args.address,
                ..MeasurementSetup::default()
            };
            let result = run(&registry, MeasurementKind::HttpDownload, setup, &config, cancel).await?;
            report(&result, app.output.as_deref())
        }
        Commands::PacketTrains(args) => {
            let setup = MeasurementSetup {
                packet_trains: args.train.apply(config.packet_trains.clone()),
                probe_bind: args.bind,
                probe_peer: args.peer,
                ..MeasurementSetup::default()
            };
            let result = run(&registry, MeasurementKind::PacketTrains, setup, &config, cancel).await?;
            report(&result, app.output.as_deref())
        }
        Commands::TrainSend(args) => send(args, &config, cancel).await,
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(
    registry: &MeasurementRegistry,
    kind: MeasurementKind,
    mut setup: MeasurementSetup,
    config: &Config,
    cancel: CancellationToken,
) -> Result<MeasurementResult> {
    let (events, mut rx) = EventSink::channel();
    let budget = config.budget.build();
    setup.events = events;
    setup.budget = budget.clone();

    let measurement = registry.create(kind, setup).await?;
    let progress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                MeasurementEvent::StatusChanged(status) => info!(%kind, %status, "status"),
                MeasurementEvent::Started => info!(%kind, "started"),
                MeasurementEvent::Finished(_) => info!(%kind, "finished"),
                MeasurementEvent::Error(message) => warn!(%kind, %message, "failed"),
            }
        }
    });

    let outcome = measurement.start(cancel).await;
    let _ = progress.await;
    log_budget(budget.as_ref());

    outcome.with_context(|| format!("{kind} measurement failed"))
}

async fn send(args: &TrainSendArgs, config: &Config, cancel: CancellationToken) -> Result<()> {
    let definition = args.train.apply(config.packet_trains.clone());
    let sender = PacketTrainSender::new(definition)?;

    let socket = UdpSocket::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    socket
        .connect(args.peer)
        .await
        .with_context(|| format!("failed to connect to {}", args.peer))?;

    let sent = sender.send(&socket, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&sent)?);
    Ok(())
}

fn report(result: &MeasurementResult, output: Option<&Path>) -> Result<()> {
    if let MeasurementResult::HttpDownload(download) = result {
        info!(
            workers = download.actual_num_threads,
            mbps = download.bandwidth_mbps(),
            "http download"
        );
    }

    let json = serde_json::to_string_pretty(result)?;
    match output {
        Some(path) => std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}

fn log_budget(budget: &dyn TrafficBudget) {
    if budget.is_active() {
        info!(remaining = budget.remaining(), "traffic budget");
    }
}
