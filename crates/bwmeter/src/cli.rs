use std::net::SocketAddr;
use std::path::PathBuf;

use bwmeter_measure::{HttpDownloadDefinition, PacketTrainsDefinition};
use clap::{Args, Parser, Subcommand};

#[derive(Clone, Debug, Parser)]
#[command(name = "bwmeter", version = env!("CARGO_PKG_VERSION"), about, long_about = None, propagate_version = true)]
pub struct App {
    /// Config file [default: ~/.config/bwmeter/config.toml]
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `bwmeter_measure=trace`
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Write the JSON result to this file instead of stdout
    #[arg(long, short, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    /// Measure download throughput over several parallel connections
    #[command(alias = "http", name = "http-download")]
    HttpDownload(HttpDownloadArgs),
    /// Receive packet trains and report per-train rates
    #[command(alias = "trains", name = "packet-trains")]
    PacketTrains(PacketTrainsArgs),
    /// Send packet trains to a receiving probe
    #[command(alias = "send", name = "train-send")]
    TrainSend(TrainSendArgs),
    /// List the available measurements
    #[command(alias = "ls", name = "list")]
    List,
}

#[derive(Clone, Debug, Args)]
pub struct HttpDownloadArgs {
    /// Object to download; `host/path` means `http://host/path`
    pub url: Option<String>,

    #[arg(long, short)]
    pub threads: Option<u32>,

    #[arg(long)]
    pub ramp_up_ms: Option<u64>,

    #[arg(long)]
    pub target_time_ms: Option<u64>,

    #[arg(long)]
    pub slot_length_ms: Option<u64>,

    /// Add a timestamp query parameter to every request
    #[arg(long)]
    pub avoid_caches: bool,

    /// Connect to this address instead of resolving the URL host
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

impl HttpDownloadArgs {
    /// Flags given on the command line override `base`.
    pub fn apply(&self, mut base: HttpDownloadDefinition) -> HttpDownloadDefinition {
        if let Some(url) = &self.url {
            base.url = url.clone();
        }
        if let Some(threads) = self.threads {
            base.threads = threads;
        }
        if let Some(ramp_up_ms) = self.ramp_up_ms {
            base.ramp_up_ms = ramp_up_ms;
        }
        if let Some(target_time_ms) = self.target_time_ms {
            base.target_time_ms = target_time_ms;
        }
        if let Some(slot_length_ms) = self.slot_length_ms {
            base.slot_length_ms = slot_length_ms;
        }
        base.avoid_caches |= self.avoid_caches;
        base
    }
}

/// Train shape shared by both sides.
#[derive(Clone, Debug, Args)]
pub struct TrainArgs {
    #[arg(long)]
    pub iterations: Option<u16>,

    #[arg(long)]
    pub train_length: Option<u16>,

    #[arg(long)]
    pub packet_size: Option<usize>,

    #[arg(long)]
    pub train_gap_ms: Option<u64>,
}

impl TrainArgs {
    pub fn apply(&self, mut base: PacketTrainsDefinition) -> PacketTrainsDefinition {
        if let Some(iterations) = self.iterations {
            base.iterations = iterations;
        }
        if let Some(train_length) = self.train_length {
            base.train_length = train_length;
        }
        if let Some(packet_size) = self.packet_size {
            base.packet_size = packet_size;
        }
        if let Some(train_gap_ms) = self.train_gap_ms {
            base.train_gap_ms = train_gap_ms;
        }
        base
    }
}

#[derive(Clone, Debug, Args)]
pub struct PacketTrainsArgs {
    /// Local address to receive on
    #[arg(long, default_value = "0.0.0.0:5202")]
    pub bind: SocketAddr,

    /// Only accept trains from this sender
    #[arg(long)]
    pub peer: Option<SocketAddr>,

    #[command(flatten)]
    pub train: TrainArgs,
}

#[derive(Clone, Debug, Args)]
pub struct TrainSendArgs {
    /// Address of the receiving probe
    pub peer: SocketAddr,

    #[arg(long, default_value = "0.0.0.0:0")]
    pub bind: SocketAddr,

    #[command(flatten)]
    pub train: TrainArgs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_download_flags_override_config() {
        let app = App::try_parse_from([
            "bwmeter",
            "http-download",
            "speed.example.net/1GB.bin",
            "--threads",
            "8",
            "--avoid-caches",
        ])
        .unwrap();
        let Commands::HttpDownload(args) = app.cmd else {
            panic!("expected http-download");
        };

        let base = HttpDownloadDefinition::new("http://configured/").target_time_ms(5_000);
        let definition = args.apply(base);
        assert_eq!(definition.url, "speed.example.net/1GB.bin");
        assert_eq!(definition.threads, 8);
        assert_eq!(definition.target_time_ms, 5_000);
        assert!(definition.avoid_caches);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let app = App::try_parse_from(["bwmeter", "list", "--log-level", "debug"]).unwrap();
        assert_eq!(app.log_level.as_deref(), Some("debug"));
        assert!(matches!(app.cmd, Commands::List));
    }

    #[test]
    fn test_train_send_requires_a_peer() {
        assert!(App::try_parse_from(["bwmeter", "train-send"]).is_err());

        let app = App::try_parse_from(["bwmeter", "send", "127.0.0.1:5202", "--packet-size", "500"]).unwrap();
        let Commands::TrainSend(args) = app.cmd else {
            panic!("expected train-send");
        };
        assert_eq!(args.peer, "127.0.0.1:5202".parse().unwrap());
        assert_eq!(args.train.apply(PacketTrainsDefinition::default()).packet_size, 500);
    }
}
