//! Effectful edge of the engine: sockets, timers and tasks.
//!
//! Everything that touches the network or the clock lives here and talks to
//! the pure core through plain values. Seams that tests and embedders replace
//! are traits: [`Resolver`], [`DatagramSocket`] and [`TrafficBudget`].

mod budget;
mod http_download;
mod measurement;
mod packet_trains;
mod resolver;
mod sender;
mod worker;

pub use budget::{TrafficBudget, TrafficBudgetManager, Unlimited};
pub use http_download::HttpDownload;
pub use measurement::{Measurement, MeasurementKind};
pub use packet_trains::{DatagramSocket, PacketTrains, ProbeState, ProbeTimers};
pub use resolver::{Resolver, StaticResolver, TokioResolver};
pub use sender::{PacketTrainSender, SendReport};
pub use worker::{REFERER, TimedSocketWorker, Timeouts, USER_AGENT, WorkerReport, build_request};
