use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::budget::{TrafficBudget, Unlimited};
use crate::core::{TrainBuckets, TrainEvaluation, collect_rates, evaluate_train};
use crate::data::event::StatusCell;
use crate::data::{
    EventSink, MeasurementEvent, MeasurementResult, PacketTrainsDefinition, PacketTrainsResult, Status, TrainRecord,
};
use crate::error::{MeasureError, Result};

/// Largest datagram the probe will read in one go.
const RECV_BUFFER_SIZE: usize = 65_536;

/// Receiving half of a datagram socket.
///
/// The socket is bound and connected by whoever hands it to the probe.
pub trait DatagramSocket: Send {
    fn recv_datagram(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

impl DatagramSocket for UdpSocket {
    async fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize> { self.recv(buf).await }
}

/// Probe lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeState {
    #[default]
    Idle,
    Receiving,
    Evaluating,
    Finished,
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeState::Idle => write!(f, "idle"),
            ProbeState::Receiving => write!(f, "receiving"),
            ProbeState::Evaluating => write!(f, "evaluating"),
            ProbeState::Finished => write!(f, "finished"),
        }
    }
}

/// Timers of the receiving probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimers {
    /// Give up if nothing arrives for this long.
    pub inactivity: Duration,
    /// Evaluate once the line has been silent for this long.
    pub quiet:      Duration,
}

impl Default for ProbeTimers {
    fn default() -> Self {
        Self {
            inactivity: Duration::from_secs(5),
            quiet:      Duration::from_secs(1),
        }
    }
}

/// Receiving side of a packet-train run.
pub struct PacketTrains<S> {
    definition: PacketTrainsDefinition,
    socket:     S,
    timers:     ProbeTimers,
    budget:     Arc<dyn TrafficBudget>,
    events:     EventSink,
    status:     StatusCell,
    state:      watch::Sender<ProbeState>,
}

impl<S: DatagramSocket> PacketTrains<S> {
    pub fn prepare(definition: PacketTrainsDefinition, socket: S) -> Result<Self> {
        definition.validate()?;
        Ok(Self {
            definition,
            socket,
            timers: ProbeTimers::default(),
            budget: Arc::new(Unlimited),
            events: EventSink::disabled(),
            status: StatusCell::default(),
            state: watch::Sender::new(ProbeState::Idle),
        })
    }

    /// The quiet period must be shorter than the inactivity timeout.
    pub fn with_timers(mut self, timers: ProbeTimers) -> Result<Self> {
        if timers.quiet >= timers.inactivity {
            return Err(MeasureError::validation(format!(
                "quiet period {:?} must be shorter than the inactivity timeout {:?}",
                timers.quiet, timers.inactivity
            )));
        }
        self.timers = timers;
        Ok(self)
    }

    #[must_use]
    pub fn with_budget(mut self, budget: Arc<dyn TrafficBudget>) -> Self {
        self.budget = budget;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn definition(&self) -> &PacketTrainsDefinition { &self.definition }

    pub fn state(&self) -> ProbeState { *self.state.borrow() }

    /// Follow the probe through its states while it runs.
    pub fn watch_state(&self) -> watch::Receiver<ProbeState> { self.state.subscribe() }

    pub fn status(&self) -> Status { self.status.get() }

    /// Receive until the line goes quiet, then evaluate every train.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<PacketTrainsResult> {
        let outcome = self.execute(&cancel).await;
        self.enter(ProbeState::Finished);

        match &outcome {
            Ok(result) => {
                info!(trains = result.recv_rates_kbps.len(), "packet trains finished");
                self.status.set(Status::Finished, &self.events);
                self.events
                    .emit(MeasurementEvent::Finished(MeasurementResult::PacketTrains(result.clone())));
            }
            Err(e) => {
                warn!(error = %e, "packet trains failed");
                self.status.set(Status::Error, &self.events);
                self.events.emit(MeasurementEvent::Error(e.to_string()));
            }
        }

        outcome
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> Result<PacketTrainsResult> {
        if self.budget.is_exhausted() {
            return Err(MeasureError::BudgetExhausted {
                available: self.budget.remaining(),
            });
        }

        self.status.set(Status::Running, &self.events);
        self.events.emit(MeasurementEvent::Started);

        let Some(buckets) = self.receive(cancel).await? else {
            warn!(timeout = ?self.timers.inactivity, "no packet arrived, giving up");
            return Ok(PacketTrainsResult::default());
        };

        self.enter(ProbeState::Evaluating);
        Ok(self.evaluate(&buckets))
    }

    fn enter(&self, state: ProbeState) {
        let previous = self.state.send_replace(state);
        debug!(from = %previous, to = %state, "probe state");
    }

    /// Fill the train buckets. `None` if the inactivity timer fired before
    /// any train packet arrived.
    async fn receive(&mut self, cancel: &CancellationToken) -> Result<Option<TrainBuckets>> {
        let mut buckets = TrainBuckets::new(self.definition.iterations);
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut epoch: Option<Instant> = None;
        let mut inactive_at = Instant::now() + self.timers.inactivity;
        let mut quiet_at: Option<Instant> = None;
        let mut bytes_received = 0u64;

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MeasureError::Cancelled),
                _ = tokio::time::sleep_until(inactive_at) => {
                    if buckets.packets_received() > 0 {
                        break;
                    }
                    self.budget.add_used(bytes_received);
                    return Ok(None);
                }
                _ = quiet(quiet_at) => break,
                received = self.socket.recv_datagram(&mut buf) => received,
            };

            let len = match received {
                Ok(len) => len,
                Err(e) if matches!(e.kind(), io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset) => {
                    debug!(error = %e, "peer not reachable yet");
                    continue;
                }
                Err(e) => return Err(MeasureError::Socket(e)),
            };

            let now = Instant::now();
            if epoch.is_none() {
                self.enter(ProbeState::Receiving);
            }
            let epoch = *epoch.get_or_insert(now);
            inactive_at = now + self.timers.inactivity;
            quiet_at = Some(now + self.timers.quiet);
            bytes_received += len as u64;

            let record = match TrainRecord::decode(&buf[..len]) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, len, "dropping datagram");
                    continue;
                }
            };

            let receiver_ns = u64::try_from(now.duration_since(epoch).as_nanos()).unwrap_or(u64::MAX);
            if let Err(out_of_range) = buckets.insert(record, receiver_ns) {
                warn!(
                    iteration = out_of_range.iteration,
                    iterations = out_of_range.iterations,
                    "train index out of range, dropping packet"
                );
            }
        }

        if !self.budget.add_used(bytes_received) {
            warn!(bytes = bytes_received, "run exceeded the traffic budget");
        }
        debug!(packets = buckets.packets_received(), bytes = bytes_received, "line went quiet");
        Ok(Some(buckets))
    }

    fn evaluate(&self, buckets: &TrainBuckets) -> PacketTrainsResult {
        let packet_size = self.definition.packet_size;
        let evaluations = buckets.trains().iter().enumerate().map(|(iteration, train)| {
            let evaluation = evaluate_train(train, packet_size);
            match evaluation {
                TrainEvaluation::Empty => debug!(iteration, "no packets for train"),
                TrainEvaluation::InfiniteRate => {
                    warn!(iteration, packets = train.len(), "train has no usable interval (infinite rate)")
                }
                TrainEvaluation::Rate {
                    send_kbps,
                    recv_kbps,
                    reordered,
                } => {
                    if reordered > 0 {
                        warn!(iteration, reordered, "train arrived out of order");
                    }
                    debug!(iteration, packets = train.len(), send_kbps, recv_kbps, "train evaluated");
                }
            }
            evaluation
        });
        collect_rates(evaluations)
    }
}

async fn quiet(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
