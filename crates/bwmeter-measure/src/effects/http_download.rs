use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::budget::{TrafficBudget, Unlimited};
use super::resolver::{Resolver, TokioResolver};
use super::worker::{TimedSocketWorker, Timeouts, WorkerCommand, WorkerReport};
use crate::core::{
    RunTracker, Step, WorkerCoverage, WorkerEvent, average_throughput, results_trustable, time_slices, total_bytes,
};
use crate::data::event::StatusCell;
use crate::data::{
    DownloadResult, EventSink, HttpDownloadDefinition, HttpTarget, MeasurementEvent, MeasurementResult, Status,
    WorkerState,
};
use crate::error::{MeasureError, Result};

const NANOS_PER_MILLI: i64 = 1_000_000;

/// Multi-worker HTTP download throughput measurement.
///
/// Every worker opens its own connection to the same resolved address. The
/// transfer starts only once every handshake has an outcome, the window opens
/// `ramp_up_ms` after every first-byte outcome is in, and the run finalizes
/// when the window has lasted `target_time_ms` or every downloading worker
/// was closed by the server.
///
/// # Examples
///
/// ```no_run
/// use bwmeter_measure::{EventSink, HttpDownload, HttpDownloadDefinition};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> bwmeter_measure::Result<()> {
/// let (sink, _events) = EventSink::channel();
/// let download = HttpDownload::prepare(HttpDownloadDefinition::new("speed.example.net/10MB.bin"))?
///     .with_events(sink);
/// let result = download.run(CancellationToken::new()).await?;
/// println!("{:.2} Mbit/s", result.bandwidth_mbps());
/// # Ok(())
/// # }
/// ```
pub struct HttpDownload<R = TokioResolver> {
    definition: HttpDownloadDefinition,
    target:     Arc<HttpTarget>,
    resolver:   R,
    timeouts:   Timeouts,
    budget:     Arc<dyn TrafficBudget>,
    events:     EventSink,
    status:     StatusCell,
}

impl HttpDownload<TokioResolver> {
    /// Validate `definition`. Nothing touches the network before this passes.
    pub fn prepare(definition: HttpDownloadDefinition) -> Result<Self> {
        let target = definition.validate()?;
        Ok(Self {
            definition,
            target: Arc::new(target),
            resolver: TokioResolver,
            timeouts: Timeouts::default(),
            budget: Arc::new(Unlimited),
            events: EventSink::disabled(),
            status: StatusCell::default(),
        })
    }
}

impl<R: Resolver> HttpDownload<R> {
    #[must_use]
    pub fn with_resolver<T: Resolver>(self, resolver: T) -> HttpDownload<T> {
        HttpDownload {
            definition: self.definition,
            target: self.target,
            resolver,
            timeouts: self.timeouts,
            budget: self.budget,
            events: self.events,
            status: self.status,
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn with_budget(mut self, budget: Arc<dyn TrafficBudget>) -> Self {
        self.budget = budget;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn definition(&self) -> &HttpDownloadDefinition { &self.definition }

    pub fn status(&self) -> Status { self.status.get() }

    /// Run the measurement to completion or until `cancel` fires.
    ///
    /// Exactly one terminal event is emitted, matching the returned value.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<DownloadResult> {
        let outcome = self.execute(&cancel).await;

        match &outcome {
            Ok(result) => {
                info!(
                    workers = result.actual_num_threads,
                    mbps = result.bandwidth_mbps(),
                    "http download finished"
                );
                self.status.set(Status::Finished, &self.events);
                self.events
                    .emit(MeasurementEvent::Finished(MeasurementResult::HttpDownload(result.clone())));
            }
            Err(e) => {
                warn!(error = %e, "http download failed");
                self.status.set(Status::Error, &self.events);
                self.events.emit(MeasurementEvent::Error(e.to_string()));
            }
        }

        outcome
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> Result<DownloadResult> {
        if self.budget.is_exhausted() {
            return Err(MeasureError::BudgetExhausted {
                available: self.budget.remaining(),
            });
        }

        self.status.set(Status::Running, &self.events);
        self.events.emit(MeasurementEvent::Started);

        let addr = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MeasureError::Cancelled),
            addr = self.resolve() => addr?,
        };

        let epoch = Instant::now();
        let mut run = Run::spawn(addr, &self.target, self.definition.avoid_caches, self.timeouts, self.definition.threads as usize);
        let window = run
            .drive(
                cancel,
                Duration::from_millis(self.definition.ramp_up_ms),
                Duration::from_millis(self.definition.target_time_ms),
            )
            .await;
        let reports = run.shutdown().await;

        self.charge(&reports);
        let download_start = window?;
        self.reduce(&reports, epoch, download_start)
    }

    async fn resolve(&self) -> Result<SocketAddr> {
        let host = &self.target.host;
        let addrs = self
            .resolver
            .resolve(host, self.target.port)
            .await
            .map_err(|source| MeasureError::Resolution {
                host: host.clone(),
                source,
            })?;

        let addr = addrs.into_iter().next().ok_or_else(|| MeasureError::Resolution {
            host:   host.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
        })?;
        debug!(host = %host, addr = %addr, "resolved");
        Ok(addr)
    }

    fn charge(&self, reports: &[WorkerReport]) {
        let bytes: u64 = reports.iter().map(|r| total_bytes(&r.samples)).sum();
        if !self.budget.add_used(bytes) {
            warn!(bytes, remaining = self.budget.remaining(), "run exceeded the traffic budget");
        }
    }

    fn reduce(&self, reports: &[WorkerReport], epoch: Instant, download_start: Instant) -> Result<DownloadResult> {
        let download_start_ns = nanos_since(epoch, download_start);
        let coverage: Vec<WorkerCoverage> = reports
            .iter()
            .map(|report| WorkerCoverage {
                state:       report.state,
                started_ns:  report.started.map_or(0, |started| nanos_since(epoch, started)),
                run_time_ns: report.samples.last().map_or(0, |s| s.elapsed_ns),
            })
            .collect();

        if !results_trustable(&coverage, download_start_ns, self.definition.target_time_ms) {
            return Err(MeasureError::Untrustworthy);
        }

        let target_ns = self.definition.target_time_ms as i64 * NANOS_PER_MILLI;
        let mut bps_per_thread = Vec::new();
        let mut bps_slots_per_thread = Vec::new();

        for (report, worker) in reports.iter().zip(&coverage) {
            if report.state != WorkerState::FinishedSuccess {
                continue;
            }
            let window_start = download_start_ns - worker.started_ns;
            bps_per_thread.push(average_throughput(&report.samples, window_start, window_start + target_ns));
            bps_slots_per_thread.push(time_slices(&report.samples, self.definition.slot_length_ms));
        }

        Ok(DownloadResult {
            actual_num_threads: bps_per_thread.len(),
            bandwidth_bps: bps_per_thread.iter().sum(),
            bps_per_thread,
            bps_slots_per_thread,
        })
    }
}

struct WorkerHandle {
    commands: mpsc::Sender<WorkerCommand>,
    task:     JoinHandle<WorkerReport>,
}

/// Worker tasks of one run plus the bookkeeping that drives them.
struct Run {
    workers:   Vec<WorkerHandle>,
    events:    mpsc::UnboundedReceiver<WorkerEvent>,
    tracker:   RunTracker,
    completed: bool,
}

impl Run {
    fn spawn(addr: SocketAddr, target: &Arc<HttpTarget>, avoid_caches: bool, timeouts: Timeouts, threads: usize) -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        let workers = (0..threads)
            .map(|id| {
                let (commands, command_rx) = mpsc::channel(4);
                let worker = TimedSocketWorker::new(id, addr, Arc::clone(target), avoid_caches, timeouts);
                WorkerHandle {
                    commands,
                    task: tokio::spawn(worker.run(command_rx, event_tx.clone())),
                }
            })
            .collect();

        Self {
            workers,
            events,
            tracker: RunTracker::new(threads),
            completed: false,
        }
    }

    fn send(&self, id: usize, command: WorkerCommand) {
        if let Some(worker) = self.workers.get(id) {
            // The channel never holds more than the three commands of a run.
            let _ = worker.commands.try_send(command);
        }
    }

    /// Drive the run until it can be finalized. Returns the window start.
    async fn drive(&mut self, cancel: &CancellationToken, ramp_up: Duration, target: Duration) -> Result<Instant> {
        for id in 0..self.workers.len() {
            self.send(id, WorkerCommand::Connect);
        }

        let mut window: Option<(Instant, Instant)> = None;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MeasureError::Cancelled),
                _ = deadline(window.map(|(_, end)| end)) => {
                    debug!("measurement window elapsed");
                    return window_start(window);
                }
                event = self.events.recv() => event,
            };

            let Some(event) = event else {
                // Every worker task is gone.
                return window_start(window);
            };

            match self.tracker.on_event(event)? {
                Step::Wait => {}
                Step::BeginTransfer(ready) => {
                    info!(connected = ready.len(), workers = self.workers.len(), "starting transfer");
                    for id in ready {
                        self.send(id, WorkerCommand::BeginTransfer);
                    }
                }
                Step::OpenWindow => {
                    let start = Instant::now() + ramp_up;
                    window = Some((start, start + target));
                    info!(downloading = self.tracker.downloading(), ramp_up = ?ramp_up, "measurement window armed");
                    if self.tracker.all_disconnected() {
                        return Ok(start);
                    }
                }
                Step::Finalize => {
                    debug!("every downloading worker disconnected");
                    return window_start(window);
                }
            }
        }
    }

    /// Stop every worker and wait for all of them. Only the first call
    /// collects reports.
    async fn shutdown(&mut self) -> Vec<WorkerReport> {
        if std::mem::replace(&mut self.completed, true) {
            return Vec::new();
        }

        for id in 0..self.workers.len() {
            self.send(id, WorkerCommand::Stop);
        }

        let mut reports = Vec::with_capacity(self.workers.len());
        for worker in self.workers.drain(..) {
            match worker.task.await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(error = %e, "worker task failed"),
            }
        }
        reports
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn window_start(window: Option<(Instant, Instant)>) -> Result<Instant> {
    window.map(|(start, _)| start).ok_or(MeasureError::Transfer)
}

fn nanos_since(epoch: Instant, at: Instant) -> i64 {
    i64::try_from(at.saturating_duration_since(epoch).as_nanos()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Sample;
    use crate::effects::budget::TrafficBudgetManager;

    fn download(url: &str) -> HttpDownload {
        HttpDownload::prepare(HttpDownloadDefinition::new(url).target_time_ms(1_000).slot_length_ms(100)).unwrap()
    }

    fn report(state: WorkerState, started: Instant, samples: Vec<Sample>) -> WorkerReport {
        WorkerReport {
            id: 0,
            state,
            started: Some(started),
            time_to_first_byte: None,
            samples,
        }
    }

    #[test]
    fn test_prepare_rejects_bad_definitions() {
        let err = HttpDownload::prepare(HttpDownloadDefinition::new("http://example.com/").threads(0)).err();
        assert!(matches!(err, Some(MeasureError::Validation(_))));
    }

    #[tokio::test]
    async fn test_reduce_sums_successful_workers() {
        let epoch = Instant::now();
        let samples: Vec<Sample> = (0..=10).map(|i| Sample::from_millis(i * 100, 1000)).collect();
        let reports = [
            report(WorkerState::FinishedSuccess, epoch, samples.clone()),
            report(WorkerState::FinishedError, epoch, Vec::new()),
            report(WorkerState::FinishedSuccess, epoch, samples),
        ];

        let result = download("http://example.com/").reduce(&reports, epoch, epoch).unwrap();
        assert_eq!(result.actual_num_threads, 2);
        // 11 samples of 1000 bytes over 1s.
        assert_eq!(result.bps_per_thread, vec![88_000.0, 88_000.0]);
        assert_eq!(result.bandwidth_bps, 176_000.0);
        assert_eq!(result.bps_slots_per_thread.len(), 2);
    }

    #[tokio::test]
    async fn test_reduce_rejects_short_coverage() {
        let epoch = Instant::now();
        let samples: Vec<Sample> = (0..=6).map(|i| Sample::from_millis(i * 100, 1000)).collect();
        let reports = [report(WorkerState::FinishedSuccess, epoch, samples)];

        let err = download("http://example.com/").reduce(&reports, epoch, epoch).unwrap_err();
        assert!(matches!(err, MeasureError::Untrustworthy));
    }

    #[tokio::test]
    async fn test_exhausted_budget_refuses_the_run() {
        let budget = Arc::new(TrafficBudgetManager::new(10).with_used(10));
        let (sink, mut events) = EventSink::channel();
        let err = download("http://127.0.0.1:9/")
            .with_budget(budget)
            .with_events(sink)
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, MeasureError::BudgetExhausted { .. }));
        assert_eq!(events.recv().await, Some(MeasurementEvent::StatusChanged(Status::Error)));
        assert!(matches!(events.recv().await, Some(MeasurementEvent::Error(_))));
    }
}
