use super::rendezvous::Rendezvous;
use crate::error::{MeasureError, Result};

/// Outcome a worker reports to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    Connected { worker: usize, ok: bool },
    FirstByte { worker: usize, ok: bool },
    /// The server closed a connection that was downloading.
    Disconnected { worker: usize },
}

/// What the coordinator has to do after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Wait,
    /// Every handshake is in; start the transfer on these workers.
    BeginTransfer(Vec<usize>),
    /// Every first-byte outcome is in; fix the window start and arm the timer.
    OpenWindow,
    /// Every downloading worker is gone before the timer fired.
    Finalize,
}

/// Counter bookkeeping of one HTTP download run.
///
/// Fed by a single consumer, so the "all connected" and "all downloading"
/// transitions each happen exactly once.
#[derive(Debug, Clone)]
pub struct RunTracker {
    connected:    Rendezvous,
    downloading:  Rendezvous,
    is_connected: Vec<bool>,
    disconnected: usize,
}

impl RunTracker {
    pub fn new(workers: usize) -> Self {
        Self {
            connected:    Rendezvous::new(workers),
            downloading:  Rendezvous::new(workers),
            is_connected: vec![false; workers],
            disconnected: 0,
        }
    }

    pub fn on_event(&mut self, event: WorkerEvent) -> Result<Step> {
        match event {
            WorkerEvent::Connected { worker, ok } => self.on_connected(worker, ok),
            WorkerEvent::FirstByte { ok, .. } => self.on_first_byte(ok),
            WorkerEvent::Disconnected { .. } => {
                self.disconnected += 1;
                Ok(self.finalize_if_all_disconnected())
            }
        }
    }

    /// Workers currently counted as downloading, once the window is open.
    pub fn downloading(&self) -> usize { self.downloading.succeeded() }

    pub fn window_open(&self) -> bool { self.downloading.is_complete() }

    fn on_connected(&mut self, worker: usize, ok: bool) -> Result<Step> {
        if ok && let Some(slot) = self.is_connected.get_mut(worker) {
            *slot = true;
        }

        let Some(outcome) = self.connected.record(ok) else {
            return Ok(Step::Wait);
        };

        if outcome.none_succeeded() {
            return Err(MeasureError::Connection);
        }

        // Unconnected workers never start a transfer; they count as not
        // downloading right away.
        for _ in 0..outcome.failed {
            self.downloading.record(false);
        }

        let ready = self
            .is_connected
            .iter()
            .enumerate()
            .filter_map(|(worker, connected)| connected.then_some(worker))
            .collect();
        Ok(Step::BeginTransfer(ready))
    }

    fn on_first_byte(&mut self, ok: bool) -> Result<Step> {
        let Some(outcome) = self.downloading.record(ok) else {
            return Ok(Step::Wait);
        };

        if outcome.none_succeeded() {
            return Err(MeasureError::Transfer);
        }

        Ok(Step::OpenWindow)
    }

    fn finalize_if_all_disconnected(&self) -> Step {
        if self.all_disconnected() { Step::Finalize } else { Step::Wait }
    }

    /// True once the window is open and every downloading worker was closed
    /// by the server.
    pub fn all_disconnected(&self) -> bool {
        self.window_open() && self.disconnected >= self.downloading.succeeded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(worker: usize, ok: bool) -> WorkerEvent { WorkerEvent::Connected { worker, ok } }

    fn first_byte(worker: usize, ok: bool) -> WorkerEvent { WorkerEvent::FirstByte { worker, ok } }

    #[test]
    fn test_transfer_begins_on_exactly_the_connected_workers() {
        let mut tracker = RunTracker::new(4);
        assert_eq!(tracker.on_event(connected(0, true)).unwrap(), Step::Wait);
        assert_eq!(tracker.on_event(connected(2, false)).unwrap(), Step::Wait);
        assert_eq!(tracker.on_event(connected(1, true)).unwrap(), Step::Wait);
        assert_eq!(
            tracker.on_event(connected(3, true)).unwrap(),
            Step::BeginTransfer(vec![0, 1, 3])
        );
    }

    #[test]
    fn test_no_connection_fails_the_run() {
        let mut tracker = RunTracker::new(2);
        tracker.on_event(connected(0, false)).unwrap();
        let err = tracker.on_event(connected(1, false)).unwrap_err();
        assert!(matches!(err, MeasureError::Connection));
    }

    #[test]
    fn test_window_opens_once_connected_workers_report() {
        let mut tracker = RunTracker::new(3);
        tracker.on_event(connected(0, true)).unwrap();
        tracker.on_event(connected(1, false)).unwrap();
        tracker.on_event(connected(2, true)).unwrap();

        // Worker 1 was already counted as not downloading.
        assert_eq!(tracker.on_event(first_byte(0, true)).unwrap(), Step::Wait);
        assert_eq!(tracker.on_event(first_byte(2, false)).unwrap(), Step::OpenWindow);
        assert!(tracker.window_open());
        assert_eq!(tracker.downloading(), 1);
    }

    #[test]
    fn test_no_first_byte_fails_the_run() {
        let mut tracker = RunTracker::new(2);
        tracker.on_event(connected(0, true)).unwrap();
        tracker.on_event(connected(1, false)).unwrap();
        let err = tracker.on_event(first_byte(0, false)).unwrap_err();
        assert!(matches!(err, MeasureError::Transfer));
    }

    #[test]
    fn test_finalize_after_every_downloader_disconnects() {
        let mut tracker = RunTracker::new(2);
        tracker.on_event(connected(0, true)).unwrap();
        tracker.on_event(connected(1, true)).unwrap();
        tracker.on_event(first_byte(0, true)).unwrap();
        tracker.on_event(first_byte(1, true)).unwrap();

        assert_eq!(
            tracker.on_event(WorkerEvent::Disconnected { worker: 1 }).unwrap(),
            Step::Wait
        );
        assert_eq!(
            tracker.on_event(WorkerEvent::Disconnected { worker: 0 }).unwrap(),
            Step::Finalize
        );
    }

    #[test]
    fn test_early_disconnect_before_window_is_remembered() {
        let mut tracker = RunTracker::new(2);
        tracker.on_event(connected(0, true)).unwrap();
        tracker.on_event(connected(1, false)).unwrap();
        // Worker 1 was pre-counted, so the first byte of worker 0 opens the window.
        assert_eq!(tracker.on_event(first_byte(0, true)).unwrap(), Step::OpenWindow);
        assert!(!tracker.all_disconnected());
        assert_eq!(
            tracker.on_event(WorkerEvent::Disconnected { worker: 0 }).unwrap(),
            Step::Finalize
        );
    }
}
