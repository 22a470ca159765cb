use std::fmt;

use tokio::sync::mpsc;

use super::result::MeasurementResult;

/// Coarse lifecycle of a measurement as seen by its orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Unknown,
    Running,
    Finished,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Unknown => write!(f, "Unknown"),
            Status::Running => write!(f, "Running"),
            Status::Finished => write!(f, "Finished"),
            Status::Error => write!(f, "Error"),
        }
    }
}

/// Signals a measurement emits towards its orchestrator.
///
/// A run emits at most one terminal event (`Finished` or `Error`).
#[derive(Debug, Clone, PartialEq)]
pub enum MeasurementEvent {
    StatusChanged(Status),
    Started,
    Finished(MeasurementResult),
    Error(String),
}

impl MeasurementEvent {
    pub fn is_terminal(&self) -> bool { matches!(self, MeasurementEvent::Finished(_) | MeasurementEvent::Error(_)) }
}

/// Outbound event channel. Sends never block and a dropped receiver is
/// ignored.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<MeasurementEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<MeasurementEvent>) -> Self { Self { tx: Some(tx) } }

    /// A sink paired with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MeasurementEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn disabled() -> Self { Self { tx: None } }

    pub fn emit(&self, event: MeasurementEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Tracks the current status and emits `StatusChanged` only on transitions.
#[derive(Debug, Default)]
pub(crate) struct StatusCell {
    current: Status,
}

impl StatusCell {
    pub(crate) fn get(&self) -> Status { self.current }

    pub(crate) fn set(&mut self, status: Status, sink: &EventSink) {
        if self.current != status {
            self.current = status;
            sink.emit(MeasurementEvent::StatusChanged(status));
        }
    }
}
