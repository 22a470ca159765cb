/// Tally handed out when a [`Rendezvous`] completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendezvousOutcome {
    pub succeeded: usize,
    pub failed:    usize,
}

impl RendezvousOutcome {
    pub fn none_succeeded(&self) -> bool { self.succeeded == 0 }
}

/// Count-down latch over a fixed number of success/failure reports.
///
/// [`record`](Rendezvous::record) returns the outcome exactly once, on the
/// report that brings the total to `expected`. Reports after that are
/// ignored.
///
/// ```
/// use bwmeter_measure::core::Rendezvous;
///
/// let mut connected = Rendezvous::new(2);
/// assert!(connected.record(true).is_none());
/// let outcome = connected.record(false).unwrap();
/// assert_eq!((outcome.succeeded, outcome.failed), (1, 1));
/// assert!(connected.record(true).is_none());
/// ```
#[derive(Debug, Clone)]
pub struct Rendezvous {
    expected:  usize,
    succeeded: usize,
    failed:    usize,
    fired:     bool,
}

impl Rendezvous {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            succeeded: 0,
            failed: 0,
            fired: false,
        }
    }

    pub fn record(&mut self, success: bool) -> Option<RendezvousOutcome> {
        if self.fired {
            return None;
        }

        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }

        if self.succeeded + self.failed == self.expected {
            self.fired = true;
            return Some(self.outcome());
        }

        None
    }

    pub fn succeeded(&self) -> usize { self.succeeded }

    pub fn failed(&self) -> usize { self.failed }

    pub fn is_complete(&self) -> bool { self.fired }

    fn outcome(&self) -> RendezvousOutcome {
        RendezvousOutcome {
            succeeded: self.succeeded,
            failed:    self.failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_on_last_report() {
        let mut latch = Rendezvous::new(4);
        assert!(latch.record(true).is_none());
        assert!(latch.record(true).is_none());
        assert!(latch.record(false).is_none());
        assert!(!latch.is_complete());

        let outcome = latch.record(true).unwrap();
        assert_eq!(outcome, RendezvousOutcome { succeeded: 3, failed: 1 });
        assert!(latch.is_complete());
    }

    #[test]
    fn test_late_reports_do_not_refire() {
        let mut latch = Rendezvous::new(1);
        assert!(latch.record(false).is_some());
        assert!(latch.record(true).is_none());
        assert!(latch.record(false).is_none());
        assert_eq!(latch.succeeded(), 0);
        assert_eq!(latch.failed(), 1);
    }

    #[test]
    fn test_all_failed() {
        let mut latch = Rendezvous::new(2);
        latch.record(false);
        let outcome = latch.record(false).unwrap();
        assert!(outcome.none_succeeded());
    }

    #[test]
    fn test_order_of_reports_does_not_matter() {
        for pattern in [[true, false, false], [false, true, false], [false, false, true]] {
            let mut latch = Rendezvous::new(3);
            let fired: Vec<_> = pattern.iter().filter_map(|ok| latch.record(*ok)).collect();
            assert_eq!(fired, vec![RendezvousOutcome { succeeded: 1, failed: 2 }]);
        }
    }
}
