use crate::data::WorkerState;

/// Share of the target time every successful worker has to cover.
pub const MIN_COVERAGE: f64 = 0.75;

/// What the trust check needs to know about one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerCoverage {
    pub state:      WorkerState,
    /// Worker start (request sent) in nanoseconds since the run epoch.
    pub started_ns: i64,
    /// Elapsed time of the worker's last sample.
    pub run_time_ns: i64,
}

/// All-or-nothing acceptance of a finished run.
///
/// The run is trusted only if at least one worker finished successfully and
/// every successful worker measured for at least [`MIN_COVERAGE`] of the
/// target time counted from `download_start_ns`. A single short worker
/// rejects the whole run.
pub fn results_trustable(workers: &[WorkerCoverage], download_start_ns: i64, target_time_ms: u64) -> bool {
    let required_ns = target_time_ms as f64 * 1_000_000.0 * MIN_COVERAGE;
    let mut successful = 0usize;

    for worker in workers {
        if worker.state != WorkerState::FinishedSuccess {
            continue;
        }
        successful += 1;

        let covered_ns = worker.run_time_ns - (download_start_ns - worker.started_ns);
        if (covered_ns as f64) < required_ns {
            return false;
        }
    }

    successful > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: i64 = 1_000_000;

    fn worker(state: WorkerState, started_ms: i64, run_time_ms: i64) -> WorkerCoverage {
        WorkerCoverage {
            state,
            started_ns: started_ms * MS,
            run_time_ns: run_time_ms * MS,
        }
    }

    #[test]
    fn test_rejects_sixty_percent_coverage() {
        // Worker started at 0, window opens at 1000ms, target 10s.
        let workers = [worker(WorkerState::FinishedSuccess, 0, 1000 + 6000)];
        assert!(!results_trustable(&workers, 1000 * MS, 10_000));
    }

    #[test]
    fn test_accepts_eighty_percent_coverage() {
        let workers = [worker(WorkerState::FinishedSuccess, 0, 1000 + 8000)];
        assert!(results_trustable(&workers, 1000 * MS, 10_000));
    }

    #[test]
    fn test_exactly_seventy_five_percent_is_enough() {
        let workers = [worker(WorkerState::FinishedSuccess, 0, 7500)];
        assert!(results_trustable(&workers, 0, 10_000));
    }

    #[test]
    fn test_one_short_worker_rejects_the_whole_run() {
        let workers = [
            worker(WorkerState::FinishedSuccess, 0, 10_000),
            worker(WorkerState::FinishedSuccess, 0, 10_000),
            worker(WorkerState::FinishedSuccess, 0, 2_000),
        ];
        assert!(!results_trustable(&workers, 0, 10_000));
    }

    #[test]
    fn test_failed_workers_are_ignored() {
        let workers = [
            worker(WorkerState::FinishedError, 0, 0),
            worker(WorkerState::FinishedSuccess, 0, 9_000),
        ];
        assert!(results_trustable(&workers, 0, 10_000));
    }

    #[test]
    fn test_no_successful_worker_is_untrusted() {
        let workers = [
            worker(WorkerState::FinishedError, 0, 0),
            worker(WorkerState::ConnectedTcp, 0, 0),
        ];
        assert!(!results_trustable(&workers, 0, 10_000));
        assert!(!results_trustable(&[], 0, 10_000));
    }

    #[test]
    fn test_late_starting_worker_gets_credit_for_its_offset() {
        // Window opens at 2000ms. A worker that started at 1500ms needs its
        // own elapsed time to reach 500ms + 7500ms.
        let late = worker(WorkerState::FinishedSuccess, 1500, 8000);
        assert!(results_trustable(&[late], 2000 * MS, 10_000));

        let short = worker(WorkerState::FinishedSuccess, 1500, 7999);
        assert!(!results_trustable(&[short], 2000 * MS, 10_000));
    }
}
