//! Operation timing.
//!
//! [`MetricsReporter::report`] logs that an operation started and hands back
//! an [`OperationReport`] whose `success` / `fail` log how long it took.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct ReporterState {
    created_at: Instant,
    last_completion: Mutex<Instant>,
}

/// Tracks when it was created and when any operation last completed.
/// Clones share that state.
#[derive(Debug, Clone)]
pub struct MetricsReporter {
    state: Arc<ReporterState>,
}

impl Default for MetricsReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsReporter {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            state: Arc::new(ReporterState {
                created_at: now,
                last_completion: Mutex::new(now),
            }),
        }
    }

    pub fn report(&self, operation: impl Into<String>) -> OperationReport {
        let operation = operation.into();
        debug!("Metric: {operation} - started");
        OperationReport {
            operation,
            state: Arc::clone(&self.state),
        }
    }
}

/// Durations logged when an operation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Since the previous completion of any operation on the reporter.
    pub time_taken: Duration,
    /// Since the reporter was created.
    pub elapsed: Duration,
}

/// Handle for one reported operation.
#[derive(Debug)]
pub struct OperationReport {
    operation: String,
    state: Arc<ReporterState>,
}

impl OperationReport {
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn success(&self) -> Timing {
        self.complete("completed")
    }

    pub fn fail(&self) -> Timing {
        self.complete("failed")
    }

    fn complete(&self, outcome: &str) -> Timing {
        let (now, time_taken) = {
            let mut last = self
                .state
                .last_completion
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let taken = now.saturating_duration_since(*last);
            *last = now;
            (now, taken)
        };
        let timing = Timing {
            time_taken,
            elapsed: now.saturating_duration_since(self.state.created_at),
        };

        debug!(
            "Metric: {} - {outcome} | time taken: {:.2}s | elapsed time: {:.2}s",
            self.operation,
            timing.time_taken.as_secs_f64(),
            timing.elapsed.as_secs_f64(),
        );
        timing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_logs_start_and_completion() {
        let report = MetricsReporter::new().report("load config");
        report.success();
        report.fail();

        assert!(logs_contain("Metric: load config - started"));
        assert!(logs_contain(
            "Metric: load config - completed | time taken: 0.00s | elapsed time: 0.00s"
        ));
        assert!(logs_contain(
            "Metric: load config - failed | time taken: 0.00s | elapsed time: 0.00s"
        ));
    }

    #[test]
    fn test_time_taken_is_measured_from_last_completion() {
        let reporter = MetricsReporter::new();
        let first = reporter.report("first");
        let second = reporter.report("second");

        std::thread::sleep(Duration::from_millis(20));
        let first_timing = first.success();
        let second_timing = second.success();

        assert!(first_timing.time_taken >= Duration::from_millis(20));
        assert!(second_timing.time_taken < first_timing.time_taken);
        assert!(second_timing.elapsed >= first_timing.elapsed);
    }

    #[test]
    fn test_concurrent_reports() {
        let reporter = MetricsReporter::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reporter = reporter.clone();
                std::thread::spawn(move || {
                    let report = reporter.report(format!("op {i}"));
                    if i % 2 == 0 {
                        report.success()
                    } else {
                        report.fail()
                    }
                })
            })
            .collect();

        for handle in handles {
            let timing = handle.join().unwrap();
            assert!(timing.time_taken <= timing.elapsed);
        }
        assert_eq!(reporter.report("after").operation(), "after");
    }
}
