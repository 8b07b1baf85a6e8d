//! Progress reporting (§4.6's "progress is reported after each batch using
//! the elapsed time, completed count, and total count").
//!
//! This is deliberately a thin wrapper around `tracing::info!` rather than a
//! bar-drawing terminal widget: the coordinator runs as a library call as
//! much as from the CLI, and `tracing`'s subscriber (installed once by
//! `config::init_logging`, or by the host application) decides how — or
//! whether — progress events are rendered.

use std::time::Instant;

/// Tracks one operation's batch completions and logs each one.
pub struct ProgressReporter {
    operation: &'static str,
    started_at: Instant,
    total: usize,
    completed: usize,
}

impl ProgressReporter {
    pub fn new(operation: &'static str, total: usize) -> Self {
        tracing::info!(operation, total, "starting");
        ProgressReporter {
            operation,
            started_at: Instant::now(),
            total,
            completed: 0,
        }
    }

    /// Records one more completed batch and logs elapsed/completed/total.
    pub fn record_completion(&mut self) {
        self.completed += 1;
        tracing::info!(
            operation = self.operation,
            completed = self.completed,
            total = self.total,
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "batch completed"
        );
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Logs the no-output-produced case (§7: "empty results are not
    /// errors... a warning is logged").
    pub fn warn_empty_result(&self) {
        tracing::warn!(operation = self.operation, "operation produced no output rows");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_completion_increments_count() {
        let mut reporter = ProgressReporter::new("test_op", 3);
        assert_eq!(reporter.completed(), 0);
        reporter.record_completion();
        reporter.record_completion();
        assert_eq!(reporter.completed(), 2);
        assert_eq!(reporter.total(), 3);
    }
}
