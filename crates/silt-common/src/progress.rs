//! Progress reporting hooks.
//!
//! Long-running operations accept a progress indicator so callers can track
//! them. Indicators are advisory; no component depends on one for
//! correctness.

/// Step-based progress reporting.
pub trait ProgressIndicator {
    /// Announces the total number of steps about to be performed.
    fn init(&mut self, steps: u64);

    /// Marks one step as completed.
    fn step(&mut self);

    /// Marks the operation as finished.
    fn done(&mut self);
}

/// Progress indicator that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressIndicator for SilentProgress {
    fn init(&mut self, _steps: u64) {}

    fn step(&mut self) {}

    fn done(&mut self) {}
}

/// Progress indicator that emits a tracing event every `interval` steps.
#[derive(Debug)]
pub struct LogProgress {
    name: &'static str,
    interval: u64,
    current: u64,
    total: u64,
}

impl LogProgress {
    /// Creates an indicator named `name` that reports every `interval` steps.
    pub fn new(name: &'static str, interval: u64) -> Self {
        Self {
            name,
            interval: interval.max(1),
            current: 0,
            total: 0,
        }
    }
}

impl ProgressIndicator for LogProgress {
    fn init(&mut self, steps: u64) {
        self.current = 0;
        self.total = steps;
        tracing::debug!(name = self.name, steps, "progress started");
    }

    fn step(&mut self) {
        self.current += 1;
        if self.current % self.interval == 0 {
            tracing::debug!(
                name = self.name,
                current = self.current,
                total = self.total,
                "progress"
            );
        }
    }

    fn done(&mut self) {
        tracing::debug!(name = self.name, total = self.total, "progress finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_progress_is_inert() {
        let mut progress = SilentProgress;
        progress.init(10);
        for _ in 0..10 {
            progress.step();
        }
        progress.done();
    }

    #[test]
    fn test_log_progress_counts_steps() {
        let mut progress = LogProgress::new("test", 2);
        progress.init(5);
        for _ in 0..5 {
            progress.step();
        }
        progress.done();
        assert_eq!(progress.current, 5);
        assert_eq!(progress.total, 5);
    }

    #[test]
    fn test_log_progress_zero_interval_clamped() {
        let progress = LogProgress::new("test", 0);
        assert_eq!(progress.interval, 1);
    }
}
