use log::{debug, info};

/// Observer for long-running stages (per image, per row).
///
/// Purely advisory: implementations must not influence results.
pub trait ProgressSink: Sync {
    /// Called once before work starts with the number of units.
    fn begin(&self, _stage: &str, _total: usize) {}

    /// Called after unit `done` (1-based) of `total` finished.
    fn advance(&self, stage: &str, done: usize, total: usize);

    fn finish(&self, _stage: &str) {}
}

/// Discards all progress events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn advance(&self, _stage: &str, _done: usize, _total: usize) {}
}

/// Forwards progress to the `log` facade, at most every `every` units.
#[derive(Clone, Copy, Debug)]
pub struct LogProgress {
    pub every: usize,
}

impl Default for LogProgress {
    fn default() -> Self {
        Self { every: 1 }
    }
}

impl ProgressSink for LogProgress {
    fn begin(&self, stage: &str, total: usize) {
        info!("{stage}: {total} items");
    }

    fn advance(&self, stage: &str, done: usize, total: usize) {
        if done == total || done % self.every.max(1) == 0 {
            debug!("{stage}: {done}/{total}");
        }
    }

    fn finish(&self, stage: &str) {
        debug!("{stage}: done");
    }
}
