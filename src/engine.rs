use std::future::Future;
use tokio::time::{Duration, Interval, MissedTickBehavior, interval};
use tracing::debug;

/// A cache that can be re-fetched from an external source and compared by
/// value against an earlier copy of itself.
pub trait PolledCache {
    type Snapshot: PartialEq;

    /// Deep, independent copy of the current state.
    fn snapshot(&self) -> Self::Snapshot;

    /// Re-fetch from the external collaborator. Must not fail: unavailable
    /// data is represented in the snapshot, not reported as an error.
    fn refresh(&mut self) -> impl Future<Output = ()>;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TickOutcome {
    Unchanged,
    Rebuilt,
}

/// Fetch, compare, and rebuild only when the snapshot moved or a rebuild was
/// requested explicitly.
#[derive(Debug)]
pub struct PollingDiffEngine {
    name: &'static str,
    period: Duration,
    force: bool,
    ticks: u64,
    rebuilds: u64,
}

impl PollingDiffEngine {
    /// The first tick always rebuilds.
    pub fn new(name: &'static str, period: Duration) -> Self {
        Self {
            name,
            period,
            force: true,
            ticks: 0,
            rebuilds: 0,
        }
    }

    pub fn ticker(&self) -> Interval {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    pub fn request_rebuild(&mut self) {
        self.force = true;
    }

    #[cfg(test)]
    pub fn rebuild_pending(&self) -> bool {
        self.force
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub async fn tick<C, F>(&mut self, cache: &mut C, rebuild: F) -> TickOutcome
    where
        C: PolledCache,
        F: FnOnce(&C),
    {
        self.ticks += 1;
        let before = cache.snapshot();
        cache.refresh().await;
        let changed = before != cache.snapshot();
        if !changed && !self.force {
            return TickOutcome::Unchanged;
        }

        debug!(
            "{} rebuild (changed={changed}, forced={})",
            self.name, self.force
        );
        self.force = false;
        self.rebuilds += 1;
        rebuild(cache);
        TickOutcome::Rebuilt
    }
}
