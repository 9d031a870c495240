use std::sync::Arc;

use tokio::runtime::Handle;

use crate::{shaper::Shaper, stat::RunStat};

/// Upper bound of the concurrency window, matching the fixed capacity of the
/// slot reservoir.
pub const MAX_CONCURRENCY: u64 = 1000;

/// Live control surface over the concurrency and rate limits.
///
/// Driven by the dashboard's key events; every adjustment is ±5% of the
/// current value, at least one unit.
#[derive(Debug)]
pub struct Limits {
    stat: Arc<RunStat>,
    runtime: Handle,
}

fn step(limit: u64) -> u64 {
    ((0.05 * limit as f64) as u64).max(1)
}

impl Limits {
    pub fn new(stat: Arc<RunStat>, runtime: Handle) -> Self {
        Self { stat, runtime }
    }

    /// Widens the in-flight window by releasing extra slots.
    pub fn increase_concurrency(&self) {
        let lim = self.stat.concurrency_limit();
        let delta = step(lim);

        if lim + delta <= MAX_CONCURRENCY {
            self.stat.raise_concurrency_limit(delta);
            self.stat.semaphore().add_permits(delta as usize);
        }
    }

    /// Narrows the in-flight window by withdrawing slots.
    ///
    /// Blocks until the withdrawn slots are actually free, exactly like a
    /// dispatch waiting for a slot does.
    pub fn decrease_concurrency(&self) {
        let lim = self.stat.concurrency_limit();
        let delta = step(lim);

        if lim - delta > 0 {
            self.stat.lower_concurrency_limit(delta);

            let semaphore = self.stat.semaphore().clone();
            self.runtime
                .block_on(semaphore.acquire_many_owned(delta as u32))
                .expect("semaphore closed")
                .forget();
        }
    }

    /// Returns the base for rate adjustments: the explicit limit, or the
    /// observed request rate when no limit is set.
    fn rate_base(&self) -> u64 {
        let lim = self.stat.rate_limit();
        if lim == 0 {
            return self.stat.current_req_rate();
        }

        lim
    }

    pub fn increase_rate(&self) {
        let base = self.rate_base();
        self.apply_rate(base + step(base));
    }

    pub fn decrease_rate(&self) {
        let base = self.rate_base();
        self.apply_rate(base.saturating_sub(step(base)));
    }

    fn apply_rate(&self, limit: u64) {
        self.stat.set_rate_limit(limit);

        // Zero means unlimited; waiters on the replaced shaper run to
        // completion.
        let shaper = (limit > 0).then(|| Arc::new(Shaper::new(limit)));
        self.stat.set_shaper(shaper);
    }
}
