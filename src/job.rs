use core::{future::Future, time::Duration};
use std::collections::BTreeMap;

use anyhow::Error;

/// Load item producer.
///
/// A producer is owned by the caller, borrowed by the runner for the whole
/// run and must be safe to call from many jobs concurrently.
pub trait JobProducer: Send + Sync + 'static {
    /// Executes the i-th attempt and returns its measured latency.
    fn job(&self, idx: usize) -> impl Future<Output = Result<Duration, Error>> + Send;

    /// Returns request counts grouped by producer-defined category.
    ///
    /// The labels `"tot"` and `"err"` are reserved by the runner and must
    /// not be used.
    fn request_counts(&self) -> BTreeMap<String, u64>;

    /// Returns additional named metric groups reproduced in the final
    /// report.
    fn metrics(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        BTreeMap::new()
    }

    /// Returns a free-form block appended to the final report.
    fn summary(&self) -> Option<String> {
        None
    }
}
