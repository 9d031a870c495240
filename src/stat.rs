use core::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};
use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use anyhow::Error;
use tokio::sync::{Notify, Semaphore};

use crate::{histogram, histogram::Collector, shaper::Shaper};

/// Shared state of a single run.
///
/// The runner, the control surface and the dashboard all hold a reference to
/// the same instance. Knobs are plain atomics; the shaper handle and the
/// last observed error share one mutex because both are read and written by
/// the control surface and the driver.
#[derive(Debug)]
pub struct RunStat {
    start: Instant,
    concurrency_limit: AtomicU64,
    rate_limit: AtomicU64,
    current_req_rate: AtomicU64,
    err_cnt: AtomicU64,
    slow: AtomicU64,
    done: AtomicBool,
    done_notify: Notify,
    semaphore: Arc<Semaphore>,
    shared: Mutex<Shared>,

    round_trip_hist: Collector,
    round_trip_rolling: Collector,
    round_trip_precise: Collector,
}

#[derive(Debug, Default)]
struct Shared {
    shaper: Option<Arc<Shaper>>,
    last_err: Option<Error>,
}

impl RunStat {
    pub fn new(concurrency: u64, rate_limit: u64) -> Self {
        let shared = Shared {
            shaper: (rate_limit > 0).then(|| Arc::new(Shaper::new(rate_limit))),
            last_err: None,
        };

        Self {
            start: Instant::now(),
            concurrency_limit: AtomicU64::new(concurrency),
            rate_limit: AtomicU64::new(rate_limit),
            current_req_rate: AtomicU64::new(0),
            err_cnt: AtomicU64::new(0),
            slow: AtomicU64::new(0),
            done: AtomicBool::new(false),
            done_notify: Notify::new(),
            semaphore: Arc::new(Semaphore::new(concurrency as usize)),
            shared: Mutex::new(shared),
            round_trip_hist: Collector::new(10, histogram::latency_width),
            round_trip_rolling: Collector::new(5, histogram::latency_width),
            round_trip_precise: Collector::new(100, histogram::latency_width),
        }
    }

    /// Records a completed job.
    ///
    /// Should be called with the job's round trip time after each success.
    pub fn on_round_trip(&self, elapsed: Duration, slow_response: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;

        if elapsed >= slow_response {
            self.slow.fetch_add(1, Ordering::SeqCst);
        }

        self.round_trip_hist.add(ms);
        self.round_trip_precise.add(ms);
        self.round_trip_rolling.add(ms);
    }

    /// Records a failed job.
    pub fn on_err(&self, err: Error) {
        self.err_cnt.fetch_add(1, Ordering::SeqCst);
        self.set_last_err(err);
    }

    pub fn set_last_err(&self, err: Error) {
        self.shared.lock().unwrap().last_err = Some(err);
    }

    pub fn last_err_text(&self) -> Option<String> {
        self.shared.lock().unwrap().last_err.as_ref().map(|e| e.to_string())
    }

    pub fn take_last_err(&self) -> Option<Error> {
        self.shared.lock().unwrap().last_err.take()
    }

    #[inline]
    pub fn shaper(&self) -> Option<Arc<Shaper>> {
        self.shared.lock().unwrap().shaper.clone()
    }

    pub fn set_shaper(&self, shaper: Option<Arc<Shaper>>) {
        self.shared.lock().unwrap().shaper = shaper;
    }

    #[inline]
    pub fn concurrency_limit(&self) -> u64 {
        self.concurrency_limit.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn raise_concurrency_limit(&self, delta: u64) {
        self.concurrency_limit.fetch_add(delta, Ordering::SeqCst);
    }

    #[inline]
    pub fn lower_concurrency_limit(&self, delta: u64) {
        self.concurrency_limit.fetch_sub(delta, Ordering::SeqCst);
    }

    #[inline]
    pub fn rate_limit(&self) -> u64 {
        self.rate_limit.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn set_rate_limit(&self, v: u64) {
        self.rate_limit.store(v, Ordering::SeqCst);
    }

    #[inline]
    pub fn current_req_rate(&self) -> u64 {
        self.current_req_rate.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn set_current_req_rate(&self, v: u64) {
        self.current_req_rate.store(v, Ordering::SeqCst);
    }

    #[inline]
    pub fn err_count(&self) -> u64 {
        self.err_cnt.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn slow_count(&self) -> u64 {
        self.slow.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn success_count(&self) -> u64 {
        self.round_trip_hist.count()
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Requests a cooperative shutdown and wakes limiter waits.
    pub fn set_done(&self) {
        self.done.store(true, Ordering::SeqCst);
        self.done_notify.notify_waiters();
    }

    #[inline]
    pub fn done_notify(&self) -> &Notify {
        &self.done_notify
    }

    #[inline]
    pub fn semaphore(&self) -> &Arc<Semaphore> {
        &self.semaphore
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    #[inline]
    pub fn hist(&self) -> &Collector {
        &self.round_trip_hist
    }

    #[inline]
    pub fn rolling(&self) -> &Collector {
        &self.round_trip_rolling
    }

    #[inline]
    pub fn precise(&self) -> &Collector {
        &self.round_trip_precise
    }
}
