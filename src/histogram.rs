use core::fmt::{self, Display, Formatter};
use std::sync::Mutex;

/// Cost of merging two adjacent buckets with the given combined count and
/// midpoints `a < b`.
pub type WeightFn = fn(count: u64, a: f64, b: f64) -> f64;

/// Linear merge cost: `count * (b - a)`.
pub fn count_width(count: u64, a: f64, b: f64) -> f64 {
    count as f64 * (b - a)
}

/// Logarithmic merge cost: `count * log2(b / a)`.
///
/// Penalizes merges across orders of magnitude, which keeps the bar chart
/// readable for latencies spanning from microseconds to seconds.
pub fn latency_width(count: u64, a: f64, b: f64) -> f64 {
    if a <= 0.0 {
        return f64::INFINITY;
    }

    count as f64 * (b / a).log2()
}

const CHART_WIDTH: usize = 50;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    min: f64,
    max: f64,
    count: u64,
    sum: f64,
}

impl Bucket {
    #[inline]
    fn mid(&self) -> f64 {
        self.sum / self.count as f64
    }
}

#[derive(Debug, Default)]
struct Inner {
    buckets: Vec<Bucket>,
    count: u64,
    min: f64,
    max: f64,
}

/// Streaming collector with a bounded number of adaptive buckets.
///
/// Buckets are allocated on demand and the cheapest adjacent pair under the
/// weight function is merged once the limit is exceeded, so the collector
/// adapts to any latency range without prior knowledge of it.
#[derive(Debug)]
pub struct Collector {
    buckets_limit: usize,
    weight: WeightFn,
    inner: Mutex<Inner>,
}

impl Collector {
    pub fn new(buckets_limit: usize, weight: WeightFn) -> Self {
        Self {
            buckets_limit,
            weight,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Adds a sample to the collector.
    ///
    /// Samples must be non-negative.
    pub fn add(&self, v: f64) {
        let mut inner = self.inner.lock().unwrap();

        inner.count += 1;
        if inner.count == 1 {
            inner.min = v;
            inner.max = v;
        } else {
            inner.min = inner.min.min(v);
            inner.max = inner.max.max(v);
        }

        match inner.buckets.iter().position(|b| b.min <= v && v <= b.max) {
            Some(idx) => {
                let b = &mut inner.buckets[idx];
                b.count += 1;
                b.sum += v;
            }
            None => {
                let idx = inner.buckets.partition_point(|b| b.min < v);
                inner.buckets.insert(idx, Bucket { min: v, max: v, count: 1, sum: v });
            }
        }

        if inner.buckets.len() > self.buckets_limit {
            self.merge_cheapest(&mut inner);
        }
    }

    fn merge_cheapest(&self, inner: &mut Inner) {
        let mut best = 0;
        let mut best_weight = f64::INFINITY;

        for idx in 0..inner.buckets.len() - 1 {
            let (a, b) = (&inner.buckets[idx], &inner.buckets[idx + 1]);
            let w = (self.weight)(a.count + b.count, a.mid(), b.mid());
            if w < best_weight {
                best_weight = w;
                best = idx;
            }
        }

        let b = inner.buckets.remove(best + 1);
        let a = &mut inner.buckets[best];
        a.min = a.min.min(b.min);
        a.max = a.max.max(b.max);
        a.count += b.count;
        a.sum += b.sum;
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.inner.lock().unwrap().count
    }

    #[inline]
    pub fn min(&self) -> f64 {
        self.inner.lock().unwrap().min
    }

    #[inline]
    pub fn max(&self) -> f64 {
        self.inner.lock().unwrap().max
    }

    /// Returns the interpolated value at the given percentile in `[0, 100]`.
    ///
    /// Returns 0 for an empty collector.
    pub fn percentile(&self, p: f64) -> f64 {
        let inner = self.inner.lock().unwrap();

        if inner.count == 0 {
            return 0.0;
        }
        if p <= 0.0 {
            return inner.min;
        }
        if p >= 100.0 {
            return inner.max;
        }

        let mut buckets = inner.buckets.clone();
        buckets.sort_by(|a, b| a.mid().total_cmp(&b.mid()));

        let target = p / 100.0 * inner.count as f64;
        let mut cum = 0.0;

        for b in &buckets {
            let next = cum + b.count as f64;
            if next >= target {
                let frac = (target - cum) / b.count as f64;

                return b.min + frac * (b.max - b.min);
            }
            cum = next;
        }

        inner.max
    }

    /// Clears all buckets and running aggregates.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner::default();
    }
}

impl Display for Collector {
    fn fmt(&self, fmt: &mut Formatter) -> Result<(), fmt::Error> {
        let inner = self.inner.lock().unwrap();

        let mut buckets = inner.buckets.clone();
        buckets.sort_by(|a, b| a.mid().total_cmp(&b.mid()));

        for b in &buckets {
            let share = b.count as f64 / inner.count as f64;
            let bar = "#".repeat((share * CHART_WIDTH as f64).round() as usize);

            writeln!(
                fmt,
                "[{:8.2} {:8.2}] {:6.2}% {}",
                b.min,
                b.max,
                100.0 * share,
                bar
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_bounds_and_monotonicity() {
        let c = Collector::new(100, latency_width);
        for v in 1..=100 {
            c.add(v as f64);
        }

        assert_eq!(100, c.count());
        assert_eq!(1.0, c.percentile(0.0));
        assert_eq!(100.0, c.percentile(100.0));

        let mut prev = 0.0;
        for p in 0..=100 {
            let v = c.percentile(p as f64);
            assert!(v >= c.min() && v <= c.max());
            assert!(v >= prev, "percentile must be monotonic in p");
            prev = v;
        }

        assert!((c.percentile(50.0) - 50.0).abs() <= 1.0);
    }

    #[test]
    fn merges_respect_bucket_limit() {
        let c = Collector::new(2, count_width);
        c.add(1.0);
        c.add(2.0);
        c.add(100.0);

        // The (1, 2) pair is far cheaper to merge than (2, 100).
        let chart = c.to_string();
        assert_eq!(2, chart.lines().count());
        assert_eq!(3, c.count());
        assert_eq!(1.0, c.min());
        assert_eq!(100.0, c.max());
    }

    #[test]
    fn latency_width_prefers_close_magnitudes() {
        let c = Collector::new(2, latency_width);
        c.add(1.0);
        c.add(2.0);
        c.add(1000.0);

        assert_eq!(2, c.to_string().lines().count());
        // The outlier keeps its own bucket.
        assert_eq!(1000.0, c.percentile(100.0));
        assert!(c.percentile(50.0) <= 2.0);
    }

    #[test]
    fn empty_collector() {
        let c = Collector::new(10, latency_width);

        assert_eq!(0.0, c.percentile(50.0));
        assert_eq!("", c.to_string());
    }

    #[test]
    fn reset_is_idempotent() {
        let c = Collector::new(10, latency_width);
        c.reset();
        assert_eq!(0, c.count());

        c.add(5.0);
        c.add(7.0);
        assert_eq!(2, c.count());

        c.reset();
        c.reset();
        assert_eq!(0, c.count());
        assert_eq!(0.0, c.min());
        assert_eq!(0.0, c.max());
        assert_eq!("", c.to_string());
    }

    #[test]
    fn concurrent_add_keeps_total_count() {
        use std::sync::Arc;

        let c = Arc::new(Collector::new(10, latency_width));
        let mut threads = Vec::new();

        for t in 0..4 {
            let c = c.clone();
            threads.push(std::thread::spawn(move || {
                for i in 0..1000 {
                    c.add((t * 1000 + i) as f64 / 10.0);
                }
            }));
        }

        for t in threads {
            t.join().expect("no self join");
        }

        assert_eq!(4000, c.count());
    }
}
