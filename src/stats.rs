//! Process-wide pipeline counters and per-stage timing

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use crossbeam::utils::CachePadded;
use once_cell::sync::Lazy;
use tracing::info;

/// Well-known counter names advanced by the core itself.
pub const FRAMES_PRODUCED: &str = "frames_produced";
pub const FRAMES_CONSUMED: &str = "frames_consumed";
pub const FRAMES_DROPPED: &str = "frames_dropped";
pub const MULTIPLEXER_FORWARDED: &str = "multiplexer_forwarded";
pub const MULTIPLEXER_STALLS: &str = "multiplexer_stalls";

static STATS: Lazy<StatsCollector> = Lazy::new(StatsCollector::new);

/// The process-wide collector. Lifecycle is bound to the pipeline run;
/// counters reset only on an explicit [`StatsCollector::reset`].
pub fn stats() -> &'static StatsCollector {
    &STATS
}

type Counter = Arc<CachePadded<AtomicU64>>;

/// Named, thread-safe counters sampled by any component and written by
/// whichever stage advances a frame.
///
/// `sample` is a consistent point-in-time read per counter; the set as a
/// whole is not one atomic transaction.
pub struct StatsCollector {
    counters: RwLock<HashMap<String, Counter>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
        }
    }

    /// Cached handle for hot paths; registers the counter on first use.
    pub fn counter(&self, name: &str) -> Counter {
        {
            let map = self
                .counters
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(c) = map.get(name) {
                return Arc::clone(c);
            }
        }
        let mut map = self
            .counters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            map.entry(name.to_string())
                .or_insert_with(|| Arc::new(CachePadded::new(AtomicU64::new(0)))),
        )
    }

    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, n: u64) {
        self.counter(name).fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counter(name).load(Ordering::Relaxed)
    }

    /// Snapshot of all registered counters.
    pub fn sample(&self) -> BTreeMap<String, u64> {
        let map = self
            .counters
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        map.iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }

    /// Zero every counter. Called only on explicit pipeline restart.
    pub fn reset(&self) {
        let map = self
            .counters
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for c in map.values() {
            c.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Tick/tock timer for one processing stage. Records each span into the
/// `metrics` histogram named after the stage and logs a min/avg/max summary
/// when dropped.
pub struct StageTimer {
    id: String,
    started: Option<Instant>,
    count: u64,
    sum_ns: u64,
    min_ns: u64,
    max_ns: u64,
}

impl StageTimer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            started: None,
            count: 0,
            sum_ns: 0,
            min_ns: u64::MAX,
            max_ns: 0,
        }
    }

    pub fn tick(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn tock(&mut self) {
        let Some(started) = self.started.take() else {
            return;
        };
        let ns = started.elapsed().as_nanos() as u64;
        self.count += 1;
        self.sum_ns += ns;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        metrics::histogram!("stage_time_ns", "stage" => self.id.clone()).record(ns as f64);
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        if self.count == 0 {
            return;
        }
        info!(
            stage = %self.id,
            count = self.count,
            min_ns = self.min_ns,
            avg_ns = self.sum_ns / self.count,
            max_ns = self.max_ns,
            "stage timing summary"
        );
    }
}
