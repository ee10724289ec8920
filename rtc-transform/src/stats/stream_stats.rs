use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

const UNSET: i64 = -1;

/// Running jitter aggregates for one reported source. Every field is an
/// independent atomic so a reporting thread can read while the processing
/// thread writes.
#[derive(Debug)]
pub struct StreamStats {
    report_count: AtomicU64,
    jitter_sum: AtomicU64,
    min_jitter: AtomicI64,
    max_jitter: AtomicI64,
}

impl Default for StreamStats {
    fn default() -> Self {
        Self {
            report_count: AtomicU64::new(0),
            jitter_sum: AtomicU64::new(0),
            min_jitter: AtomicI64::new(UNSET),
            max_jitter: AtomicI64::new(UNSET),
        }
    }
}

impl StreamStats {
    /// Accounts one report block carrying `jitter`.
    pub fn update(&self, jitter: u32) {
        let jitter = jitter as i64;
        self.report_count.fetch_add(1, Ordering::Relaxed);
        self.jitter_sum.fetch_add(jitter as u64, Ordering::Relaxed);
        self.max_jitter.fetch_max(jitter, Ordering::Relaxed);

        let mut current = self.min_jitter.load(Ordering::Relaxed);
        while current == UNSET || jitter < current {
            match self.min_jitter.compare_exchange_weak(
                current,
                jitter,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            report_count: self.report_count.load(Ordering::Relaxed),
            jitter_sum: self.jitter_sum.load(Ordering::Relaxed),
            min_jitter: self.min_jitter.load(Ordering::Relaxed),
            max_jitter: self.max_jitter.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StreamStats`]. `min_jitter` and `max_jitter` are
/// -1 until the first report.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamStatsSnapshot {
    pub report_count: u64,
    pub jitter_sum: u64,
    pub min_jitter: i64,
    pub max_jitter: i64,
}

impl StreamStatsSnapshot {
    pub fn average_jitter(&self) -> f64 {
        if self.report_count == 0 {
            0.0
        } else {
            self.jitter_sum as f64 / self.report_count as f64
        }
    }
}

/// SSRC keyed [`StreamStats`]. The map lock is held only to find or insert
/// an entry, never while updating one.
#[derive(Debug, Default)]
pub struct StreamStatsTable {
    streams: RwLock<HashMap<u32, Arc<StreamStats>>>,
}

impl StreamStatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<u32, Arc<StreamStats>>> {
        self.streams.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<u32, Arc<StreamStats>>> {
        self.streams.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Entry for `ssrc`, created on first use.
    pub fn entry(&self, ssrc: u32) -> Arc<StreamStats> {
        if let Some(stats) = self.read().get(&ssrc) {
            return Arc::clone(stats);
        }
        Arc::clone(self.write().entry(ssrc).or_default())
    }

    pub fn update(&self, ssrc: u32, jitter: u32) {
        self.entry(ssrc).update(jitter);
    }

    pub fn snapshot(&self, ssrc: u32) -> Option<StreamStatsSnapshot> {
        self.read().get(&ssrc).map(|s| s.snapshot())
    }

    pub fn remove(&self, ssrc: u32) -> bool {
        self.write().remove(&ssrc).is_some()
    }

    pub fn ssrcs(&self) -> Vec<u32> {
        self.read().keys().copied().collect()
    }

    /// Jitter sum over report count across every stream; 0 with no reports.
    pub fn average_jitter(&self) -> f64 {
        let (sum, count) = self.read().values().fold((0u64, 0u64), |(sum, count), s| {
            let snap = s.snapshot();
            (sum + snap.jitter_sum, count + snap.report_count)
        });
        if count == 0 {
            0.0
        } else {
            sum as f64 / count as f64
        }
    }
}
