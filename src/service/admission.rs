use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use cyder_tools::log::{debug, warn};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Entries inspected when picking an eviction victim. Scanning a bounded
/// sample keeps eviction O(1)-ish instead of a full-map walk under load.
const EVICTION_SAMPLE: usize = 64;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("too many in-flight requests for this caller")]
    ConcurrencyExceeded,
}

struct RateEntry {
    /// Wall-clock window index (`now_ms / window_ms`).
    window_index: i64,
    count: u32,
    touched: Instant,
}

/// Fixed-window per-caller request counter.
///
/// The window resets on wall-clock boundaries, which is imprecise around the
/// edges but sufficient for a cost-control guard. The key space is capacity
/// bounded: a key-enumeration attack evicts stale counters instead of
/// growing the map.
pub struct RateGate {
    entries: Arc<DashMap<String, RateEntry>>,
    window: Duration,
    limit: u32,
    capacity: usize,
    shutdown: CancellationToken,
}

impl RateGate {
    pub fn new(window: Duration, limit: u32, capacity: usize) -> Self {
        let entries: Arc<DashMap<String, RateEntry>> = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        // Sweep counters idle for two full windows so steady-state memory
        // tracks the active caller set, not the historical one.
        let sweep_entries = Arc::clone(&entries);
        let sweep_token = shutdown.clone();
        let idle_cutoff = window * 2;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(window.max(Duration::from_secs(1)));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = Instant::now();
                        sweep_entries.retain(|_, e| now.duration_since(e.touched) < idle_cutoff);
                    }
                    _ = sweep_token.cancelled() => break,
                }
            }
        });

        Self {
            entries,
            window,
            limit,
            capacity,
            shutdown,
        }
    }

    /// Count one request for `key` in the current window, rejecting once the
    /// configured limit is reached.
    pub fn check_limit(&self, key: &str) -> Result<(), AdmissionError> {
        self.check_limit_at(key, Utc::now().timestamp_millis())
    }

    fn check_limit_at(&self, key: &str, now_ms: i64) -> Result<(), AdmissionError> {
        let window_ms = self.window.as_millis().max(1) as i64;
        let window_index = now_ms / window_ms;

        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.evict_one();
        }

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RateEntry {
                window_index,
                count: 0,
                touched: Instant::now(),
            });
        if entry.window_index != window_index {
            entry.window_index = window_index;
            entry.count = 0;
        }
        entry.touched = Instant::now();

        if entry.count >= self.limit {
            let window_end_ms = (window_index + 1) * window_ms;
            let retry_after_secs = (((window_end_ms - now_ms).max(0) as u64) + 999) / 1000;
            return Err(AdmissionError::RateLimited { retry_after_secs });
        }
        entry.count += 1;
        Ok(())
    }

    // Drops the least-recently-touched entry from a bounded sample.
    fn evict_one(&self) {
        let mut victim: Option<(String, Instant)> = None;
        for entry in self.entries.iter().take(EVICTION_SAMPLE) {
            let stale = victim
                .as_ref()
                .map(|(_, touched)| entry.touched < *touched)
                .unwrap_or(true);
            if stale {
                victim = Some((entry.key().clone(), entry.touched));
            }
        }
        if let Some((key, _)) = victim {
            debug!("Rate gate at capacity, evicting counter for caller '{}'", key);
            self.entries.remove(&key);
        }
    }

    /// Stop the sweeper and drop all counters.
    pub fn dispose(&self) {
        self.shutdown.cancel();
        self.entries.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Per-caller in-flight request counter. Acquisition fails immediately at
/// the cap instead of queuing; callers are expected to retry.
pub struct ConcurrencyGate {
    entries: Arc<DashMap<String, u32>>,
    max_in_flight: u32,
    capacity: usize,
}

impl ConcurrencyGate {
    pub fn new(max_in_flight: u32, capacity: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_in_flight,
            capacity,
        }
    }

    /// Take one in-flight slot for `key`. The returned guard releases the
    /// slot exactly once when dropped, which covers every exit path of the
    /// forwarding future, including cancellation by client disconnect.
    pub fn acquire_slot(&self, key: &str) -> Result<SlotGuard, AdmissionError> {
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            warn!("Concurrency gate key capacity reached, rejecting new caller");
            return Err(AdmissionError::ConcurrencyExceeded);
        }
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() >= self.max_in_flight {
                    return Err(AdmissionError::ConcurrencyExceeded);
                }
                *occupied.get_mut() += 1;
            }
            Entry::Vacant(vacant) => {
                if self.max_in_flight == 0 {
                    return Err(AdmissionError::ConcurrencyExceeded);
                }
                vacant.insert(1);
            }
        }
        Ok(SlotGuard {
            entries: Arc::clone(&self.entries),
            key: key.to_string(),
        })
    }

    /// Drop all in-flight counters. Outstanding guards become no-ops for
    /// bookkeeping purposes, which is the desired shutdown behavior.
    pub fn dispose(&self) {
        self.entries.clear();
    }

    #[cfg(test)]
    fn in_flight(&self, key: &str) -> u32 {
        self.entries.get(key).map(|e| *e).unwrap_or(0)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// RAII handle for one acquired concurrency slot.
pub struct SlotGuard {
    entries: Arc<DashMap<String, u32>>,
    key: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Entry::Occupied(mut occupied) = self.entries.entry(self.key.clone()) {
            let count = occupied.get_mut();
            *count = count.saturating_sub(1);
            // Idle callers keep no entry at all; the map only tracks live
            // in-flight work.
            if *count == 0 {
                occupied.remove();
            }
        }
    }
}
