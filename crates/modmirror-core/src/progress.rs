//! Throttled transfer progress
//!
//! Downloads and mirror uploads can complete chunks far faster than anyone can
//! read log lines. Every active transfer reports through a [`ThrottledProgress`],
//! which forwards at most one update per [`PROGRESS_INTERVAL`] to its sink.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Minimum wall-clock time between two progress reports for one transfer.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// One progress update for a named transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub name: String,
    pub percent: u8,
    pub bytes_done: u64,
    pub bytes_total: Option<u64>,
    pub bytes_per_sec: f64,
}

/// One-way destination for progress updates.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: &TransferProgress);
}

/// Sink that emits progress as tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, progress: &TransferProgress) {
        tracing::info!(
            transfer = %progress.name,
            percent = progress.percent,
            bytes_done = progress.bytes_done,
            mb_per_sec = progress.bytes_per_sec / 1024.0 / 1024.0,
            "Transfer progress"
        );
    }
}

impl<F> ProgressSink for F
where
    F: Fn(&TransferProgress) + Send + Sync,
{
    fn report(&self, progress: &TransferProgress) {
        self(progress)
    }
}

/// Rate gate: lets one event through per interval.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    /// Returns true (and arms the gate) when an event may be emitted at `now`.
    pub fn ready_at(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    pub fn ready(&mut self) -> bool {
        self.ready_at(Instant::now())
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(PROGRESS_INTERVAL)
    }
}

/// Progress reporter for one transfer, throttled per [`ProgressThrottle`].
pub struct ThrottledProgress {
    name: String,
    started: Instant,
    throttle: Mutex<ProgressThrottle>,
    sink: Arc<dyn ProgressSink>,
}

impl ThrottledProgress {
    pub fn new(name: impl Into<String>, sink: Arc<dyn ProgressSink>) -> Self {
        Self::with_interval(name, sink, PROGRESS_INTERVAL)
    }

    pub fn with_interval(
        name: impl Into<String>,
        sink: Arc<dyn ProgressSink>,
        interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            started: Instant::now(),
            throttle: Mutex::new(ProgressThrottle::new(interval)),
            sink,
        }
    }

    /// Report by completed step count (e.g. chunk `index` of `count`).
    pub fn steps(&self, done: u64, total: u64, bytes_done: u64) {
        let percent = if total == 0 {
            100
        } else {
            (done.saturating_mul(100) / total).min(100) as u8
        };
        self.emit(percent, bytes_done, None);
    }

    /// Report by bytes transferred.
    pub fn bytes(&self, bytes_done: u64, bytes_total: Option<u64>) {
        let percent = match bytes_total {
            Some(0) | None => 0,
            Some(total) => (bytes_done.saturating_mul(100) / total).min(100) as u8,
        };
        self.emit(percent, bytes_done, bytes_total);
    }

    fn emit(&self, percent: u8, bytes_done: u64, bytes_total: Option<u64>) {
        let now = Instant::now();
        let ready = self
            .throttle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .ready_at(now);
        if !ready {
            return;
        }

        let elapsed = now.duration_since(self.started).as_secs_f64();
        let bytes_per_sec = if elapsed > 0.0 {
            bytes_done as f64 / elapsed
        } else {
            0.0
        };

        self.sink.report(&TransferProgress {
            name: self.name.clone(),
            percent,
            bytes_done,
            bytes_total,
            bytes_per_sec,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn throttle_allows_first_then_blocks_within_window() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(throttle.ready_at(t0));
        assert!(!throttle.ready_at(t0 + Duration::from_secs(1)));
        assert!(!throttle.ready_at(t0 + Duration::from_millis(4999)));
        assert!(throttle.ready_at(t0 + Duration::from_secs(5)));
        assert!(!throttle.ready_at(t0 + Duration::from_secs(6)));
        assert!(throttle.ready_at(t0 + Duration::from_secs(11)));
    }

    #[test]
    fn tight_loop_emits_bounded_count() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let sink: Arc<dyn ProgressSink> = Arc::new(move |_: &TransferProgress| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let progress = ThrottledProgress::new("mod.zip", sink);

        for i in 0..10_000u64 {
            progress.steps(i, 10_000, i * 1024);
        }

        // The loop finishes well inside one window.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn percent_is_index_over_count() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: Arc<dyn ProgressSink> = Arc::new(move |p: &TransferProgress| {
            sink_seen.lock().unwrap().push(p.percent);
        });
        let progress = ThrottledProgress::with_interval("x", sink, Duration::ZERO);
        progress.steps(1, 4, 0);
        progress.steps(3, 4, 0);
        progress.bytes(50, Some(200));
        assert_eq!(*seen.lock().unwrap(), vec![25, 75, 25]);
    }
}
