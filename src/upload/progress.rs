//! Throttled progress and speed reporting
//!
//! Transports report cumulative byte counts as fast as frames leave the
//! socket. The types here fold those bursts into a bounded stream of
//! `(progress, speed)` updates for the registry.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Aggregated multipart progress. `progress` never exceeds 99: the last
/// percent belongs to the completion call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub progress: u8,
    /// `None` when no bytes moved since the previous update
    pub speed: Option<f64>,
}

/// Receives throttled multipart updates
pub type ProgressSink = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Highest progress reported before the completion call succeeds
pub const MAX_CHUNKED_PROGRESS: u8 = 99;

fn percent(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (loaded as f64 * 100.0 / total as f64).round();
    pct.clamp(0.0, 100.0) as u8
}

struct ProgressState {
    loaded_by_chunk: Vec<u64>,
    last_total_loaded: u64,
    last_speed_time: Instant,
    last_update_time: Option<Instant>,
    emitting: bool,
}

/// Combines per-chunk byte counters of one session into throttled updates.
pub struct ProgressAggregator {
    file_size: u64,
    throttle: Duration,
    state: Mutex<ProgressState>,
    sink: ProgressSink,
}

/// Clears the re-entrancy flag even if the sink panics
struct EmitGuard<'a>(&'a Mutex<ProgressState>);

impl Drop for EmitGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().emitting = false;
    }
}

impl ProgressAggregator {
    pub fn new(file_size: u64, chunk_count: usize, throttle: Duration, sink: ProgressSink) -> Self {
        Self {
            file_size,
            throttle,
            state: Mutex::new(ProgressState {
                loaded_by_chunk: vec![0; chunk_count],
                last_total_loaded: 0,
                last_speed_time: Instant::now(),
                last_update_time: None,
                emitting: false,
            }),
            sink,
        }
    }

    /// Store the cumulative byte count of one chunk and maybe emit.
    /// Out-of-range indexes are ignored.
    pub fn record_chunk_progress(&self, chunk_index: usize, bytes_loaded: u64) {
        {
            let mut state = self.state.lock();
            match state.loaded_by_chunk.get_mut(chunk_index) {
                Some(loaded) => *loaded = bytes_loaded,
                None => return,
            }
        }
        self.maybe_emit();
    }

    /// Sum of all chunk counters
    pub fn total_loaded(&self) -> u64 {
        self.state.lock().loaded_by_chunk.iter().sum()
    }

    /// Emit if the throttle window has passed and no emission is running.
    /// Returns whether an update was sent.
    pub fn maybe_emit(&self) -> bool {
        let update = {
            let mut state = self.state.lock();
            if state.emitting {
                return false;
            }
            let now = Instant::now();
            if let Some(last) = state.last_update_time {
                if now.duration_since(last) < self.throttle {
                    return false;
                }
            }
            state.emitting = true;

            let total_loaded: u64 = state.loaded_by_chunk.iter().sum();
            let elapsed = now.duration_since(state.last_speed_time);
            let speed = match total_loaded.checked_sub(state.last_total_loaded) {
                Some(delta) if delta > 0 && !elapsed.is_zero() => {
                    Some(delta as f64 / elapsed.as_secs_f64())
                }
                _ => None,
            };
            let progress = percent(total_loaded, self.file_size).min(MAX_CHUNKED_PROGRESS);

            state.last_total_loaded = total_loaded;
            state.last_speed_time = now;
            state.last_update_time = Some(now);

            ProgressUpdate { progress, speed }
        };

        let _guard = EmitGuard(&self.state);
        (self.sink)(update);
        true
    }
}

/// A single-request progress observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferSample {
    /// Set when the progress throttle let this observation through
    pub progress: Option<u8>,
    /// Set when a speed window closed with this observation
    pub speed: Option<f64>,
}

/// Receives throttled single-request samples
pub type TransferSink = Arc<dyn Fn(TransferSample) + Send + Sync>;

struct ThrottleState {
    last_update: Option<Instant>,
    last_loaded: u64,
    last_speed_sample: Instant,
}

/// Throttles the progress of a single streamed request.
///
/// Progress passes at most once per `throttle` (always at 100 %); speed is
/// sampled whenever more than `speed_window` has elapsed since the previous
/// sample.
pub struct TransferThrottle {
    total: u64,
    throttle: Duration,
    speed_window: Duration,
    state: Mutex<ThrottleState>,
    sink: TransferSink,
}

impl TransferThrottle {
    pub fn new(total: u64, throttle: Duration, speed_window: Duration, sink: TransferSink) -> Self {
        Self {
            total,
            throttle,
            speed_window,
            state: Mutex::new(ThrottleState {
                last_update: None,
                last_loaded: 0,
                last_speed_sample: Instant::now(),
            }),
            sink,
        }
    }

    /// Observe `loaded` cumulative bytes
    pub fn record(&self, loaded: u64) {
        let sample = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let progress = percent(loaded, self.total);

            let mut speed = None;
            let since_sample = now.duration_since(state.last_speed_sample);
            if since_sample > self.speed_window {
                let delta = loaded.saturating_sub(state.last_loaded);
                speed = Some(delta as f64 / since_sample.as_secs_f64());
                state.last_loaded = loaded;
                state.last_speed_sample = now;
            }

            let due = match state.last_update {
                None => true,
                Some(last) => now.duration_since(last) > self.throttle,
            };
            let progress = if due || progress == 100 {
                state.last_update = Some(now);
                Some(progress)
            } else {
                None
            };

            TransferSample { progress, speed }
        };

        if sample.progress.is_some() || sample.speed.is_some() {
            (self.sink)(sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting_sink() -> (ProgressSink, Arc<Mutex<Vec<ProgressUpdate>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: ProgressSink = Arc::new(move |update| sink_seen.lock().push(update));
        (sink, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_record_emits_immediately() {
        let (sink, seen) = collecting_sink();
        let aggregator = ProgressAggregator::new(1000, 4, Duration::from_millis(200), sink);
        aggregator.record_chunk_progress(0, 100);
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].progress, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttles_bursts() {
        let (sink, seen) = collecting_sink();
        let aggregator = ProgressAggregator::new(1000, 4, Duration::from_millis(200), sink);

        aggregator.record_chunk_progress(0, 10);
        for i in 1..50 {
            aggregator.record_chunk_progress(1, i);
        }
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(aggregator.total_loaded(), 59);

        tokio::time::advance(Duration::from_millis(200)).await;
        aggregator.record_chunk_progress(2, 41);
        let updates = seen.lock();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].progress, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_capped_at_99() {
        let (sink, seen) = collecting_sink();
        let aggregator = ProgressAggregator::new(300, 3, Duration::from_millis(200), sink);
        aggregator.record_chunk_progress(0, 100);
        tokio::time::advance(Duration::from_millis(250)).await;
        aggregator.record_chunk_progress(1, 100);
        tokio::time::advance(Duration::from_millis(250)).await;
        aggregator.record_chunk_progress(2, 100);

        let updates = seen.lock();
        assert_eq!(updates.last().unwrap().progress, 99);
        assert!(updates.iter().all(|u| u.progress <= 99));
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_from_delta_over_elapsed() {
        let (sink, seen) = collecting_sink();
        let aggregator = ProgressAggregator::new(10_000, 2, Duration::from_millis(200), sink);

        tokio::time::advance(Duration::from_millis(500)).await;
        aggregator.record_chunk_progress(0, 1000);
        tokio::time::advance(Duration::from_millis(250)).await;
        aggregator.record_chunk_progress(1, 500);

        let updates = seen.lock();
        assert_eq!(updates[0].speed, Some(2000.0));
        assert_eq!(updates[1].speed, Some(2000.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_unset_without_new_bytes() {
        let (sink, seen) = collecting_sink();
        let aggregator = ProgressAggregator::new(1000, 2, Duration::from_millis(200), sink);

        aggregator.record_chunk_progress(0, 300);
        tokio::time::advance(Duration::from_millis(300)).await;
        // A retried chunk restarts from zero: the total shrinks
        aggregator.record_chunk_progress(0, 0);

        let updates = seen.lock();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].speed, None);
        assert_eq!(updates[1].progress, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentrant_emit_is_noop() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<Arc<ProgressAggregator>>>> = Arc::new(Mutex::new(None));

        let sink_seen = Arc::clone(&seen);
        let sink_slot = Arc::clone(&slot);
        let sink: ProgressSink = Arc::new(move |update| {
            sink_seen.lock().push(update);
            let aggregator = sink_slot.lock().clone();
            if let Some(aggregator) = aggregator {
                assert!(!aggregator.maybe_emit());
            }
        });

        let aggregator = Arc::new(ProgressAggregator::new(100, 1, Duration::ZERO, sink));
        *slot.lock() = Some(Arc::clone(&aggregator));

        aggregator.record_chunk_progress(0, 50);
        assert_eq!(seen.lock().len(), 1);

        // The guard is released after the sink returns
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(aggregator.maybe_emit());
        *slot.lock() = None;
    }

    #[tokio::test]
    async fn test_out_of_range_chunk_ignored() {
        let (sink, seen) = collecting_sink();
        let aggregator = ProgressAggregator::new(100, 1, Duration::from_millis(200), sink);
        aggregator.record_chunk_progress(5, 50);
        assert!(seen.lock().is_empty());
        assert_eq!(aggregator.total_loaded(), 0);
    }

    fn collecting_transfer_sink() -> (TransferSink, Arc<Mutex<Vec<TransferSample>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: TransferSink = Arc::new(move |sample| sink_seen.lock().push(sample));
        (sink, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_throttle_limits_progress() {
        let (sink, seen) = collecting_transfer_sink();
        let throttle = TransferThrottle::new(
            1000,
            Duration::from_millis(80),
            Duration::from_millis(500),
            sink,
        );

        throttle.record(100);
        throttle.record(200);
        throttle.record(300);
        tokio::time::advance(Duration::from_millis(81)).await;
        throttle.record(400);

        let samples = seen.lock();
        let progress: Vec<_> = samples.iter().filter_map(|s| s.progress).collect();
        assert_eq!(progress, vec![10, 40]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_throttle_always_reports_completion() {
        let (sink, seen) = collecting_transfer_sink();
        let throttle = TransferThrottle::new(
            1000,
            Duration::from_millis(80),
            Duration::from_millis(500),
            sink,
        );

        throttle.record(900);
        throttle.record(1000);

        let progress: Vec<_> = seen.lock().iter().filter_map(|s| s.progress).collect();
        assert_eq!(progress, vec![90, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_speed_needs_full_window() {
        let (sink, seen) = collecting_transfer_sink();
        let throttle = TransferThrottle::new(
            100_000,
            Duration::from_millis(80),
            Duration::from_millis(500),
            sink,
        );

        tokio::time::advance(Duration::from_millis(400)).await;
        throttle.record(1_000);
        assert!(seen.lock().iter().all(|s| s.speed.is_none()));

        tokio::time::advance(Duration::from_millis(600)).await;
        throttle.record(6_000);
        let speeds: Vec<_> = seen.lock().iter().filter_map(|s| s.speed).collect();
        assert_eq!(speeds, vec![6_000.0]);
    }
}
