//! Pause-aware elapsed-time accounting
//!
//! Each track owns a timer so per-source durations survive pause/resume
//! cycles without drift.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct TimerInner {
    /// Timestamp of the last resume, `None` while paused or never started.
    start: Option<Instant>,
    /// Accumulated active duration from prior intervals.
    total: Duration,
    paused: bool,
}

/// Tracks elapsed active (unpaused) duration for one media track.
#[derive(Debug, Default)]
pub struct Timer {
    inner: Mutex<TimerInner>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin accounting from zero.
    pub fn start(&self) {
        let mut t = self.inner.lock();
        t.start = Some(Instant::now());
        t.total = Duration::ZERO;
        t.paused = false;
    }

    /// Stop accumulating. Pausing an already-paused timer is a no-op.
    pub fn pause(&self) {
        let mut t = self.inner.lock();
        if t.paused {
            return;
        }
        if let Some(start) = t.start.take() {
            t.total += start.elapsed();
        }
        t.paused = true;
    }

    /// Continue accumulating after a pause.
    ///
    /// Only valid on a timer that has been started; the session never
    /// resumes tracks it did not start.
    pub fn resume(&self) {
        let mut t = self.inner.lock();
        if !t.paused {
            if t.start.is_none() {
                tracing::warn!("resume called on a timer that was never started");
            }
            return;
        }
        t.start = Some(Instant::now());
        t.paused = false;
    }

    /// Active duration so far. Monotone non-decreasing while running.
    pub fn elapsed(&self) -> Duration {
        let t = self.inner.lock();
        match (t.paused, t.start) {
            (false, Some(start)) => t.total + start.elapsed(),
            _ => t.total,
        }
    }

    /// Active duration in whole milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    /// Whether `start()` has ever been called since the last reset.
    pub fn has_started(&self) -> bool {
        let t = self.inner.lock();
        t.start.is_some() || t.paused || t.total > Duration::ZERO
    }

    pub fn reset(&self) {
        *self.inner.lock() = TimerInner::default();
    }
}
