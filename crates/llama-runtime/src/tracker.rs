//! Admission gate for in-flight predictions.
//!
//! Open → Closing → Drained. Once closed, no permit is ever handed out again;
//! `shutdown` returns when the last outstanding permit is released.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, Span};

use crate::error::{Result, RuntimeError};

#[derive(Debug, Default)]
struct TrackerState {
    closed: bool,
    in_flight: usize,
}

pub struct PredictionTracker {
    state: Mutex<TrackerState>,
    drained: Condvar,
    span: Span,
}

impl Default for PredictionTracker {
    fn default() -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            drained: Condvar::new(),
            span: tracing::info_span!("prediction_tracker"),
        }
    }
}

impl PredictionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Register one prediction as in flight.
    ///
    /// The returned permit releases the slot when dropped.
    pub fn admit(self: &Arc<Self>) -> Result<PredictionPermit> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RuntimeError::TrackerClosed);
        }
        state.in_flight += 1;
        Ok(PredictionPermit {
            tracker: Arc::clone(self),
        })
    }

    /// Admit, run `op`, release.
    pub fn track<T>(self: &Arc<Self>, op: impl FnOnce() -> T) -> Result<T> {
        let _permit = self.admit()?;
        Ok(op())
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 {
            self.drained.notify_all();
        }
    }

    /// Stop admitting and block until every permit has been released.
    pub fn shutdown(&self) {
        let mut state = self.close();
        while state.in_flight > 0 {
            self.drained.wait(&mut state);
        }
        debug!(parent: &self.span, "predictions drained");
    }

    /// Like [`shutdown`](Self::shutdown), but gives up after `timeout`.
    ///
    /// Returns `true` if everything drained in time. The tracker stays closed
    /// either way.
    pub fn shutdown_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.close();
        while state.in_flight > 0 {
            if self.drained.wait_until(&mut state, deadline).timed_out() {
                return state.in_flight == 0;
            }
        }
        true
    }

    fn close(&self) -> parking_lot::MutexGuard<'_, TrackerState> {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            info!(parent: &self.span, in_flight = state.in_flight, "prediction tracker closed");
        }
        state
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl fmt::Debug for PredictionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PredictionTracker")
            .field("closed", &state.closed)
            .field("in_flight", &state.in_flight)
            .finish()
    }
}

/// RAII admission token. Dropping it releases the slot.
#[must_use = "dropping the permit releases the prediction slot immediately"]
pub struct PredictionPermit {
    tracker: Arc<PredictionTracker>,
}

impl PredictionPermit {
    /// Release explicitly. Same as dropping.
    pub fn release(self) {}
}

impl Drop for PredictionPermit {
    fn drop(&mut self) {
        self.tracker.release();
    }
}

impl fmt::Debug for PredictionPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredictionPermit").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permit_counts_in_flight() {
        let tracker = Arc::new(PredictionTracker::new());
        let a = tracker.admit().unwrap();
        let b = tracker.admit().unwrap();
        assert_eq!(tracker.in_flight(), 2);
        a.release();
        assert_eq!(tracker.in_flight(), 1);
        drop(b);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn closed_tracker_rejects() {
        let tracker = Arc::new(PredictionTracker::new());
        tracker.shutdown();
        assert!(tracker.is_closed());
        assert_eq!(tracker.admit().err(), Some(RuntimeError::TrackerClosed));
        assert_eq!(tracker.track(|| 1), Err(RuntimeError::TrackerClosed));
    }

    #[test]
    fn track_releases_after_op() {
        let tracker = Arc::new(PredictionTracker::new());
        let inner = Arc::clone(&tracker);
        let seen = tracker.track(move || inner.in_flight()).unwrap();
        assert_eq!(seen, 1);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn shutdown_timeout_reports_stragglers() {
        let tracker = Arc::new(PredictionTracker::new());
        let permit = tracker.admit().unwrap();
        assert!(!tracker.shutdown_timeout(Duration::from_millis(20)));
        assert_eq!(tracker.in_flight(), 1);
        drop(permit);
        assert!(tracker.shutdown_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn shutdown_on_idle_tracker_returns() {
        let tracker = PredictionTracker::new();
        tracker.shutdown();
        tracker.shutdown();
        assert_eq!(tracker.in_flight(), 0);
    }
}
