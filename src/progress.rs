//! Progress reporting and cancellation for long-running operations.
//!
//! Merge, import and export run synchronously on whatever thread the caller
//! picks. Callers observe them through a [`RunControl`]: an optional progress
//! callback and a [`CancellationToken`] checked once per outer-loop record.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Stage of work a progress report refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Clustering records into duplicate groups.
    Grouping,
    /// Absorbing incoming records into an existing set.
    Importing,
    /// Writing records to disk.
    Exporting,
}

/// A coarse progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub phase: Phase,
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    /// Fraction complete in `[0, 1]`; an empty workload is complete.
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        (self.completed as f32 / self.total as f32).min(1.0)
    }
}

/// Callback receiving progress snapshots.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Shared flag used to request that an operation stop early.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Every clone of this token observes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Marker error for an operation stopped by its [`CancellationToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Observation and cancellation hooks for one operation.
#[derive(Clone, Default)]
pub struct RunControl {
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl fmt::Debug for RunControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunControl")
            .field("progress", &self.progress.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl RunControl {
    /// Creates a control that reports nothing and never cancels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a progress callback.
    pub fn with_progress(mut self, callback: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Attaches a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fails with [`Cancelled`] if cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.cancel.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Starts tracking a phase with `total` units of work.
    pub fn tracker(&self, phase: Phase, total: usize) -> ProgressTracker {
        ProgressTracker {
            callback: self.progress.clone(),
            phase,
            total,
            last_percent: None,
        }
    }
}

/// Forwards progress for one phase, at most once per whole percent.
pub struct ProgressTracker {
    callback: Option<ProgressCallback>,
    phase: Phase,
    total: usize,
    last_percent: Option<usize>,
}

impl ProgressTracker {
    /// Records that `completed` units are done.
    pub fn update(&mut self, completed: usize) {
        let Some(callback) = &self.callback else {
            return;
        };
        let completed = completed.min(self.total);
        let percent = if self.total == 0 {
            100
        } else {
            completed * 100 / self.total
        };
        if self.last_percent == Some(percent) {
            return;
        }
        self.last_percent = Some(percent);
        callback(Progress {
            phase: self.phase,
            completed,
            total: self.total,
        });
    }

    /// Reports completion of the phase.
    pub fn finish(&mut self) {
        self.update(self.total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_control() -> (RunControl, Arc<Mutex<Vec<Progress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let control = RunControl::new().with_progress(move |p| sink.lock().unwrap().push(p));
        (control, seen)
    }

    #[test]
    fn fraction_of_empty_work_is_complete() {
        let p = Progress {
            phase: Phase::Grouping,
            completed: 0,
            total: 0,
        };
        assert_eq!(p.fraction(), 1.0);
    }

    #[test]
    fn tracker_throttles_to_whole_percents() {
        let (control, seen) = recording_control();
        let mut tracker = control.tracker(Phase::Importing, 1000);
        for i in 1..=1000 {
            tracker.update(i);
        }
        tracker.finish();

        let seen = seen.lock().unwrap();
        // 0% through 100% inclusive
        assert_eq!(seen.len(), 101);
        assert_eq!(seen.last().unwrap().completed, 1000);
    }

    #[test]
    fn finish_reports_even_without_updates() {
        let (control, seen) = recording_control();
        control.tracker(Phase::Exporting, 3).finish();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let control = RunControl::new().with_cancellation(token.clone());
        assert!(control.checkpoint().is_ok());

        token.cancel();
        assert_eq!(control.checkpoint(), Err(Cancelled));
    }
}
