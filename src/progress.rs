// src/progress.rs

//! Progress reporting for long-running package jobs
//!
//! Jobs compute a completion fraction in `[0, 1]` and hand it to a
//! [`ProgressReporter`], which keeps it monotonic and only notifies the
//! observer when the fraction crosses into a new bucket. Observers include:
//! - `LogProgress`: logs to tracing
//! - `CallbackProgress`: forwards to a closure (GUI or IPC glue)
//! - `SilentProgress`: no-op for scripted/quiet modes
//!
//! # Example
//!
//! ```
//! use ampkg::progress::{CallbackProgress, ProgressReporter};
//! use std::sync::{Arc, Mutex};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! let mut reporter = ProgressReporter::new(
//!     Box::new(CallbackProgress::new(move |f| sink.lock().unwrap().push(f))),
//!     10,
//! );
//! reporter.report(0.05);
//! reporter.report(0.12);
//! reporter.report(0.13);
//! reporter.finish();
//! assert_eq!(*seen.lock().unwrap(), vec![0.12, 1.0]);
//! ```

use std::fmt;
use tracing::info;

/// Receives completion fractions
pub trait ProgressObserver: Send {
    /// Called with a fraction in `[0, 1]`, never decreasing
    fn progress(&self, fraction: f64);
}

/// No-op observer
#[derive(Debug, Default)]
pub struct SilentProgress;

impl ProgressObserver for SilentProgress {
    fn progress(&self, _fraction: f64) {}
}

/// Logs progress at info level
#[derive(Debug)]
pub struct LogProgress {
    name: String,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ProgressObserver for LogProgress {
    fn progress(&self, fraction: f64) {
        info!("{}: {:.0}%", self.name, fraction * 100.0);
    }
}

/// Forwards progress to a closure
pub struct CallbackProgress<F>
where
    F: Fn(f64) + Send,
{
    callback: F,
}

impl<F> CallbackProgress<F>
where
    F: Fn(f64) + Send,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressObserver for CallbackProgress<F>
where
    F: Fn(f64) + Send,
{
    fn progress(&self, fraction: f64) {
        (self.callback)(fraction);
    }
}

/// Throttles and clamps progress before it reaches an observer
pub struct ProgressReporter {
    observer: Box<dyn ProgressObserver>,
    steps: u32,
    last_bucket: Option<u32>,
    last_fraction: f64,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("steps", &self.steps)
            .field("last_bucket", &self.last_bucket)
            .field("last_fraction", &self.last_fraction)
            .finish_non_exhaustive()
    }
}

impl ProgressReporter {
    /// `steps` is the number of buckets; zero is treated as one
    pub fn new(observer: Box<dyn ProgressObserver>, steps: u32) -> Self {
        Self {
            observer,
            steps: steps.max(1),
            last_bucket: None,
            last_fraction: 0.0,
        }
    }

    /// Reporter that never notifies anyone
    pub fn silent() -> Self {
        Self::new(Box::new(SilentProgress), 1)
    }

    /// Offer a new fraction; notifies only on a bucket increase
    pub fn report(&mut self, fraction: f64) {
        let fraction = if fraction.is_nan() {
            self.last_fraction
        } else {
            fraction.clamp(0.0, 1.0).max(self.last_fraction)
        };
        self.last_fraction = fraction;

        let bucket = (fraction * f64::from(self.steps)).floor() as u32;
        if bucket == 0 || self.last_bucket.is_some_and(|last| bucket <= last) {
            return;
        }
        self.last_bucket = Some(bucket);
        self.observer.progress(fraction);
    }

    /// Report completion
    pub fn finish(&mut self) {
        self.report(1.0);
    }

    /// Latest (clamped, monotonic) fraction
    pub fn fraction(&self) -> f64 {
        self.last_fraction
    }

    /// Hand the observer back for the next job
    pub fn into_observer(self) -> Box<dyn ProgressObserver> {
        self.observer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording(steps: u32) -> (ProgressReporter, Arc<Mutex<Vec<f64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter = ProgressReporter::new(
            Box::new(CallbackProgress::new(move |f| sink.lock().unwrap().push(f))),
            steps,
        );
        (reporter, seen)
    }

    #[test]
    fn test_one_notification_per_bucket() {
        let (mut reporter, seen) = recording(4);
        for i in 0..=100 {
            reporter.report(f64::from(i) / 100.0);
        }
        assert_eq!(*seen.lock().unwrap(), vec![0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_monotonic_and_clamped() {
        let (mut reporter, seen) = recording(10);
        reporter.report(0.5);
        reporter.report(0.2);
        assert_eq!(reporter.fraction(), 0.5);
        reporter.report(7.0);
        reporter.report(f64::NAN);
        assert_eq!(reporter.fraction(), 1.0);
        assert_eq!(*seen.lock().unwrap(), vec![0.5, 1.0]);
    }

    #[test]
    fn test_finish_reports_once() {
        let (mut reporter, seen) = recording(100);
        reporter.finish();
        reporter.finish();
        assert_eq!(*seen.lock().unwrap(), vec![1.0]);
    }

    #[test]
    fn test_silent() {
        let mut reporter = ProgressReporter::silent();
        reporter.report(0.7);
        assert_eq!(reporter.fraction(), 0.7);
    }
}
