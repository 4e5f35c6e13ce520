//! Progress observation and cancellation
//!
//! Long-running public operations are blocking calls that report progress
//! through an observer callback and accept a cancellation token. Tokens are
//! observed at parser file boundaries, between commit batches and between
//! store transactions; a cancelled build leaves the store in the pre-build
//! committed state.

use crate::error::{CodelexError, CodelexResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Stage identifiers carried in progress updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Cloning,
    Fetching,
    Checkout,
    Parsing,
    Mapping,
    GitAnalysis,
    ChangeEvents,
    Writing,
    Exporting,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Cloning => "cloning",
            Stage::Fetching => "fetching",
            Stage::Checkout => "checkout",
            Stage::Parsing => "parsing",
            Stage::Mapping => "mapping",
            Stage::GitAnalysis => "git-analysis",
            Stage::ChangeEvents => "change-events",
            Stage::Writing => "writing",
            Stage::Exporting => "exporting",
        }
    }
}

/// A single progress report
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub stage: Stage,
    /// 0.0..=100.0 where a meaningful total is known
    pub percent: Option<f32>,
    pub message: String,
}

/// Observer callback for progress updates
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, update: &ProgressUpdate);
}

/// Observer that discards all updates
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _update: &ProgressUpdate) {}
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Convenience used by operation internals
pub fn report(
    observer: &dyn ProgressObserver,
    stage: Stage,
    percent: Option<f32>,
    message: impl Into<String>,
) {
    observer.on_progress(&ProgressUpdate {
        stage,
        percent,
        message: message.into(),
    });
}

/// Cooperative cancellation token
///
/// Cloned freely; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Suspension-point check; returns a Cancelled error naming the stage.
    pub fn checkpoint(&self, stage: Stage) -> CodelexResult<()> {
        if self.is_cancelled() {
            Err(CodelexError::cancelled(stage.as_str()))
        } else {
            Ok(())
        }
    }
}

/// Wall-clock deadline for an overall operation timeout
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn after(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn expired(&self) -> bool {
        self.elapsed() >= self.limit
    }

    pub fn check(&self, what: &str) -> CodelexResult<()> {
        if self.expired() {
            Err(CodelexError::store(format!(
                "{} exceeded {:.0}s timeout",
                what,
                self.limit.as_secs_f64()
            )))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_cancellation_observed_by_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.checkpoint(Stage::Parsing).is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        let err = token.checkpoint(Stage::Parsing).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
    }

    #[test]
    fn test_closure_observer() {
        let seen: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let observer = |update: &ProgressUpdate| {
            seen.lock().unwrap().push(update.message.clone());
        };
        report(&observer, Stage::Parsing, Some(50.0), "halfway");
        assert_eq!(seen.lock().unwrap().as_slice(), ["halfway"]);
    }

    #[test]
    fn test_deadline() {
        let deadline = Deadline::after(Duration::from_secs(3600));
        assert!(!deadline.expired());
        assert!(deadline.check("ingestion").is_ok());
        let expired = Deadline::after(Duration::ZERO);
        assert!(expired.check("ingestion").is_err());
    }
}
