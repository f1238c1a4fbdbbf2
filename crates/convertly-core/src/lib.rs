pub mod advisor;
pub mod batch;
pub mod cancel;
pub mod convert;
pub mod error;
pub mod intake;
pub mod metadata;
pub mod package;
pub mod pipeline;
pub mod record;
pub mod retry;
pub mod settings;
pub mod store;

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub use advisor::{Advisor, AdvisorConfig, AdvisorRequest, AdvisorResponse};
pub use batch::{run_batch, BatchOptions, BatchSummary};
pub use cancel::CancellationToken;
pub use error::{Error, Result};
pub use record::{ConversionResult, FileId, FileRecord, FileStatus};
pub use retry::RetryPolicy;
pub use settings::{ConversionSettings, TargetFormat};
pub use store::FileSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A transient, user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub description: String,
}

impl Notice {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Type alias for notice callback
pub type NoticeCallback<'a> = dyn Fn(&Notice) + Send + Sync + 'a;

/// Overall batch progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    /// 0.0-100.0, never decreases within one batch.
    pub percent: f64,
    /// Files that reached a terminal status (or were removed).
    pub finished: u64,
    pub total: u64,
    pub message: String,
}

/// Type alias for progress callback
pub type ProgressCallback<'a> = dyn Fn(&Progress) + Send + Sync + 'a;

/// Throttled progress reporter. Emits at most every 200ms, or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback<'a>,
    last_emit: Mutex<Option<Instant>>,
    interval: Duration,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback<'a>) -> Self {
        Self::with_interval(inner, Duration::from_millis(200))
    }

    pub fn with_interval(inner: &'a ProgressCallback<'a>, interval: Duration) -> Self {
        Self {
            inner,
            last_emit: Mutex::new(None),
            interval,
        }
    }

    pub fn report(&self, progress: &Progress) {
        let is_done = progress.finished >= progress.total;
        {
            let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
            if !is_done && last.is_some_and(|t| t.elapsed() < self.interval) {
                return;
            }
            *last = Some(Instant::now());
        }
        (self.inner)(progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(finished: u64, total: u64) -> Progress {
        Progress {
            percent: 0.0,
            finished,
            total,
            message: String::new(),
        }
    }

    #[test]
    fn test_throttle_always_emits_completion() {
        let seen = Mutex::new(Vec::new());
        let cb = |p: &Progress| seen.lock().unwrap().push(p.finished);
        let tp = ThrottledProgress::with_interval(&cb, Duration::from_secs(60));

        tp.report(&progress(0, 3));
        tp.report(&progress(1, 3));
        tp.report(&progress(2, 3));
        tp.report(&progress(3, 3));

        assert_eq!(*seen.lock().unwrap(), vec![0, 3]);
    }
}
