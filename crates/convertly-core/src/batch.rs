use std::collections::HashMap;
use std::sync::Mutex;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::info;

use crate::advisor::Advisor;
use crate::cancel::CancellationToken;
use crate::pipeline::{Outcome, Pipeline};
use crate::record::FileId;
use crate::retry::RetryPolicy;
use crate::store::FileSet;
use crate::{Notice, NoticeCallback, Progress, ProgressCallback, ThrottledProgress};

/// Knobs for one orchestration pass.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub retry: RetryPolicy,
    /// Files converted at once. `None` runs every pending file concurrently.
    pub max_concurrency: Option<usize>,
    pub cancel: Option<CancellationToken>,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub converted: u64,
    pub failed: u64,
    /// Removed from the set while in flight.
    pub removed: u64,
    /// Left pending because the batch was cancelled first.
    pub skipped: u64,
}

/// Overall progress: mean of each file's best-seen progress, with finished
/// files pinned at 100. Keyed by id so removals and retries cannot move it
/// backwards.
struct Aggregate<'a> {
    best: Mutex<HashMap<FileId, u8>>,
    finished: Mutex<u64>,
    total: u64,
    reporter: ThrottledProgress<'a>,
}

impl<'a> Aggregate<'a> {
    fn new(ids: &[FileId], callback: &'a ProgressCallback<'a>) -> Self {
        Self {
            best: Mutex::new(ids.iter().map(|id| (id.clone(), 0)).collect()),
            finished: Mutex::new(0),
            total: ids.len() as u64,
            reporter: ThrottledProgress::new(callback),
        }
    }

    fn snapshot(&self, message: &str) -> Progress {
        let sum: u64 = self
            .best
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|&p| u64::from(p))
            .sum();
        let percent = if self.total == 0 {
            100.0
        } else {
            sum as f64 / self.total as f64
        };
        Progress {
            percent,
            finished: *self.finished.lock().unwrap_or_else(|e| e.into_inner()),
            total: self.total,
            message: message.to_string(),
        }
    }

    fn file_progress(&self, id: &FileId, progress: u8) {
        {
            let mut best = self.best.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(p) = best.get_mut(id) {
                *p = (*p).max(progress);
            }
        }
        self.reporter.report(&self.snapshot("Converting"));
    }

    fn file_finished(&self, id: &FileId, name: &str) {
        self.best
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), 100);
        *self.finished.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        self.reporter.report(&self.snapshot(&format!("Finished {}", name)));
    }
}

/// Convert every pending record in `store`.
///
/// Files run concurrently (bounded by `max_concurrency`). One file failing,
/// even permanently, never stops the others; retries happen inside each
/// file's pipeline, not here.
pub async fn run_batch(
    store: &FileSet,
    advisor: &dyn Advisor,
    options: &BatchOptions,
    notify: &NoticeCallback<'_>,
    progress: &ProgressCallback<'_>,
) -> BatchSummary {
    if store.is_empty() {
        notify(&Notice::error("No files selected", "Please add images to convert."));
        return BatchSummary::default();
    }

    let ids = store.pending_ids();
    let limit = options.max_concurrency.unwrap_or(ids.len()).max(1);
    info!(pending = ids.len(), concurrency = limit, "starting batch");

    let aggregate = Aggregate::new(&ids, progress);
    let on_progress = |id: &FileId, p: u8| aggregate.file_progress(id, p);
    let pipeline = Pipeline {
        store,
        advisor,
        retry: &options.retry,
        notify,
        on_progress: &on_progress,
    };
    let cancel = options.cancel.as_ref();

    let outcomes: Vec<Option<Outcome>> = stream::iter(ids.iter())
        .map(|id| {
            let pipeline = &pipeline;
            let aggregate = &aggregate;
            async move {
                if cancel.is_some_and(CancellationToken::is_cancelled) {
                    return None;
                }
                let name = store.get(id).map(|r| r.source.name).unwrap_or_default();
                let outcome = pipeline.run(id).await;
                aggregate.file_finished(id, &name);
                Some(outcome)
            }
        })
        .buffer_unordered(limit)
        .collect()
        .await;

    let mut summary = BatchSummary::default();
    for outcome in outcomes {
        match outcome {
            Some(Outcome::Done) => summary.converted += 1,
            Some(Outcome::Failed) => summary.failed += 1,
            Some(Outcome::Removed) => summary.removed += 1,
            None => summary.skipped += 1,
        }
    }

    if summary.skipped > 0 {
        notify(&Notice::info(
            "Conversion cancelled",
            format!("{} file(s) were left pending.", summary.skipped),
        ));
    }
    progress(&aggregate.snapshot("Batch finished"));

    info!(
        converted = summary.converted,
        failed = summary.failed,
        removed = summary.removed,
        skipped = summary.skipped,
        "batch finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::tests::{ok_response, ScriptedAdvisor};
    use crate::advisor::{AdvisorRequest, AdvisorResponse};
    use crate::convert::tests::sample_png;
    use crate::error::Error;
    use crate::intake::intake_paths;
    use crate::record::FileStatus;
    use crate::settings::{ConversionSettings, TargetFormat};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn queue(store: &FileSet, count: usize) -> (TempDir, Vec<FileId>) {
        let dir = tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..count)
            .map(|i| {
                let p = dir.path().join(format!("img{i}.png"));
                std::fs::write(&p, sample_png(8, 8)).unwrap();
                p
            })
            .collect();
        let intake = intake_paths(&paths, ConversionSettings::default(), &|_| {});
        let ids = intake.records.iter().map(|r| r.id.clone()).collect();
        store.extend(intake.records);
        (dir, ids)
    }

    fn options() -> BatchOptions {
        BatchOptions::new().with_retry(RetryPolicy::linear(3, Duration::from_millis(2)))
    }

    /// Always overloaded for JPEG targets.
    struct JpegHater {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Advisor for JpegHater {
        async fn advise(&self, request: &AdvisorRequest) -> crate::Result<AdvisorResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.target_format == TargetFormat::Jpeg {
                return Err(Error::ServiceUnavailable("503".into()));
            }
            ok_response()
        }
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_siblings() {
        let store = FileSet::new();
        let (_dir, ids) = queue(&store, 4);
        store.update(&ids[2], |r| r.settings.target_format = TargetFormat::Jpeg);
        let advisor = JpegHater {
            calls: AtomicU32::new(0),
        };

        let observed = Mutex::new(Vec::new());
        let progress_cb = |p: &Progress| {
            observed
                .lock()
                .unwrap()
                .push((p.percent, p.finished, store.all_finished()));
        };
        assert!(!store.all_finished());

        let summary = run_batch(&store, &advisor, &options(), &|_| {}, &progress_cb).await;

        assert_eq!(summary.converted, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(advisor.calls.load(Ordering::SeqCst), 3 + 3);
        for (i, id) in ids.iter().enumerate() {
            let expected = if i == 2 { FileStatus::Error } else { FileStatus::Done };
            assert_eq!(store.get(id).unwrap().status, expected);
        }
        assert!(store.all_finished());

        let observed = observed.into_inner().unwrap();
        let mut last = 0.0;
        for &(percent, finished, all_finished) in &observed {
            assert!(percent >= last, "progress went backwards: {last} -> {percent}");
            last = percent;
            if finished == 4 {
                assert!(all_finished);
            }
        }
        assert_eq!(last, 100.0);
    }

    #[tokio::test]
    async fn test_sequential_limit() {
        let store = FileSet::new();
        let (_dir, ids) = queue(&store, 3);
        let advisor = ScriptedAdvisor::always_ok();

        let summary = run_batch(
            &store,
            &advisor,
            &options().with_max_concurrency(1),
            &|_| {},
            &|_| {},
        )
        .await;

        assert_eq!(summary.converted, 3);
        assert_eq!(advisor.calls(), 3);
        assert!(ids.iter().all(|id| store.get(id).unwrap().status == FileStatus::Done));
    }

    #[tokio::test]
    async fn test_only_pending_records_run() {
        let store = FileSet::new();
        let (_dir, ids) = queue(&store, 2);
        store.update(&ids[0], |r| r.fail());
        let advisor = ScriptedAdvisor::always_ok();

        let summary = run_batch(&store, &advisor, &options(), &|_| {}, &|_| {}).await;

        assert_eq!(summary.converted, 1);
        assert_eq!(advisor.calls(), 1);
        assert_eq!(store.get(&ids[0]).unwrap().status, FileStatus::Error);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = FileSet::new();
        let (_dir, ids) = queue(&store, 2);
        let token = CancellationToken::new();
        token.cancel();
        let advisor = ScriptedAdvisor::always_ok();

        let summary = run_batch(
            &store,
            &advisor,
            &options().with_cancel_token(token),
            &|_| {},
            &|_| {},
        )
        .await;

        assert_eq!(summary.skipped, 2);
        assert_eq!(advisor.calls(), 0);
        assert!(ids.iter().all(|id| store.get(id).unwrap().status == FileStatus::Pending));
        assert!(!store.all_finished());
    }

    #[tokio::test]
    async fn test_empty_set_notifies() {
        let store = FileSet::new();
        let advisor = ScriptedAdvisor::always_ok();
        let notices = Mutex::new(Vec::new());
        let notify = |n: &Notice| notices.lock().unwrap().push(n.title.clone());

        let summary = run_batch(&store, &advisor, &options(), &notify, &|_| {}).await;

        assert_eq!(summary, BatchSummary::default());
        assert_eq!(notices.into_inner().unwrap(), vec!["No files selected".to_string()]);
    }
}
