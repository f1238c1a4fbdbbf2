use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::advisor::{Advisor, AdvisorRequest, AdvisorResponse};
use crate::convert::{self, EncodeOptions};
use crate::error::Error;
use crate::record::{ConversionResult, FileId, FileRecord};
use crate::retry::{retry, RetryPolicy};
use crate::store::FileSet;
use crate::{Notice, NoticeCallback};

/// Per-file progress checkpoints.
pub const PROGRESS_STARTED: u8 = 10;
pub const PROGRESS_ADVISED: u8 = 30;
pub const PROGRESS_DECODED: u8 = 60;
pub const PROGRESS_DONE: u8 = 100;

/// How one file's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed,
    /// The record left the set while its work was in flight.
    Removed,
}

/// Type alias for per-file progress hook: (id, percent)
pub type FileProgressCallback<'a> = dyn Fn(&FileId, u8) + Send + Sync + 'a;

/// Everything a single-file conversion needs.
pub struct Pipeline<'a> {
    pub store: &'a FileSet,
    pub advisor: &'a dyn Advisor,
    pub retry: &'a RetryPolicy,
    pub notify: &'a NoticeCallback<'a>,
    pub on_progress: &'a FileProgressCallback<'a>,
}

impl<'a> Pipeline<'a> {
    /// Raise the record's progress. `false` once the record is gone.
    fn advance(&self, id: &FileId, progress: u8) -> bool {
        match self.store.update(id, |r| r.advance(progress)) {
            Some(true) => {
                (self.on_progress)(id, progress);
                true
            }
            Some(false) | None => false,
        }
    }

    fn begin_attempt(&self, id: &FileId) -> bool {
        match self.store.update(id, |r| r.begin_attempt()) {
            Some(true) => {
                (self.on_progress)(id, 0);
                self.advance(id, PROGRESS_STARTED)
            }
            Some(false) | None => false,
        }
    }

    fn fail(&self, record: &FileRecord, err: Error) -> Outcome {
        match self.store.update(&record.id, |r| r.fail()) {
            Some(true) => {
                warn!(id = %record.id, file = %record.source.name, error = %err, "conversion failed");
                (self.notify)(&Notice::error(
                    format!("Conversion Failed for {}", record.source.name),
                    err.to_string(),
                ));
                Outcome::Failed
            }
            Some(false) | None => {
                debug!(id = %record.id, error = %err, "dropping failure for removed record");
                Outcome::Removed
            }
        }
    }

    async fn advise(&self, id: &FileId, request: AdvisorRequest) -> Result<AdvisorResponse, Error> {
        retry(self.retry, Error::is_transient, |attempt| async move {
            if !self.begin_attempt(id) {
                return Err(Error::Cancelled);
            }
            debug!(%id, attempt, "asking advisor");
            self.advisor.advise(&request).await
        })
        .await
    }

    /// Convert one pending record: advisor call (retried on overload), decode,
    /// re-encode, then attach the result. Every state change is an id-keyed
    /// update, so a record removed mid-flight is never resurrected.
    pub async fn run(&self, id: &FileId) -> Outcome {
        let Some(record) = self.store.get(id) else {
            return Outcome::Removed;
        };
        let settings = record.settings;
        if let Err(err) = settings.validate() {
            return self.fail(&record, err);
        }

        let advice = match self.advise(id, AdvisorRequest::from(&settings)).await {
            Ok(advice) => advice,
            Err(Error::Cancelled) => return Outcome::Removed,
            Err(err) => return self.fail(&record, err),
        };
        if !self.advance(id, PROGRESS_ADVISED) {
            return Outcome::Removed;
        }

        let bytes = match convert::read_source(&record.source.path).await {
            Ok(bytes) => bytes,
            Err(err) => return self.fail(&record, err),
        };
        let image = match convert::blocking(move || convert::decode(&bytes)).await {
            Ok(image) => image,
            Err(err) => return self.fail(&record, err),
        };
        if !self.advance(id, PROGRESS_DECODED) {
            return Outcome::Removed;
        }

        let options = EncodeOptions {
            format: settings.target_format,
            lossless: advice.adjusted_lossless,
            speed: advice.adjusted_compression_speed,
        };
        let data = match convert::blocking(move || convert::encode(&image, options)).await {
            Ok(data) => data,
            Err(err) => return self.fail(&record, err),
        };

        let size_kb = data.len().div_ceil(1024);
        let file_name = convert::output_file_name(&record.source.name, settings.target_format);
        info!(
            id = %id,
            file = %file_name,
            source_bytes = record.source.size,
            output_bytes = data.len(),
            within_limit = size_kb <= settings.max_file_size_kb as usize,
            "converted"
        );

        let result = ConversionResult {
            data: Arc::new(data),
            file_name,
            rationale: advice.optimization_rationale.clone(),
            advice,
        };
        match self.store.update(id, |r| r.finish(result)) {
            Some(true) => {
                (self.on_progress)(id, PROGRESS_DONE);
                Outcome::Done
            }
            Some(false) | None => {
                debug!(%id, "discarding result for removed record");
                Outcome::Removed
            }
        }
    }
}
