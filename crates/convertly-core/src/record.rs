use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::advisor::AdvisorResponse;
use crate::settings::ConversionSettings;

/// Session-unique record id: `<name>-<mtime millis>-<index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FileId(String);

impl FileId {
    pub fn new(name: &str, modified: Option<DateTime<Utc>>, index: usize) -> Self {
        let millis = modified.map_or(0, |m| m.timestamp_millis());
        Self(format!("{}-{}-{}", name, millis, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a record. `Done` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Converting,
    Done,
    Error,
}

impl FileStatus {
    pub fn is_terminal(self) -> bool {
        match self {
            FileStatus::Done | FileStatus::Error => true,
            FileStatus::Pending | FileStatus::Converting => false,
        }
    }
}

/// The original payload as selected by the user.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Just the filename
    pub name: String,
    pub modified: Option<DateTime<Utc>>,
    /// File size in bytes
    pub size: u64,
    pub mime: String,
}

/// Display-only reference to the original. Released with its record.
#[derive(Debug, Clone)]
pub struct Preview {
    path: PathBuf,
}

impl Preview {
    pub(crate) fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Output of a successful conversion.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    /// Re-encoded image bytes.
    pub data: Arc<Vec<u8>>,
    /// Original base name with the target extension.
    pub file_name: String,
    pub rationale: String,
    pub advice: AdvisorResponse,
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: FileId,
    pub source: SourceFile,
    pub preview: Preview,
    pub status: FileStatus,
    /// 0-100, non-decreasing within one attempt.
    pub progress: u8,
    pub result: Option<ConversionResult>,
    pub settings: ConversionSettings,
    /// Attempts started so far (retries included).
    pub attempts: u32,
}

impl FileRecord {
    pub fn new(id: FileId, source: SourceFile, settings: ConversionSettings) -> Self {
        let preview = Preview::new(&source.path);
        Self {
            id,
            source,
            preview,
            status: FileStatus::Pending,
            progress: 0,
            result: None,
            settings,
            attempts: 0,
        }
    }

    /// Start (or restart, on retry) an attempt. Progress resets to 0.
    pub fn begin_attempt(&mut self) -> bool {
        match self.status {
            FileStatus::Pending | FileStatus::Converting => {
                self.status = FileStatus::Converting;
                self.progress = 0;
                self.attempts += 1;
                true
            }
            FileStatus::Done | FileStatus::Error => false,
        }
    }

    /// Raise progress within the current attempt. Lower values are ignored.
    pub fn advance(&mut self, progress: u8) -> bool {
        match self.status {
            FileStatus::Converting => {
                self.progress = self.progress.max(progress.min(100));
                true
            }
            FileStatus::Pending | FileStatus::Done | FileStatus::Error => false,
        }
    }

    pub fn finish(&mut self, result: ConversionResult) -> bool {
        match self.status {
            FileStatus::Converting => {
                self.status = FileStatus::Done;
                self.progress = 100;
                self.result = Some(result);
                true
            }
            FileStatus::Pending | FileStatus::Done | FileStatus::Error => false,
        }
    }

    /// Mark the record failed. Allowed from `Pending` too, for settings
    /// rejected before any attempt starts.
    pub fn fail(&mut self) -> bool {
        match self.status {
            FileStatus::Pending | FileStatus::Converting => {
                self.status = FileStatus::Error;
                self.progress = 0;
                true
            }
            FileStatus::Done | FileStatus::Error => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::settings::TargetFormat;

    pub(crate) fn record(name: &str, index: usize) -> FileRecord {
        let source = SourceFile {
            path: PathBuf::from(format!("/photos/{name}")),
            name: name.to_string(),
            modified: DateTime::from_timestamp(1_700_000_000, 0),
            size: 1024,
            mime: "image/png".to_string(),
        };
        FileRecord::new(
            FileId::new(name, source.modified, index),
            source,
            ConversionSettings::default(),
        )
    }

    pub(crate) fn result(file_name: &str) -> ConversionResult {
        ConversionResult {
            data: Arc::new(vec![1, 2, 3]),
            file_name: file_name.to_string(),
            rationale: "kept as is".to_string(),
            advice: AdvisorResponse {
                adjusted_lossless: false,
                adjusted_compression_speed: 5,
                optimization_rationale: "kept as is".to_string(),
            },
        }
    }

    #[test]
    fn test_file_id_format() {
        let id = FileId::new("a.png", DateTime::from_timestamp(1, 500_000_000), 2);
        assert_eq!(id.as_str(), "a.png-1500-2");
        assert_eq!(FileId::new("a.png", None, 0).as_str(), "a.png-0-0");
    }

    #[test]
    fn test_lifecycle() {
        let mut r = record("a.png", 0);
        assert_eq!(r.status, FileStatus::Pending);
        assert_eq!(r.settings.target_format, TargetFormat::Webp);
        assert!(!r.advance(10));

        assert!(r.begin_attempt());
        assert!(r.advance(30));
        assert!(r.advance(10));
        assert_eq!(r.progress, 30);

        // retry restarts the attempt
        assert!(r.begin_attempt());
        assert_eq!(r.progress, 0);
        assert_eq!(r.attempts, 2);

        assert!(r.finish(result("a.webp")));
        assert_eq!(r.status, FileStatus::Done);
        assert_eq!(r.progress, 100);
        assert!(!r.fail());
        assert!(!r.begin_attempt());
    }

    #[test]
    fn test_fail_is_terminal() {
        let mut r = record("a.png", 0);
        r.begin_attempt();
        r.advance(60);
        assert!(r.fail());
        assert_eq!(r.progress, 0);
        assert!(r.status.is_terminal());
        assert!(!r.finish(result("a.webp")));
    }

    #[test]
    fn test_fail_before_any_attempt() {
        let mut r = record("a.png", 0);
        assert!(r.fail());
        assert_eq!(r.status, FileStatus::Error);
        assert_eq!(r.attempts, 0);
        assert!(!r.begin_attempt());
        assert!(!r.fail());
    }
}
