use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::Result;
use crate::record::{ConversionResult, FileId, FileRecord, FileStatus};
use crate::settings::ConversionSettings;
use crate::{Notice, NoticeCallback};

/// Shared, id-keyed set of records for one session.
///
/// Every mutation goes through an id lookup under the lock, so concurrent
/// completions merge into the current state instead of overwriting it, and an
/// update for a removed id is a no-op.
#[derive(Debug, Clone, Default)]
pub struct FileSet {
    inner: Arc<Mutex<Vec<FileRecord>>>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, Vec<FileRecord>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append records, skipping ids already present.
    pub fn extend(&self, new_records: impl IntoIterator<Item = FileRecord>) -> usize {
        let mut records = self.records();
        let mut added = 0;
        for record in new_records {
            if records.iter().any(|r| r.id == record.id) {
                debug!(id = %record.id, "skipping duplicate record");
                continue;
            }
            records.push(record);
            added += 1;
        }
        added
    }

    /// Remove a record. Its preview handle is released with it.
    pub fn remove(&self, id: &FileId) -> Option<FileRecord> {
        let mut records = self.records();
        let pos = records.iter().position(|r| &r.id == id)?;
        Some(records.remove(pos))
    }

    /// Drop every record.
    pub fn reset(&self) {
        self.records().clear();
    }

    /// Apply `f` to the record with `id`. Returns `None` when the id is gone.
    pub fn update<T>(&self, id: &FileId, f: impl FnOnce(&mut FileRecord) -> T) -> Option<T> {
        let mut records = self.records();
        records.iter_mut().find(|r| &r.id == id).map(f)
    }

    pub fn get(&self, id: &FileId) -> Option<FileRecord> {
        self.records().iter().find(|r| &r.id == id).cloned()
    }

    pub fn contains(&self, id: &FileId) -> bool {
        self.records().iter().any(|r| &r.id == id)
    }

    pub fn snapshot(&self) -> Vec<FileRecord> {
        self.records().clone()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Copy `settings` onto every record that has not started converting.
    /// Invalid settings are rejected before anything changes.
    pub fn apply_settings_to_all(
        &self,
        settings: ConversionSettings,
        notify: &NoticeCallback<'_>,
    ) -> Result<usize> {
        settings.validate()?;
        let mut records = self.records();
        let mut applied = 0;
        for record in records.iter_mut() {
            match record.status {
                FileStatus::Pending => {
                    record.settings = settings;
                    applied += 1;
                }
                FileStatus::Converting | FileStatus::Done | FileStatus::Error => {}
            }
        }
        drop(records);
        notify(&Notice::info(
            "Settings Applied",
            "The current settings have been applied to all uploaded images.",
        ));
        Ok(applied)
    }

    pub fn pending_ids(&self) -> Vec<FileId> {
        self.records()
            .iter()
            .filter(|r| r.status == FileStatus::Pending)
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.records()
            .iter()
            .filter(|r| r.status == FileStatus::Pending)
            .count()
    }

    /// True when the set is non-empty and every record is terminal.
    /// Gates the bulk download.
    pub fn all_finished(&self) -> bool {
        let records = self.records();
        !records.is_empty() && records.iter().all(|r| r.status.is_terminal())
    }

    /// Results of every record in `Done`, in selection order.
    pub fn done_results(&self) -> Vec<(FileRecord, ConversionResult)> {
        self.records()
            .iter()
            .filter(|r| r.status == FileStatus::Done)
            .filter_map(|r| r.result.clone().map(|res| (r.clone(), res)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::{record, result};
    use crate::settings::TargetFormat;

    #[test]
    fn test_update_after_remove_is_noop() {
        let set = FileSet::new();
        let a = record("a.png", 0);
        let id = a.id.clone();
        set.extend([a, record("b.png", 1)]);

        assert!(set.update(&id, |r| r.begin_attempt()).unwrap());
        assert!(set.remove(&id).is_some());
        assert!(set.update(&id, |r| r.finish(result("a.webp"))).is_none());
        assert_eq!(set.len(), 1);
        assert!(!set.contains(&id));
        assert!(set.remove(&id).is_none());
    }

    #[test]
    fn test_extend_skips_duplicate_ids() {
        let set = FileSet::new();
        assert_eq!(set.extend([record("a.png", 0)]), 1);
        assert_eq!(set.extend([record("a.png", 0), record("a.png", 1)]), 1);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_apply_settings_to_pending_only() {
        let set = FileSet::new();
        let a = record("a.png", 0);
        let a_id = a.id.clone();
        let b = record("b.png", 1);
        let b_id = b.id.clone();
        set.extend([a, b]);
        set.update(&a_id, |r| r.begin_attempt());

        let settings = ConversionSettings {
            target_format: TargetFormat::Png,
            ..ConversionSettings::default()
        };
        let notices = std::sync::Mutex::new(Vec::new());
        let notify = |n: &Notice| notices.lock().unwrap().push(n.title.clone());
        assert_eq!(set.apply_settings_to_all(settings, &notify).unwrap(), 1);
        assert_eq!(notices.into_inner().unwrap(), vec!["Settings Applied"]);
        assert_eq!(set.get(&a_id).unwrap().settings.target_format, TargetFormat::Webp);
        assert_eq!(set.get(&b_id).unwrap().settings.target_format, TargetFormat::Png);

        let bad = ConversionSettings {
            compression_speed: 0,
            ..settings
        };
        assert!(set.apply_settings_to_all(bad, &|_| {}).is_err());
        assert_eq!(set.get(&b_id).unwrap().settings.compression_speed, 5);
    }

    #[test]
    fn test_all_finished() {
        let set = FileSet::new();
        assert!(!set.all_finished());

        let a = record("a.png", 0);
        let a_id = a.id.clone();
        let b = record("b.png", 1);
        let b_id = b.id.clone();
        set.extend([a, b]);
        assert_eq!(set.pending_count(), 2);

        set.update(&a_id, |r| {
            r.begin_attempt();
            r.finish(result("a.webp"))
        });
        assert!(!set.all_finished());

        set.update(&b_id, |r| r.fail());
        assert!(set.all_finished());
        assert_eq!(set.done_results().len(), 1);

        set.reset();
        assert!(set.is_empty());
        assert!(!set.all_finished());
    }
}
