use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::Error;
use crate::record::{FileId, FileRecord, SourceFile};
use crate::settings::ConversionSettings;
use crate::{Notice, NoticeCallback};

/// Outcome of one selection (picker or drop).
#[derive(Debug, Default)]
pub struct IntakeResult {
    /// Records queued as `Pending`, in selection order.
    pub records: Vec<FileRecord>,
    /// Files that were turned away, each already reported as a notice.
    pub rejected: Vec<Error>,
}

fn guess_mime(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first()
        .map_or_else(|| "application/octet-stream".to_string(), |m| m.essence_str().to_string())
}

fn is_image_mime(mime: &str) -> bool {
    mime.starts_with("image/")
}

fn read_source(path: &Path) -> Result<SourceFile, Error> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mime = guess_mime(&name);
    if !is_image_mime(&mime) {
        return Err(Error::InvalidFileType { name, mime });
    }

    let meta = std::fs::metadata(path).map_err(|e| Error::io(path, e))?;
    if !meta.is_file() {
        return Err(Error::InvalidFileType {
            name,
            mime: "inode/directory".to_string(),
        });
    }
    let modified = meta.modified().ok().map(DateTime::<Utc>::from);

    Ok(SourceFile {
        path: path.to_path_buf(),
        name,
        modified,
        size: meta.len(),
        mime,
    })
}

/// Turn a selection of paths into pending records carrying `settings`.
///
/// Non-image files are rejected one by one; the rest of the selection is
/// still queued.
pub fn intake_paths(
    paths: &[PathBuf],
    settings: ConversionSettings,
    notify: &NoticeCallback<'_>,
) -> IntakeResult {
    let mut result = IntakeResult::default();

    for (index, path) in paths.iter().enumerate() {
        match read_source(path) {
            Ok(source) => {
                let id = FileId::new(&source.name, source.modified, index);
                result.records.push(FileRecord::new(id, source, settings));
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "rejected at intake");
                let notice = match &err {
                    Error::InvalidFileType { name, .. } => Notice::error(
                        "Error: Invalid File Type",
                        format!("File \"{}\" is not a valid image.", name),
                    ),
                    other => Notice::error("Error: Unreadable File", other.to_string()),
                };
                notify(&notice);
                result.rejected.push(err);
            }
        }
    }

    info!(
        queued = result.records.len(),
        rejected = result.rejected.len(),
        "intake complete"
    );
    result
}
