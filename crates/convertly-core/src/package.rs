use std::collections::HashSet;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Error, Result};
use crate::record::FileRecord;
use crate::store::FileSet;
use crate::{Notice, NoticeCallback};

/// Fixed name of the bulk download.
pub const ARCHIVE_NAME: &str = "converted_images.zip";

/// `name` if `taken` rejects it, else the first free `stem(n).ext`.
fn free_name(name: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(name) {
        return name.to_string();
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    (1u32..)
        .map(|n| match ext {
            Some(ext) => format!("{}({}).{}", stem, n, ext),
            None => format!("{}({})", stem, n),
        })
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| name.to_string())
}

fn free_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(free_name(name, |n| dir.join(n).exists()))
}

/// Bundle `(file_name, bytes)` pairs into an in-memory zip.
///
/// Entries are stored uncompressed since the payloads are already encoded
/// images. A repeated name gets a `(n)` suffix so no output is lost.
pub fn build_archive<'a>(entries: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Result<Vec<u8>> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut used: HashSet<String> = HashSet::new();

    for (name, data) in entries {
        let name = free_name(name, |n| used.contains(n));
        writer.start_file(name.as_str(), options)?;
        writer
            .write_all(data)
            .map_err(|e| Error::Archive(format!("{}: {}", name, e)))?;
        used.insert(name);
    }

    Ok(writer.finish()?.into_inner())
}

/// Write the archive of every done record into `dir`. Returns its path.
///
/// Only offered once every record is done or failed; a batch that was
/// cancelled or is still running is refused.
pub fn save_archive(store: &FileSet, dir: &Path, notify: &NoticeCallback<'_>) -> Result<PathBuf> {
    let done = store.done_results();
    if done.is_empty() {
        notify(&Notice::error(
            "No converted files",
            "There are no successfully converted images to download.",
        ));
        return Err(Error::Archive("no converted files".to_string()));
    }
    if !store.all_finished() {
        let waiting = store.snapshot().iter().filter(|r| !r.status.is_terminal()).count();
        notify(&Notice::error(
            "Conversion not finished",
            format!("{} file(s) have not finished converting.", waiting),
        ));
        return Err(Error::Archive(format!("{} file(s) not finished", waiting)));
    }

    notify(&Notice::info(
        "Zipping files...",
        format!("Packaging {} images.", done.len()),
    ));

    let written = build_archive(
        done.iter()
            .map(|(_, result)| (result.file_name.as_str(), result.data.as_slice())),
    )
    .and_then(|bytes| {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        let path = free_path(dir, ARCHIVE_NAME);
        fs::write(&path, bytes).map_err(|e| Error::io(&path, e))?;
        Ok(path)
    });

    match written {
        Ok(path) => {
            info!(path = %path.display(), entries = done.len(), "archive written");
            notify(&Notice::info(
                "Archive saved",
                format!("Saved {}.", path.display()),
            ));
            Ok(path)
        }
        Err(err) => {
            warn!(error = %err, "zipping failed");
            notify(&Notice::error("Zipping Failed", "Could not create the zip file."));
            Err(err)
        }
    }
}

/// Save one record's converted output into `dir`, without overwriting.
/// The file takes the source's modification time.
pub fn save_result(record: &FileRecord, dir: &Path) -> Result<PathBuf> {
    let Some(result) = &record.result else {
        return Err(Error::Validation(format!(
            "\"{}\" has not been converted",
            record.source.name
        )));
    };

    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    let path = free_path(dir, &result.file_name);
    fs::write(&path, result.data.as_slice()).map_err(|e| Error::io(&path, e))?;

    if let Some(modified) = record.source.modified {
        let ft = filetime::FileTime::from_unix_time(modified.timestamp(), 0);
        filetime::set_file_mtime(&path, ft).ok();
    }
    Ok(path)
}

/// Save every done record individually. Stops at the first write error.
pub fn save_all(store: &FileSet, dir: &Path) -> Result<Vec<PathBuf>> {
    store
        .done_results()
        .iter()
        .map(|(record, _)| save_result(record, dir))
        .collect()
}
