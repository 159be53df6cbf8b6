//! Log file retention management
//!
//! Caps the number of dated log files in a directory by deleting the oldest ones,
//! ordered by the date embedded in their names. The sweep is not transactional:
//! when a deletion fails, the files already removed stay removed.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use super::file_writer::rotated_sibling;
use crate::config::LOG_FILE_EXTENSION;
use crate::error::{LogError, Result};

/// Default number of dated log files kept by a sweep
pub const DEFAULT_MAX_NUM_LOG: usize = 100;

/// Receives notice of every deletion a sweep performs
pub trait SweepObserver {
    /// Called right before `path` is deleted, so open handles on it can be released
    fn before_delete(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    /// Called once per deleted file; `rotated` marks a `.log.N` sibling
    fn deleted(&self, path: &Path, rotated: bool);
}

/// A primary log file and the date embedded in its name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileEntry {
    pub path: PathBuf,
    pub date: NaiveDate,
}

impl LogFileEntry {
    /// Parse the `YYYYMMDD` date that ends four characters before the end of the name
    ///
    /// Names that do not follow `app_<YYYYMMDD>.log` fail instead of being skipped.
    pub fn parse(path: PathBuf) -> Result<Self> {
        let invalid = |path: PathBuf| LogError::FilenameParse { path };

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Err(invalid(path));
        };
        let stamp = name
            .len()
            .checked_sub(12)
            .and_then(|start| name.get(start..name.len() - 4));
        let date = stamp
            .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y%m%d").ok());

        match date {
            Some(date) => Ok(Self { path, date }),
            None => Err(invalid(path)),
        }
    }
}

/// Primary log files (`*.log`) in `logs_dir`, sorted by file name
///
/// Rotated siblings (`*.log.1`) and non-files are not listed. A missing
/// directory yields an empty list.
pub fn list_log_files(logs_dir: &Path) -> Result<Vec<PathBuf>> {
    if !logs_dir.exists() {
        return Ok(Vec::new());
    }

    let read_error =
        |e: std::io::Error| LogError::filesystem("Failed to read log directory", logs_dir, e);
    let mut logs = Vec::new();
    for entry in fs::read_dir(logs_dir).map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        let path = entry.path();

        if !entry.file_type().map_err(read_error)?.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(LOG_FILE_EXTENSION) {
            continue;
        }
        logs.push(path);
    }

    logs.sort();
    Ok(logs)
}

/// Delete the oldest dated log files until at most `max_num_log` remain
///
/// Siblings `name.log.1 ..= name.log.{backup_count}` of every deleted file are
/// removed too. Files with equal dates keep file-name order. Every file name is
/// parsed before anything is deleted. Returns the deleted paths in deletion order.
pub fn sweep(
    logs_dir: &Path,
    max_num_log: usize,
    backup_count: u32,
    observer: &dyn SweepObserver,
) -> Result<Vec<PathBuf>> {
    let logs = list_log_files(logs_dir)?;
    if logs.len() <= max_num_log {
        return Ok(Vec::new());
    }

    let mut entries = logs
        .into_iter()
        .map(LogFileEntry::parse)
        .collect::<Result<Vec<_>>>()?;
    // Stable: equal dates keep the name order from the listing
    entries.sort_by_key(|entry| entry.date);

    let num_to_remove = entries.len() - max_num_log;
    let mut deleted = Vec::new();

    for entry in entries.into_iter().take(num_to_remove) {
        remove(&entry.path, observer)?;
        observer.deleted(&entry.path, false);
        deleted.push(entry.path.clone());

        for index in 1..=backup_count {
            let sibling = rotated_sibling(&entry.path, index);
            if sibling.exists() {
                remove(&sibling, observer)?;
                observer.deleted(&sibling, true);
                deleted.push(sibling);
            }
        }
    }

    Ok(deleted)
}

fn remove(path: &Path, observer: &dyn SweepObserver) -> Result<()> {
    observer.before_delete(path)?;
    fs::remove_file(path).map_err(|source| LogError::Deletion {
        path: path.to_path_buf(),
        source,
    })
}
