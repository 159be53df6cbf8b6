//! Sinks that formatted records are written to
//!
//! The rotating file sink follows the size-triggered scheme: once the next record
//! would push the active file past `max_bytes`, `name.log.{n}` shifts to
//! `name.log.{n+1}` (the oldest falls off), the active file becomes `name.log.1`
//! and a fresh file is started. The file is opened lazily, so a closed sink
//! reopens on its next write.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::StreamTarget;

/// Destination for formatted records
pub trait Sink: Send {
    /// Acquire the underlying handle now instead of on the first record
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Write one formatted record; a newline is appended
    fn write_record(&mut self, text: &str) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Flush and release any OS handle held by the sink
    fn close(&mut self) -> io::Result<()> {
        self.flush()
    }

    /// File the sink writes to, if it is file-backed
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// Path of the `index`-th rotated sibling, e.g. `app_20250101.log.2`
pub fn rotated_sibling(path: &Path, index: u32) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

/// Append-only file sink with optional size-based rotation
///
/// Rotation is disabled when either `max_bytes` or `backup_count` is zero.
#[derive(Debug)]
pub struct RotatingFileWriter {
    path: PathBuf,
    max_bytes: u64,
    backup_count: u32,
    file: Option<File>,
    size: u64,
}

impl RotatingFileWriter {
    pub fn new(path: PathBuf, max_bytes: u64, backup_count: u32) -> Self {
        Self {
            path,
            max_bytes,
            backup_count,
            file: None,
            size: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn ensure_open(&mut self) -> io::Result<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                if let Some(parent) = self.path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)?;
                    }
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?;
                self.size = file.metadata()?.len();
                file
            }
        };
        Ok(self.file.insert(file))
    }

    fn should_rollover(&self, incoming: u64) -> bool {
        self.max_bytes > 0
            && self.backup_count > 0
            && self.size > 0
            && self.size + incoming >= self.max_bytes
    }

    fn rollover(&mut self) -> io::Result<()> {
        self.close()?;

        for index in (1..self.backup_count).rev() {
            let source = rotated_sibling(&self.path, index);
            let target = rotated_sibling(&self.path, index + 1);
            if source.exists() {
                if target.exists() {
                    fs::remove_file(&target)?;
                }
                fs::rename(&source, &target)?;
            }
        }

        let first = rotated_sibling(&self.path, 1);
        if first.exists() {
            fs::remove_file(&first)?;
        }
        if self.path.exists() {
            fs::rename(&self.path, &first)?;
        }
        Ok(())
    }
}

impl Sink for RotatingFileWriter {
    fn open(&mut self) -> io::Result<()> {
        self.ensure_open().map(|_| ())
    }

    fn write_record(&mut self, text: &str) -> io::Result<()> {
        let incoming = text.len() as u64 + 1;
        self.ensure_open()?;
        if self.should_rollover(incoming) {
            self.rollover()?;
        }

        let file = self.ensure_open()?;
        file.write_all(text.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        self.size += incoming;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        self.size = 0;
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Sink writing to the process's stdout or stderr
#[derive(Debug, Clone, Copy)]
pub struct StreamWriter {
    target: StreamTarget,
}

impl StreamWriter {
    pub fn new(target: StreamTarget) -> Self {
        Self { target }
    }
}

impl Sink for StreamWriter {
    fn write_record(&mut self, text: &str) -> io::Result<()> {
        match self.target {
            StreamTarget::Stdout => {
                let mut out = io::stdout().lock();
                writeln!(out, "{}", text)?;
                out.flush()
            }
            StreamTarget::Stderr => {
                let mut err = io::stderr().lock();
                writeln!(err, "{}", text)?;
                err.flush()
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.target {
            StreamTarget::Stdout => io::stdout().flush(),
            StreamTarget::Stderr => io::stderr().flush(),
        }
    }
}
