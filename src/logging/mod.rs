//! Logging machinery behind [`crate::Logger`]
//!
//! Records are emitted as `tracing` events into a logger's private dispatcher,
//! where each configured handler is a layer that formats the record and writes
//! it to its sink. Retention of dated log files lives here as well.

pub(crate) mod file_writer;
pub(crate) mod format;
pub(crate) mod layer;
pub(crate) mod record;
pub(crate) mod retention;

pub use file_writer::{rotated_sibling, RotatingFileWriter, Sink, StreamWriter};
pub use format::{
    build_formatter, ColoredFormatter, EnhancedFormatter, RecordFormatter, TemplateFormatter,
    DEFAULT_DATEFMT, DEFAULT_FORMAT,
};
pub use record::{Level, LogRecord};
pub use retention::{list_log_files, sweep, LogFileEntry, SweepObserver, DEFAULT_MAX_NUM_LOG};
