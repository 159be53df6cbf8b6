//! Log levels and the record handed to formatters
//!
//! Records travel through `tracing` as events on a private dispatcher. The facade
//! attaches the logger name, the caller location and an optional detail block
//! (backtrace or error chain) as event fields; [`LogRecord::from_event`] reads them back.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::{Event, Metadata};

/// Target for every event emitted by the facade
pub(crate) const EVENT_TARGET: &str = "logkeeper";

/// `tracing` has no level above ERROR, so critical records use ERROR on this target
pub(crate) const CRITICAL_TARGET: &str = "logkeeper::critical";

const FIELD_MESSAGE: &str = "message";
const FIELD_LOGGER: &str = "logger";
const FIELD_CALLER_FILE: &str = "caller_file";
const FIELD_CALLER_LINE: &str = "caller_line";
const FIELD_DETAIL: &str = "detail";

/// Severity of a record, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    /// Get the display name for this level
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }

    /// Numeric value rendered by `%(levelno)d`
    pub fn number(&self) -> u32 {
        match self {
            Level::Debug => 10,
            Level::Info => 20,
            Level::Warning => 30,
            Level::Error => 40,
            Level::Critical => 50,
        }
    }

    /// Recover the facade level from an event's metadata
    pub(crate) fn from_metadata(metadata: &Metadata<'_>) -> Self {
        if metadata.target() == CRITICAL_TARGET {
            return Level::Critical;
        }
        match *metadata.level() {
            tracing::Level::TRACE | tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warning,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARNING" | "WARN" => Ok(Level::Warning),
            "ERROR" => Ok(Level::Error),
            "CRITICAL" | "FATAL" => Ok(Level::Critical),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

impl TryFrom<String> for Level {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

impl From<Level> for String {
    fn from(level: Level) -> Self {
        level.as_str().to_string()
    }
}

/// A single record as seen by formatters
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Timestamp when the handler received the record
    pub timestamp: DateTime<Local>,
    pub level: Level,
    /// Name of the logger that produced the record
    pub logger: String,
    pub message: String,
    /// Source file of the facade's caller
    pub file: String,
    /// Source line of the facade's caller
    pub line: u32,
    /// Backtrace or error chain, rendered after the message
    pub detail: Option<String>,
}

impl LogRecord {
    /// Build a record from a facade event
    pub(crate) fn from_event(event: &Event<'_>) -> Self {
        let metadata = event.metadata();
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        Self {
            timestamp: Local::now(),
            level: Level::from_metadata(metadata),
            logger: visitor.logger.unwrap_or_default(),
            message: visitor.message.unwrap_or_default(),
            file: visitor
                .file
                .or_else(|| metadata.file().map(str::to_string))
                .unwrap_or_default(),
            line: visitor.line.or(metadata.line()).unwrap_or(0),
            detail: visitor.detail,
        }
    }

    /// Base name of the source file, as shown by `%(filename)s`
    pub fn file_name(&self) -> &str {
        Path::new(&self.file)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.file)
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: Option<String>,
    logger: Option<String>,
    file: Option<String>,
    line: Option<u32>,
    detail: Option<String>,
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            FIELD_MESSAGE => self.message = Some(value.to_string()),
            FIELD_LOGGER => self.logger = Some(value.to_string()),
            FIELD_CALLER_FILE => self.file = Some(value.to_string()),
            FIELD_DETAIL => self.detail = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == FIELD_CALLER_LINE {
            self.line = u32::try_from(value).ok();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        // format_args! messages arrive here; their Debug output is the rendered text
        if field.name() == FIELD_MESSAGE {
            self.message = Some(format!("{:?}", value));
        }
    }
}

/// Emit one facade event on the current dispatcher
pub(crate) fn emit(
    level: Level,
    logger: &str,
    caller_file: &str,
    caller_line: u32,
    message: &str,
    detail: Option<&str>,
) {
    match level {
        Level::Debug => tracing::event!(
            target: EVENT_TARGET,
            tracing::Level::DEBUG,
            logger,
            caller_file,
            caller_line,
            detail,
            "{}",
            message
        ),
        Level::Info => tracing::event!(
            target: EVENT_TARGET,
            tracing::Level::INFO,
            logger,
            caller_file,
            caller_line,
            detail,
            "{}",
            message
        ),
        Level::Warning => tracing::event!(
            target: EVENT_TARGET,
            tracing::Level::WARN,
            logger,
            caller_file,
            caller_line,
            detail,
            "{}",
            message
        ),
        Level::Error => tracing::event!(
            target: EVENT_TARGET,
            tracing::Level::ERROR,
            logger,
            caller_file,
            caller_line,
            detail,
            "{}",
            message
        ),
        Level::Critical => tracing::event!(
            target: CRITICAL_TARGET,
            tracing::Level::ERROR,
            logger,
            caller_file,
            caller_line,
            detail,
            "{}",
            message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warning);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Error < Level::Critical);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("debug".parse::<Level>().unwrap(), Level::Debug);
        assert_eq!("WARN".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!("Warning".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!("critical".parse::<Level>().unwrap(), Level::Critical);
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn test_level_string_conversions() {
        assert_eq!(Level::try_from("warn".to_string()), Ok(Level::Warning));
        assert_eq!(Level::try_from("Error".to_string()), Ok(Level::Error));
        assert!(Level::try_from("loud".to_string()).is_err());
        assert_eq!(String::from(Level::Critical), "CRITICAL");
    }

    #[test]
    fn test_level_display_pads() {
        assert_eq!(format!("{:>7}", Level::Info), "   INFO");
        assert_eq!(format!("{:>7}", Level::Critical), "CRITICAL");
    }

    #[test]
    fn test_level_numbers() {
        assert_eq!(Level::Debug.number(), 10);
        assert_eq!(Level::Critical.number(), 50);
    }

    #[test]
    fn test_record_file_name() {
        let record = LogRecord {
            timestamp: Local::now(),
            level: Level::Info,
            logger: "main.rs".to_string(),
            message: "hello".to_string(),
            file: "src/bin/main.rs".to_string(),
            line: 12,
            detail: None,
        };
        assert_eq!(record.file_name(), "main.rs");
    }
}
