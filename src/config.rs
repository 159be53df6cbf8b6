//! Logging configuration: the built-in default, the optional `logging_config.toml`
//! override, and the resolution step that merges them for a log directory.

use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{LogError, Result};
use crate::logging::Level;

/// External config file looked up in the current working directory
pub const CONFIG_FILE_NAME: &str = "logging_config.toml";

/// Prefix of every dated log file (`app_<YYYYMMDD>.log`)
pub const LOG_FILE_PREFIX: &str = "app_";

/// Extension of primary log files; rotated siblings append `.N`
pub const LOG_FILE_EXTENSION: &str = "log";

/// Size at which the default file handler rotates (16 MiB)
pub const DEFAULT_MAX_BYTES: u64 = 16 * 1024 * 1024;

/// Rotated siblings kept per dated log file
pub const DEFAULT_BACKUP_COUNT: u32 = 3;

/// Content of the `.gitignore` written into a fresh log directory
pub const GITIGNORE_CONTENT: &str = "*\n!.gitignore\n";

/// Handler whose filename is always forced to today's log file
pub const FILE_HANDLER: &str = "file";

/// Handler replaced by the console selected for the environment
pub const CONSOLE_HANDLER: &str = "console";

/// Name of the root logger binding
pub const ROOT_LOGGER: &str = "";

/// Template of the `detailed` formatter
pub const DETAILED_FORMAT: &str =
    "%(asctime)s.%(msecs)03d %(levelname)7s %(message)s [%(name)s:%(lineno)d]";

/// Date layout of the `detailed` formatter
pub const DETAILED_DATEFMT: &str = "%Y/%m/%d %H:%M:%S";

/// Console rendering the environment supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCapability {
    /// Styled terminal output with level column, source path and highlighted backtraces
    Enhanced,
    /// ANSI-colored plain lines on stdout
    Plain,
}

impl ConsoleCapability {
    /// Enhanced when stdout is a terminal
    pub fn detect() -> Self {
        if std::io::stdout().is_terminal() {
            ConsoleCapability::Enhanced
        } else {
            ConsoleCapability::Plain
        }
    }
}

/// How a formatter decorates its template output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatterStyle {
    #[default]
    Plain,
    /// Wrapped in an ANSI color chosen by level
    Colored,
}

/// `[formatters.<name>]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatterSpec {
    /// `%`-style template, `%(message)s` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// strftime layout for `%(asctime)s`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datefmt: Option<String>,

    #[serde(default)]
    pub style: FormatterStyle,
}

impl FormatterSpec {
    pub fn template(format: impl Into<String>) -> Self {
        Self {
            format: Some(format.into()),
            ..Self::default()
        }
    }
}

/// Standard stream a stream handler writes to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamTarget {
    #[default]
    Stdout,
    Stderr,
}

/// Options of the enhanced console handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleOptions {
    /// Highlight backtraces and error chains
    #[serde(default)]
    pub rich_tracebacks: bool,
    #[serde(default = "default_true")]
    pub show_time: bool,
    #[serde(default = "default_true")]
    pub show_level: bool,
    #[serde(default = "default_true")]
    pub show_path: bool,
    /// Markup is never interpreted; must stay false
    #[serde(default)]
    pub markup: bool,
    /// No highlighter is available; must stay false
    #[serde(default)]
    pub highlighter: bool,
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        Self {
            rich_tracebacks: false,
            show_time: true,
            show_level: true,
            show_path: true,
            markup: false,
            highlighter: false,
        }
    }
}

/// Sink-specific part of a handler, selected by its `class`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum SinkSpec {
    /// Size-rotated file with numbered backups
    RotatingFile {
        #[serde(default)]
        filename: PathBuf,
        #[serde(rename = "maxBytes", alias = "max_bytes", default)]
        max_bytes: u64,
        #[serde(rename = "backupCount", alias = "backup_count", default)]
        backup_count: u32,
        #[serde(default = "default_encoding")]
        encoding: String,
    },
    /// Plain append-only file
    File {
        #[serde(default)]
        filename: PathBuf,
        #[serde(default = "default_encoding")]
        encoding: String,
    },
    /// stdout or stderr
    Stream {
        #[serde(default)]
        stream: StreamTarget,
    },
    /// Styled terminal output on stdout
    Console(ConsoleOptions),
}

impl SinkSpec {
    /// Target file of file-backed sinks
    pub fn filename(&self) -> Option<&Path> {
        match self {
            SinkSpec::RotatingFile { filename, .. } | SinkSpec::File { filename, .. } => {
                Some(filename)
            }
            SinkSpec::Stream { .. } | SinkSpec::Console(_) => None,
        }
    }
}

/// `[handlers.<name>]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerSpec {
    /// Minimum level this handler emits; everything when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,

    /// Name of a `[formatters]` entry; `%(message)s` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatter: Option<String>,

    #[serde(flatten)]
    pub sink: SinkSpec,
}

/// `[loggers.<name>]`, with `""` as the root logger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,

    #[serde(default)]
    pub handlers: Vec<String>,

    /// Also hand records to the parent logger's handlers
    #[serde(default = "default_true")]
    pub propagate: bool,
}

/// Effective logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub formatters: BTreeMap<String, FormatterSpec>,

    #[serde(default)]
    pub handlers: BTreeMap<String, HandlerSpec>,

    #[serde(default)]
    pub loggers: BTreeMap<String, LoggerBinding>,
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

impl LoggingConfig {
    /// Built-in configuration for `log_dir`, writing to the file dated `today`
    ///
    /// The `console` handler is not part of the default; [`resolve`] inserts it.
    pub fn default_for(log_dir: &Path, today: NaiveDate) -> Self {
        let mut formatters = BTreeMap::new();
        formatters.insert("rich_simple".to_string(), FormatterSpec::template("%(message)s"));
        formatters.insert(
            "detailed".to_string(),
            FormatterSpec {
                format: Some(DETAILED_FORMAT.to_string()),
                datefmt: Some(DETAILED_DATEFMT.to_string()),
                style: FormatterStyle::Plain,
            },
        );
        formatters.insert(
            "colored".to_string(),
            FormatterSpec {
                style: FormatterStyle::Colored,
                ..FormatterSpec::default()
            },
        );

        let mut handlers = BTreeMap::new();
        handlers.insert(
            FILE_HANDLER.to_string(),
            HandlerSpec {
                level: Some(Level::Debug),
                formatter: Some("detailed".to_string()),
                sink: SinkSpec::RotatingFile {
                    filename: log_file_path(log_dir, today),
                    max_bytes: DEFAULT_MAX_BYTES,
                    backup_count: DEFAULT_BACKUP_COUNT,
                    encoding: default_encoding(),
                },
            },
        );

        let mut loggers = BTreeMap::new();
        loggers.insert(
            ROOT_LOGGER.to_string(),
            LoggerBinding {
                level: Some(Level::Debug),
                handlers: vec![CONSOLE_HANDLER.to_string(), FILE_HANDLER.to_string()],
                propagate: false,
            },
        );

        Self {
            version: default_version(),
            formatters,
            handlers,
            loggers,
        }
    }

    /// Parse a TOML config file. A file that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LogError::filesystem("Failed to read logging config", path, e))?;
        toml::from_str(&content).map_err(|source| LogError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write this configuration as TOML, e.g. to scaffold a `logging_config.toml`
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| LogError::InvalidConfig(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| LogError::filesystem("Failed to write logging config", path, e))
    }

    /// Point the `file` handler at `path`, whatever filename it was configured with
    pub fn set_file_destination(&mut self, path: PathBuf) -> Result<()> {
        let Some(handler) = self.handlers.get_mut(FILE_HANDLER) else {
            return Ok(());
        };
        match &mut handler.sink {
            SinkSpec::RotatingFile { filename, .. } | SinkSpec::File { filename, .. } => {
                *filename = path;
                Ok(())
            }
            SinkSpec::Stream { .. } | SinkSpec::Console(_) => Err(LogError::InvalidConfig(
                format!("handler '{}' must be file-backed", FILE_HANDLER),
            )),
        }
    }

    /// Rotated siblings kept for the `file` handler, falling back to the default
    pub fn file_backup_count(&self) -> u32 {
        match self.handlers.get(FILE_HANDLER).map(|h| &h.sink) {
            Some(SinkSpec::RotatingFile { backup_count, .. }) => *backup_count,
            _ => DEFAULT_BACKUP_COUNT,
        }
    }
}

/// Console handler for the given capability
pub fn console_handler(capability: ConsoleCapability) -> HandlerSpec {
    match capability {
        ConsoleCapability::Enhanced => HandlerSpec {
            level: Some(Level::Info),
            formatter: Some("rich_simple".to_string()),
            sink: SinkSpec::Console(ConsoleOptions {
                rich_tracebacks: true,
                show_time: false,
                show_level: true,
                show_path: true,
                markup: false,
                highlighter: false,
            }),
        },
        ConsoleCapability::Plain => HandlerSpec {
            level: Some(Level::Info),
            formatter: Some("colored".to_string()),
            sink: SinkSpec::Stream {
                stream: StreamTarget::Stdout,
            },
        },
    }
}

/// `app_<YYYYMMDD>.log`
pub fn log_file_name(date: NaiveDate) -> String {
    format!(
        "{}{}.{}",
        LOG_FILE_PREFIX,
        date.format("%Y%m%d"),
        LOG_FILE_EXTENSION
    )
}

/// Path of the log file dated `date` inside `log_dir`
pub fn log_file_path(log_dir: &Path, date: NaiveDate) -> PathBuf {
    log_dir.join(log_file_name(date))
}

/// Create `log_dir` (with parents) and its `.gitignore` if missing
///
/// An existing `.gitignore` is left untouched.
pub fn ensure_log_dir(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| LogError::filesystem("Failed to create log directory", log_dir, e))?;

    let gitignore = log_dir.join(".gitignore");
    if !gitignore.exists() {
        std::fs::write(&gitignore, GITIGNORE_CONTENT)
            .map_err(|e| LogError::filesystem("Failed to write", &gitignore, e))?;
    }
    Ok(())
}

/// Resolve the effective configuration for `log_dir`, dated today
///
/// `config_path` names the optional external config (normally
/// [`CONFIG_FILE_NAME`] in the working directory); it replaces the built-in
/// default when the file exists.
pub fn resolve(
    log_dir: &Path,
    config_path: Option<&Path>,
    console: ConsoleCapability,
) -> Result<LoggingConfig> {
    resolve_on(log_dir, config_path, console, Local::now().date_naive())
}

/// [`resolve`] with an explicit date for the `file` handler
pub fn resolve_on(
    log_dir: &Path,
    config_path: Option<&Path>,
    console: ConsoleCapability,
    today: NaiveDate,
) -> Result<LoggingConfig> {
    ensure_log_dir(log_dir)?;

    let mut config = match config_path.filter(|p| p.exists()) {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Loading logging config");
            let mut config = LoggingConfig::load(path)?;
            config.set_file_destination(log_file_path(log_dir, today))?;
            config
        }
        None => LoggingConfig::default_for(log_dir, today),
    };

    config
        .handlers
        .insert(CONSOLE_HANDLER.to_string(), console_handler(console));
    Ok(config)
}
