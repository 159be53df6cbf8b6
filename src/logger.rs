//! The logger handle
//!
//! A [`Logger`] owns its resolved configuration, the handler sinks built from it,
//! and a private `tracing` dispatcher those handlers are layered on. Nothing is
//! installed process-wide, so several loggers can coexist in one process.
//!
//! # Usage
//!
//! ```rust,no_run
//! use logkeeper::{Logger, LoggerOptions};
//!
//! let logger = Logger::new(LoggerOptions::new().save_log_dir("logs"))?;
//! logger.info("service started");
//! logger.remove_old_logs(30)?;
//! # Ok::<(), logkeeper::LogError>(())
//! ```

use std::backtrace::Backtrace;
use std::fmt;
use std::panic::Location;
use std::path::{Path, PathBuf};

use tracing::Dispatch;
use tracing_subscriber::layer::SubscriberExt;

use crate::config::{
    self, ConsoleCapability, LoggingConfig, CONFIG_FILE_NAME, FILE_HANDLER, ROOT_LOGGER,
};
use crate::error::{LogError, Result};
use crate::logging::layer::{build_handler, HandlerHandle};
use crate::logging::record::emit;
use crate::logging::retention::{self, SweepObserver};
use crate::logging::Level;

/// Level used when neither the options nor any logger binding sets one
const FALLBACK_LEVEL: Level = Level::Warning;

/// Construction options for [`Logger`]
#[derive(Debug, Clone)]
pub struct LoggerOptions {
    /// Overrides the level from the logger bindings
    pub level: Option<Level>,
    /// Directory receiving `app_<YYYYMMDD>.log` files
    pub save_log_dir: PathBuf,
    /// External config replacing the built-in default when the file exists
    pub config_path: Option<PathBuf>,
    pub console: ConsoleCapability,
    /// Logger name; defaults to the file name of the code constructing the logger
    pub name: Option<String>,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            level: None,
            save_log_dir: PathBuf::from("logs"),
            config_path: Some(PathBuf::from(CONFIG_FILE_NAME)),
            console: ConsoleCapability::detect(),
            name: None,
        }
    }
}

impl LoggerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn save_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_log_dir = dir.into();
        self
    }

    /// Use `path` as the external config, or `None` to always use the built-in default
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn console(mut self, console: ConsoleCapability) -> Self {
        self.console = console;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Leveled logger writing to the handlers its configuration binds
pub struct Logger {
    name: String,
    level: Level,
    log_dir: PathBuf,
    backup_count: u32,
    config: LoggingConfig,
    handlers: Vec<HandlerHandle>,
    dispatch: Dispatch,
}

impl Logger {
    /// Resolve the configuration and open the handlers
    ///
    /// Creates the log directory and its `.gitignore` when missing. A present but
    /// malformed external config fails with [`LogError::ConfigParse`].
    #[track_caller]
    pub fn new(options: LoggerOptions) -> Result<Self> {
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| caller_name(Location::caller()));
        let config = config::resolve(
            &options.save_log_dir,
            options.config_path.as_deref(),
            options.console,
        )?;
        Self::build(name, options.level, options.save_log_dir, config)
    }

    /// [`Logger::new`] with default options
    #[track_caller]
    pub fn with_defaults() -> Result<Self> {
        Self::new(LoggerOptions::default())
    }

    fn build(
        name: String,
        level: Option<Level>,
        log_dir: PathBuf,
        config: LoggingConfig,
    ) -> Result<Self> {
        let (bound_level, handler_names) = bindings_for(&config, &name);

        let mut layers = Vec::with_capacity(handler_names.len());
        for handler_name in &handler_names {
            let spec = config.handlers.get(handler_name).ok_or_else(|| {
                LogError::InvalidConfig(format!(
                    "logger '{}' references unknown handler '{}'",
                    name, handler_name
                ))
            })?;
            layers.push(build_handler(handler_name, spec, &config.formatters)?);
        }
        let handlers = layers.iter().map(|layer| layer.handle()).collect();
        let dispatch = Dispatch::new(tracing_subscriber::registry().with(layers));

        Ok(Self {
            name,
            level: level.or(bound_level).unwrap_or(FALLBACK_LEVEL),
            log_dir,
            backup_count: config.file_backup_count(),
            config,
            handlers,
            dispatch,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// The effective configuration the handlers were built from
    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }

    /// Current target of the `file` handler, if configured
    pub fn log_file(&self) -> Option<&Path> {
        self.config
            .handlers
            .get(FILE_HANDLER)
            .and_then(|h| h.sink.filename())
    }

    #[track_caller]
    pub fn debug(&self, msg: impl fmt::Display) {
        self.log(Level::Debug, &msg, None);
    }

    #[track_caller]
    pub fn info(&self, msg: impl fmt::Display) {
        self.log(Level::Info, &msg, None);
    }

    #[track_caller]
    pub fn warn(&self, msg: impl fmt::Display) {
        self.log(Level::Warning, &msg, None);
    }

    /// Log at ERROR; `exc_info` attaches a backtrace of the calling thread
    #[track_caller]
    pub fn error(&self, msg: impl fmt::Display, exc_info: bool) {
        let detail = exc_info.then(|| Backtrace::force_capture().to_string());
        self.log(Level::Error, &msg, detail);
    }

    /// Log at ERROR with `err` and its chain of sources appended
    #[track_caller]
    pub fn error_with_source(
        &self,
        msg: impl fmt::Display,
        err: &(dyn std::error::Error + 'static),
    ) {
        self.log(Level::Error, &msg, Some(error_chain(err)));
    }

    #[track_caller]
    pub fn critical(&self, msg: impl fmt::Display) {
        self.log(Level::Critical, &msg, None);
    }

    /// Records carry the location of the code calling the per-level method
    #[track_caller]
    fn log(&self, level: Level, msg: &dyn fmt::Display, detail: Option<String>) {
        if level < self.level {
            return;
        }
        let caller = Location::caller();
        let message = msg.to_string();
        tracing::dispatcher::with_default(&self.dispatch, || {
            emit(
                level,
                &self.name,
                caller.file(),
                caller.line(),
                &message,
                detail.as_deref(),
            )
        });
    }

    /// Delete the oldest dated log files so at most `max_num_log` remain
    ///
    /// Rotated siblings of deleted files go too, and each deletion is logged at
    /// INFO through this logger. Handles this logger holds on a file are closed
    /// before it is deleted. See [`retention::sweep`].
    pub fn remove_old_logs(&self, max_num_log: usize) -> Result<Vec<PathBuf>> {
        retention::sweep(&self.log_dir, max_num_log, self.backup_count, self)
    }

    /// Flush every handler
    pub fn flush(&self) -> Result<()> {
        for handler in &self.handlers {
            handler.flush().map_err(|e| {
                LogError::filesystem("Failed to flush log handler", &self.log_dir, e)
            })?;
        }
        Ok(())
    }

    /// Flush and close every handler; file handlers reopen on their next record
    pub fn close(&self) -> Result<()> {
        for handler in &self.handlers {
            handler.close().map_err(|e| {
                LogError::filesystem("Failed to close log handler", &self.log_dir, e)
            })?;
        }
        Ok(())
    }
}

impl SweepObserver for Logger {
    fn before_delete(&self, path: &Path) -> Result<()> {
        for handler in &self.handlers {
            handler.release(path).map_err(|source| LogError::Deletion {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    fn deleted(&self, path: &Path, rotated: bool) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        if rotated {
            self.info(format_args!("removed {}", name));
        } else {
            self.info(format_args!("remove {}", name));
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            eprintln!("logkeeper: failed to close logger '{}': {}", self.name, e);
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers: Vec<&str> = self.handlers.iter().map(|h| h.name.as_str()).collect();
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("level", &self.level)
            .field("log_dir", &self.log_dir)
            .field("handlers", &handlers)
            .finish()
    }
}

/// File name of the source location, e.g. `main.rs`
fn caller_name(location: &Location<'_>) -> String {
    Path::new(location.file())
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(location.file())
        .to_string()
}

/// Dotted ancestry of a logger name ending at the root: `a.b` → `a.b`, `a`, `""`
fn logger_chain(name: &str) -> Vec<&str> {
    let mut chain = Vec::new();
    let mut current = name;
    while !current.is_empty() {
        chain.push(current);
        current = match current.rfind('.') {
            Some(pos) => &current[..pos],
            None => ROOT_LOGGER,
        };
    }
    chain.push(ROOT_LOGGER);
    chain
}

/// Effective level and handler names for logger `name`
///
/// Walks from the logger to the root taking the first level set. Handlers are
/// collected only until a binding with `propagate = false`; the level lookup
/// continues past it.
fn bindings_for(config: &LoggingConfig, name: &str) -> (Option<Level>, Vec<String>) {
    let mut level = None;
    let mut handlers: Vec<String> = Vec::new();
    let mut collecting = true;

    for logger in logger_chain(name) {
        let binding = config.loggers.get(logger).or_else(|| {
            if logger == ROOT_LOGGER {
                config.loggers.get("root")
            } else {
                None
            }
        });
        let Some(binding) = binding else {
            continue;
        };

        if level.is_none() {
            level = binding.level;
        }
        if collecting {
            for handler in &binding.handlers {
                if !handlers.contains(handler) {
                    handlers.push(handler.clone());
                }
            }
            collecting = binding.propagate;
        }
    }

    (level, handlers)
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = format!("Error: {}", err);
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(&format!("\nCaused by: {}", cause));
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{log_file_name, LoggerBinding};
    use chrono::Local;
    use std::fs;
    use tempfile::TempDir;

    fn options(dir: &Path) -> LoggerOptions {
        LoggerOptions::new()
            .save_log_dir(dir)
            .config_path(None)
            .console(ConsoleCapability::Plain)
    }

    fn today_file(dir: &Path) -> PathBuf {
        dir.join(log_file_name(Local::now().date_naive()))
    }

    fn remaining_logs(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("app_"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_logger_creates_log_directory() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("test_logs");

        let logger = Logger::new(options(&log_dir)).unwrap();
        logger.close().unwrap();

        assert!(log_dir.is_dir());
    }

    #[test]
    fn test_logger_creates_gitignore() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("test_logs");

        let logger = Logger::new(options(&log_dir)).unwrap();
        logger.close().unwrap();

        let content = fs::read_to_string(log_dir.join(".gitignore")).unwrap();
        assert_eq!(content, "*\n!.gitignore\n");
    }

    #[test]
    fn test_logger_keeps_existing_gitignore() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(".gitignore"), "keep me\n").unwrap();

        Logger::new(options(temp_dir.path())).unwrap();

        let content = fs::read_to_string(temp_dir.path().join(".gitignore")).unwrap();
        assert_eq!(content, "keep me\n");
    }

    #[test]
    fn test_logger_outputs_to_file() {
        let temp_dir = TempDir::new().unwrap();

        let logger = Logger::new(options(temp_dir.path())).unwrap();
        logger.info("テストメッセージ");
        logger.close().unwrap();

        let log_file = today_file(temp_dir.path());
        assert_eq!(logger.log_file(), Some(log_file.as_path()));
        let content = fs::read_to_string(&log_file).unwrap();
        assert!(content.contains("テストメッセージ"));
        assert!(content.contains("   INFO "));
    }

    #[test]
    fn test_logger_attributes_caller_location() {
        let temp_dir = TempDir::new().unwrap();

        let logger = Logger::new(options(temp_dir.path())).unwrap();
        logger.warn("where am I");
        let line = line!() - 1;
        logger.close().unwrap();

        let content = fs::read_to_string(today_file(temp_dir.path())).unwrap();
        assert_eq!(logger.name(), "logger.rs");
        assert!(
            content.contains(&format!("where am I [logger.rs:{}]", line)),
            "unexpected content: {}",
            content
        );
    }

    #[test]
    fn test_logger_levels() {
        let temp_dir = TempDir::new().unwrap();

        let logger = Logger::new(options(temp_dir.path()).name("svc")).unwrap();
        logger.debug("debug line");
        logger.critical("critical line");
        logger.close().unwrap();

        let content = fs::read_to_string(today_file(temp_dir.path())).unwrap();
        assert!(content.contains("  DEBUG debug line [svc:"));
        assert!(content.contains("CRITICAL critical line [svc:"));
    }

    #[test]
    fn test_level_option_overrides_binding() {
        let temp_dir = TempDir::new().unwrap();

        let logger = Logger::new(options(temp_dir.path()).level(Level::Warning)).unwrap();
        assert_eq!(logger.level(), Level::Warning);
        logger.info("filtered");
        logger.warn("kept");
        logger.close().unwrap();

        let content = fs::read_to_string(today_file(temp_dir.path())).unwrap();
        assert!(!content.contains("filtered"));
        assert!(content.contains("kept"));
    }

    #[test]
    fn test_error_with_exc_info_appends_backtrace() {
        let temp_dir = TempDir::new().unwrap();

        let logger = Logger::new(options(temp_dir.path())).unwrap();
        logger.error("without trace", false);
        logger.close().unwrap();
        let plain = fs::read_to_string(today_file(temp_dir.path())).unwrap();
        assert_eq!(plain.lines().count(), 1);

        logger.error("with trace", true);
        logger.close().unwrap();
        let traced = fs::read_to_string(today_file(temp_dir.path())).unwrap();
        assert!(traced.contains("with trace"));
        assert!(traced.lines().count() > 2);
    }

    #[test]
    fn test_error_with_source_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("could not load settings")]
        struct Outer(#[source] std::io::Error);

        let temp_dir = TempDir::new().unwrap();
        let logger = Logger::new(options(temp_dir.path())).unwrap();
        let err = Outer(std::io::Error::new(std::io::ErrorKind::NotFound, "settings.toml missing"));
        logger.error_with_source("startup failed", &err);
        logger.close().unwrap();

        let content = fs::read_to_string(today_file(temp_dir.path())).unwrap();
        assert!(content.contains("startup failed"));
        assert!(content
            .contains("Error: could not load settings\nCaused by: settings.toml missing"));
    }

    #[test]
    fn test_malformed_config_fails_construction() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "handlers = [").unwrap();

        let result = Logger::new(
            options(&temp_dir.path().join("logs")).config_path(Some(config_path)),
        );
        assert!(matches!(result, Err(LogError::ConfigParse { .. })));
    }

    #[test]
    fn test_external_config_routes_file_to_log_dir() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("logs");
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &config_path,
            r#"
[formatters.bare]
format = "%(levelname)s:%(message)s"

[handlers.file]
class = "file"
formatter = "bare"
filename = "elsewhere.log"

[loggers.root]
level = "DEBUG"
handlers = ["file"]
"#,
        )
        .unwrap();

        let logger = Logger::new(options(&log_dir).config_path(Some(config_path))).unwrap();
        logger.debug("routed");
        logger.close().unwrap();

        assert!(!temp_dir.path().join("elsewhere.log").exists());
        let content = fs::read_to_string(today_file(&log_dir)).unwrap();
        assert_eq!(content, "DEBUG:routed\n");
    }

    #[test]
    fn test_non_propagating_logger_inherits_root_level() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("logs");
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &config_path,
            r#"
[handlers.file]
class = "file"

[loggers.""]
level = "DEBUG"
handlers = ["console"]

[loggers.svc]
handlers = ["file"]
propagate = false
"#,
        )
        .unwrap();

        let logger = Logger::new(
            options(&log_dir)
                .config_path(Some(config_path))
                .name("svc"),
        )
        .unwrap();
        assert_eq!(logger.level(), Level::Debug);
        logger.info("info line");
        logger.close().unwrap();

        let content = fs::read_to_string(today_file(&log_dir)).unwrap();
        assert_eq!(content, "info line\n");
    }

    #[test]
    fn test_unknown_handler_reference_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "[loggers.\"\"]\nhandlers = [\"syslog\"]\n").unwrap();

        let result = Logger::new(options(temp_dir.path()).config_path(Some(config_path)));
        assert!(matches!(result, Err(LogError::InvalidConfig(_))));
    }

    #[test]
    fn test_loggers_are_independent() {
        let temp_dir = TempDir::new().unwrap();
        let first_dir = temp_dir.path().join("first");
        let second_dir = temp_dir.path().join("second");

        let first = Logger::new(options(&first_dir)).unwrap();
        let second = Logger::new(options(&second_dir)).unwrap();
        first.info("only in first");
        second.info("only in second");
        drop(first);
        drop(second);

        let first_content = fs::read_to_string(today_file(&first_dir)).unwrap();
        let second_content = fs::read_to_string(today_file(&second_dir)).unwrap();
        assert!(first_content.contains("only in first"));
        assert!(!first_content.contains("only in second"));
        assert!(second_content.contains("only in second"));
        assert!(!second_content.contains("only in first"));
    }

    #[test]
    fn test_remove_old_logs_removes_oldest() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("test_logs");
        fs::create_dir_all(&log_dir).unwrap();
        for date in ["20200101", "20210101", "20220101", "20230101", "20240101", "20250101"] {
            fs::write(log_dir.join(format!("app_{}.log", date)), format!("log from {}", date))
                .unwrap();
        }

        let logger = Logger::new(options(&log_dir)).unwrap();
        let deleted = logger.remove_old_logs(3).unwrap();
        logger.close().unwrap();

        assert_eq!(deleted.len(), 4);
        let today = log_file_name(Local::now().date_naive());
        assert_eq!(
            remaining_logs(&log_dir),
            vec!["app_20240101.log".to_string(), "app_20250101.log".to_string(), today]
        );

        let content = fs::read_to_string(today_file(&log_dir)).unwrap();
        for date in ["20200101", "20210101", "20220101", "20230101"] {
            let needle = format!("remove app_{}.log", date);
            assert_eq!(content.matches(&needle).count(), 1, "{}", needle);
        }

        // A second sweep with the same limit changes nothing
        assert!(logger.remove_old_logs(3).unwrap().is_empty());
        assert_eq!(remaining_logs(&log_dir).len(), 3);
    }

    #[test]
    fn test_remove_old_logs_releases_active_file() {
        let temp_dir = TempDir::new().unwrap();

        let logger = Logger::new(options(temp_dir.path())).unwrap();
        logger.info("before sweep");
        let deleted = logger.remove_old_logs(0).unwrap();

        assert_eq!(deleted, vec![today_file(temp_dir.path())]);
        // The deletion record reopens a fresh file for today
        let content = fs::read_to_string(today_file(temp_dir.path())).unwrap();
        assert!(!content.contains("before sweep"));
        assert!(content.contains("remove app_"));
    }

    #[test]
    fn test_logger_chain() {
        assert_eq!(logger_chain("a.b.c"), vec!["a.b.c", "a.b", "a", ""]);
        assert_eq!(logger_chain("main.rs"), vec!["main.rs", "main", ""]);
        assert_eq!(logger_chain(""), vec![""]);
    }

    #[test]
    fn test_bindings_for_propagation() {
        let mut config = LoggingConfig::default_for(Path::new("logs"), Local::now().date_naive());
        config.loggers.insert(
            "worker".to_string(),
            LoggerBinding {
                level: Some(Level::Error),
                handlers: vec!["file".to_string()],
                propagate: true,
            },
        );
        config.loggers.insert(
            "isolated".to_string(),
            LoggerBinding {
                level: None,
                handlers: vec!["file".to_string()],
                propagate: false,
            },
        );

        let (level, handlers) = bindings_for(&config, "worker.jobs");
        assert_eq!(level, Some(Level::Error));
        assert_eq!(handlers, vec!["file", "console"]);

        // Propagation stops handler collection, not level inheritance
        let (level, handlers) = bindings_for(&config, "isolated");
        assert_eq!(level, Some(Level::Debug));
        assert_eq!(handlers, vec!["file"]);

        let (level, handlers) = bindings_for(&config, "other.rs");
        assert_eq!(level, Some(Level::Debug));
        assert_eq!(handlers, vec!["console", "file"]);
    }
}
