//! logkeeper - leveled logging to the console and date-stamped rotating files
//!
//! A [`Logger`] resolves its configuration (a built-in default, or
//! `logging_config.toml` when present), writes every record to the console and
//! to `<log dir>/app_<YYYYMMDD>.log`, and can cap the number of dated log files
//! kept with [`Logger::remove_old_logs`].

pub mod config;
pub mod error;
pub mod logger;
pub mod logging;

pub use config::{ConsoleCapability, LoggingConfig};
pub use error::{LogError, Result};
pub use logger::{Logger, LoggerOptions};
pub use logging::{Level, DEFAULT_MAX_NUM_LOG};
