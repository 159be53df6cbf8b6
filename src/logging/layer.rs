//! Handlers as `tracing-subscriber` layers
//!
//! Every configured handler becomes one [`HandlerLayer`]: a level threshold, a
//! formatter and a sink. The sink sits behind an `Arc<Mutex<..>>` so the owning
//! logger can flush or close it while the layer lives inside the dispatcher.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use super::file_writer::{RotatingFileWriter, Sink, StreamWriter};
use super::format::{
    build_formatter, EnhancedFormatter, RecordFormatter, TemplateFormatter, DEFAULT_FORMAT,
};
use super::record::{Level, LogRecord};
use crate::config::{FormatterSpec, HandlerSpec, SinkSpec, StreamTarget};
use crate::error::{LogError, Result};

pub(crate) type SharedSink = Arc<Mutex<Box<dyn Sink>>>;

/// Handle kept by the logger to manage a handler's sink
#[derive(Clone)]
pub(crate) struct HandlerHandle {
    pub name: String,
    sink: SharedSink,
}

impl HandlerHandle {
    pub fn flush(&self) -> std::io::Result<()> {
        self.lock()?.flush()
    }

    pub fn close(&self) -> std::io::Result<()> {
        self.lock()?.close()
    }

    /// Close the sink if it writes to `path`
    pub fn release(&self, path: &Path) -> std::io::Result<bool> {
        let mut sink = self.lock()?;
        if sink.path() == Some(path) {
            sink.close()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn lock(&self) -> std::io::Result<std::sync::MutexGuard<'_, Box<dyn Sink>>> {
        self.sink
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log sink mutex poisoned"))
    }
}

/// One handler inside a logger's dispatcher
pub(crate) struct HandlerLayer {
    name: String,
    threshold: Option<Level>,
    formatter: Box<dyn RecordFormatter>,
    sink: SharedSink,
}

impl HandlerLayer {
    pub fn handle(&self) -> HandlerHandle {
        HandlerHandle {
            name: self.name.clone(),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<S: Subscriber> Layer<S> for HandlerLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let record = LogRecord::from_event(event);
        if self.threshold.is_some_and(|t| record.level < t) {
            return;
        }
        let text = self.formatter.format(&record);

        let result = match self.sink.lock() {
            Ok(mut sink) => sink.write_record(&text),
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "log sink mutex poisoned",
            )),
        };
        // A record that cannot be written has nowhere else to go
        if let Err(e) = result {
            eprintln!("logkeeper: handler '{}' failed to write record: {}", self.name, e);
        }
    }
}

/// Build the layer for handler `name`, opening file sinks immediately
pub(crate) fn build_handler(
    name: &str,
    spec: &HandlerSpec,
    formatters: &BTreeMap<String, FormatterSpec>,
) -> Result<HandlerLayer> {
    let formatter_spec = match spec.formatter.as_deref() {
        Some(formatter) => Some(formatters.get(formatter).ok_or_else(|| {
            LogError::InvalidConfig(format!(
                "handler '{}' references unknown formatter '{}'",
                name, formatter
            ))
        })?),
        None => None,
    };

    let (formatter, mut sink): (Box<dyn RecordFormatter>, Box<dyn Sink>) = match &spec.sink {
        SinkSpec::RotatingFile {
            filename,
            max_bytes,
            backup_count,
            encoding,
        } => {
            check_file_sink(name, filename, encoding)?;
            (
                formatter_for(formatter_spec)?,
                Box::new(RotatingFileWriter::new(
                    filename.clone(),
                    *max_bytes,
                    *backup_count,
                )),
            )
        }
        SinkSpec::File { filename, encoding } => {
            check_file_sink(name, filename, encoding)?;
            (
                formatter_for(formatter_spec)?,
                Box::new(RotatingFileWriter::new(filename.clone(), 0, 0)),
            )
        }
        SinkSpec::Stream { stream } => (
            formatter_for(formatter_spec)?,
            Box::new(StreamWriter::new(*stream)),
        ),
        SinkSpec::Console(options) => {
            // The console lays out level and path itself; only the template is taken
            let template = match formatter_spec {
                Some(f) => TemplateFormatter::new(
                    f.format.as_deref().unwrap_or(DEFAULT_FORMAT),
                    f.datefmt.as_deref(),
                )?,
                None => TemplateFormatter::new(DEFAULT_FORMAT, None)?,
            };
            (
                Box::new(EnhancedFormatter::new(template, *options)?),
                Box::new(StreamWriter::new(StreamTarget::Stdout)),
            )
        }
    };

    if let Some(path) = sink.path().map(Path::to_path_buf) {
        sink.open()
            .map_err(|e| LogError::filesystem("Failed to open log file", path, e))?;
    }

    Ok(HandlerLayer {
        name: name.to_string(),
        threshold: spec.level,
        formatter,
        sink: Arc::new(Mutex::new(sink)),
    })
}

fn formatter_for(spec: Option<&FormatterSpec>) -> Result<Box<dyn RecordFormatter>> {
    match spec {
        Some(spec) => build_formatter(spec),
        None => Ok(Box::new(TemplateFormatter::new(DEFAULT_FORMAT, None)?)),
    }
}

fn check_file_sink(name: &str, filename: &Path, encoding: &str) -> Result<()> {
    if filename.as_os_str().is_empty() {
        return Err(LogError::InvalidConfig(format!(
            "handler '{}' has no filename",
            name
        )));
    }
    let normalized = encoding.to_ascii_lowercase().replace(['-', '_'], "");
    if normalized != "utf8" {
        return Err(LogError::InvalidConfig(format!(
            "handler '{}' uses unsupported encoding '{}'; only utf-8 is written",
            name, encoding
        )));
    }
    Ok(())
}
