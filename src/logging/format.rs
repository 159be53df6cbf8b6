//! Record formatters
//!
//! Templates use `%`-style directives (`%(message)s`, `%(levelname)7s`, `%(msecs)03d`)
//! and are compiled once when a handler is built, so a bad template fails at
//! construction instead of on the first record.

use chrono::format::{Item, StrftimeItems};
use crossterm::style::Stylize;

use super::record::{Level, LogRecord};
use crate::config::{ConsoleOptions, FormatterSpec, FormatterStyle};
use crate::error::{LogError, Result};

/// Template used when a formatter does not set `format`
pub const DEFAULT_FORMAT: &str = "%(message)s";

/// `asctime` layout used when a formatter does not set `datefmt`
pub const DEFAULT_DATEFMT: &str = "%Y-%m-%d %H:%M:%S,%3f";

const RESET: &str = "\x1b[0m";

/// Turns a record into the text a sink writes
pub trait RecordFormatter: Send + Sync {
    fn format(&self, record: &LogRecord) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    Asctime,
    Msecs,
    LevelName,
    LevelNo,
    Message,
    Name,
    LineNo,
    FileName,
    PathName,
    Process,
}

impl Key {
    fn parse(name: &str) -> Option<Self> {
        let key = match name {
            "asctime" => Key::Asctime,
            "msecs" => Key::Msecs,
            "levelname" => Key::LevelName,
            "levelno" => Key::LevelNo,
            "message" => Key::Message,
            "name" => Key::Name,
            "lineno" => Key::LineNo,
            "filename" => Key::FileName,
            "pathname" => Key::PathName,
            "process" => Key::Process,
            _ => return None,
        };
        Some(key)
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Key::Msecs | Key::LevelNo | Key::LineNo | Key::Process)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    Str,
    Int,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Directive {
    key: Key,
    left_align: bool,
    zero_pad: bool,
    width: usize,
    precision: Option<usize>,
    conversion: Conversion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Directive),
}

/// A compiled `%`-style template
#[derive(Debug, Clone)]
pub struct TemplateFormatter {
    segments: Vec<Segment>,
    datefmt: String,
}

impl TemplateFormatter {
    /// Compile `template`; `datefmt` is a strftime layout for `%(asctime)s`
    pub fn new(template: &str, datefmt: Option<&str>) -> Result<Self> {
        let datefmt = datefmt.unwrap_or(DEFAULT_DATEFMT);
        if StrftimeItems::new(datefmt).any(|item| matches!(item, Item::Error)) {
            return Err(LogError::InvalidConfig(format!(
                "invalid datefmt {:?}",
                datefmt
            )));
        }
        Ok(Self {
            segments: compile(template)?,
            datefmt: datefmt.to_string(),
        })
    }

    fn render_line(&self, record: &LogRecord) -> String {
        let mut out = String::with_capacity(record.message.len() + 64);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(directive) => {
                    render_field(&mut out, directive, record, &self.datefmt)
                }
            }
        }
        out
    }
}

impl RecordFormatter for TemplateFormatter {
    fn format(&self, record: &LogRecord) -> String {
        let mut out = self.render_line(record);
        if let Some(detail) = &record.detail {
            out.push('\n');
            out.push_str(detail.trim_end());
        }
        out
    }
}

fn compile(template: &str) -> Result<Vec<Segment>> {
    let invalid = |reason: &str| {
        LogError::InvalidConfig(format!("format template {:?}: {}", template, reason))
    };

    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => {
                literal.push('%');
                continue;
            }
            Some('(') => {}
            _ => return Err(invalid("expected '(' or '%' after '%'")),
        }

        let mut name = String::new();
        loop {
            match chars.next() {
                Some(')') => break,
                Some(ch) => name.push(ch),
                None => return Err(invalid("unterminated '%(' directive")),
            }
        }
        let key = Key::parse(&name)
            .ok_or_else(|| invalid(&format!("unknown record attribute '{}'", name)))?;

        let mut left_align = false;
        let mut zero_pad = false;
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => left_align = true,
                '0' => zero_pad = true,
                _ => break,
            }
            chars.next();
        }

        let width = take_number(&mut chars).unwrap_or(0);
        let precision = if chars.peek() == Some(&'.') {
            chars.next();
            Some(take_number(&mut chars).unwrap_or(0))
        } else {
            None
        };

        let conversion = match chars.next() {
            Some('s') | Some('r') => Conversion::Str,
            Some('d') | Some('i') => Conversion::Int,
            Some(other) => {
                return Err(invalid(&format!("unsupported conversion '{}'", other)));
            }
            None => return Err(invalid("missing conversion character")),
        };
        if conversion == Conversion::Int && !key.is_numeric() {
            return Err(invalid(&format!("'{}' is not numeric", name)));
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Field(Directive {
            key,
            left_align,
            zero_pad,
            width,
            precision,
            conversion,
        }));
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut digits = String::new();
    while let Some(&d) = chars.peek() {
        if !d.is_ascii_digit() {
            break;
        }
        digits.push(d);
        chars.next();
    }
    digits.parse().ok()
}

fn render_field(out: &mut String, directive: &Directive, record: &LogRecord, datefmt: &str) {
    let number = |n: u64| -> String {
        match directive.precision {
            Some(p) if directive.conversion == Conversion::Int => format!("{:0>p$}", n, p = p),
            _ => n.to_string(),
        }
    };

    let value = match directive.key {
        Key::Asctime => record.timestamp.format(datefmt).to_string(),
        Key::Msecs => number(u64::from(record.timestamp.timestamp_subsec_millis())),
        Key::LevelName => record.level.as_str().to_string(),
        Key::LevelNo => number(u64::from(record.level.number())),
        Key::Message => record.message.clone(),
        Key::Name => record.logger.clone(),
        Key::LineNo => number(u64::from(record.line)),
        Key::FileName => record.file_name().to_string(),
        Key::PathName => record.file.clone(),
        Key::Process => number(u64::from(std::process::id())),
    };

    let value = match (directive.conversion, directive.precision) {
        (Conversion::Str, Some(p)) => value.chars().take(p).collect(),
        _ => value,
    };

    let w = directive.width;
    if directive.left_align {
        out.push_str(&format!("{:<w$}", value, w = w));
    } else if directive.zero_pad && directive.conversion == Conversion::Int {
        out.push_str(&format!("{:0>w$}", value, w = w));
    } else {
        out.push_str(&format!("{:>w$}", value, w = w));
    }
}

/// Wraps a base rendering in an ANSI color picked by level, always closed by a reset
pub struct ColoredFormatter<F = TemplateFormatter> {
    inner: F,
}

impl<F: RecordFormatter> ColoredFormatter<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }

    /// ANSI escape that opens a record of `level`
    pub fn color(level: Level) -> &'static str {
        match level {
            Level::Debug => "\x1b[36m",
            Level::Info => "\x1b[32m",
            Level::Warning => "\x1b[33m",
            Level::Error => "\x1b[31m",
            Level::Critical => "\x1b[41m",
        }
    }
}

impl<F: RecordFormatter> RecordFormatter for ColoredFormatter<F> {
    fn format(&self, record: &LogRecord) -> String {
        format!(
            "{}{}{}",
            Self::color(record.level),
            self.inner.format(record),
            RESET
        )
    }
}

/// Terminal rendering for the enhanced console handler
///
/// Lays a record out as `[time] LEVEL    message    file:line`, with the level
/// styled and backtraces highlighted when `rich_tracebacks` is set. The message
/// text itself is printed as-is.
pub struct EnhancedFormatter {
    message: TemplateFormatter,
    options: ConsoleOptions,
}

impl EnhancedFormatter {
    pub fn new(message: TemplateFormatter, options: ConsoleOptions) -> Result<Self> {
        if options.markup {
            return Err(LogError::InvalidConfig(
                "console handler does not interpret markup; set markup = false".to_string(),
            ));
        }
        if options.highlighter {
            return Err(LogError::InvalidConfig(
                "console handler has no syntax highlighter; set highlighter = false".to_string(),
            ));
        }
        Ok(Self { message, options })
    }
}

impl RecordFormatter for EnhancedFormatter {
    fn format(&self, record: &LogRecord) -> String {
        let mut out = String::new();

        if self.options.show_time {
            let time = record.timestamp.format("[%H:%M:%S]").to_string();
            out.push_str(&format!("{} ", time.dim()));
        }

        if self.options.show_level {
            let name = format!("{:<8}", record.level.as_str());
            let styled = match record.level {
                Level::Debug => name.cyan(),
                Level::Info => name.blue(),
                Level::Warning => name.yellow(),
                Level::Error => name.red().bold(),
                Level::Critical => name.white().on_red().bold(),
            };
            out.push_str(&format!("{} ", styled));
        }

        out.push_str(&self.message.render_line(record));

        if self.options.show_path {
            let path = format!("{}:{}", record.file_name(), record.line);
            out.push_str(&format!("  {}", path.dim()));
        }

        if let Some(detail) = &record.detail {
            for line in detail.trim_end().lines() {
                out.push('\n');
                if self.options.rich_tracebacks {
                    out.push_str(&format!("{}", line.red()));
                } else {
                    out.push_str(line);
                }
            }
        }

        out
    }
}

/// Build the formatter a `[formatters.<name>]` entry describes
pub fn build_formatter(spec: &FormatterSpec) -> Result<Box<dyn RecordFormatter>> {
    let template = TemplateFormatter::new(
        spec.format.as_deref().unwrap_or(DEFAULT_FORMAT),
        spec.datefmt.as_deref(),
    )?;
    Ok(match spec.style {
        FormatterStyle::Plain => Box::new(template),
        FormatterStyle::Colored => Box::new(ColoredFormatter::new(template)),
    })
}
