//! Logging Infrastructure
//!
//! Structured logging shared by the heap and the JIT. Entries carry a level,
//! a target (`memory`, `regalloc`, ...), a message and key-value fields, and
//! are written as plain text or JSON to stderr or stdout.
//!
//! The minimum level lives in an atomic so that disabled log calls cost a
//! single load; the allocator hot paths only build an entry after checking
//! [`would_log`].
//!
//! # Example
//!
//! ```rust,ignore
//! use keel_runtime::log::{self, LogBuilder, LogLevel};
//!
//! log::info("memory", "address space reserved");
//!
//! LogBuilder::new(LogLevel::Debug)
//!     .target("memory")
//!     .message("block allocated")
//!     .field("index", 42u64)
//!     .field("address", format!("{:#x}", 0x7f00_0000_0000u64))
//!     .emit();
//! ```

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Log level, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum LogLevel {
    /// Per-register and per-block events.
    Trace = 0,
    /// Spills, exhaustion and other diagnostic events.
    Debug = 1,
    /// One-time set-up events.
    #[default]
    Info = 2,
    /// Recoverable OS failures.
    Warn = 3,
    /// Errors that precede a fatal condition.
    Error = 4,
    /// No logging.
    Off = 5,
}

impl LogLevel {
    /// Upper-case level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Off => "OFF",
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(LogLevel::Trace),
            1 => Some(LogLevel::Debug),
            2 => Some(LogLevel::Info),
            3 => Some(LogLevel::Warn),
            4 => Some(LogLevel::Error),
            5 => Some(LogLevel::Off),
            _ => None,
        }
    }

    /// Parse a level name or its numeric shorthand (`0` = off .. `5` = trace).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "off" | "none" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable single line.
    #[default]
    Plain,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parse a format name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "plain" | "text" => Some(LogFormat::Plain),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// A value in a structured log entry.
#[derive(Debug, Clone, PartialEq)]
pub enum LogValue {
    /// String value.
    Str(String),
    /// Unsigned integer value (indices, sizes, counts).
    Uint(u64),
    /// Signed integer value.
    Int(i64),
    /// Boolean value.
    Bool(bool),
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::Str(s) => f.write_str(s),
            LogValue::Uint(v) => write!(f, "{}", v),
            LogValue::Int(v) => write!(f, "{}", v),
            LogValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl LogValue {
    fn to_json(&self) -> String {
        match self {
            LogValue::Str(s) => format!("\"{}\"", escape_json(s)),
            other => other.to_string(),
        }
    }
}

impl From<&str> for LogValue {
    fn from(v: &str) -> Self {
        LogValue::Str(v.to_string())
    }
}

impl From<String> for LogValue {
    fn from(v: String) -> Self {
        LogValue::Str(v)
    }
}

impl From<u64> for LogValue {
    fn from(v: u64) -> Self {
        LogValue::Uint(v)
    }
}

impl From<usize> for LogValue {
    fn from(v: usize) -> Self {
        LogValue::Uint(v as u64)
    }
}

impl From<u32> for LogValue {
    fn from(v: u32) -> Self {
        LogValue::Uint(u64::from(v))
    }
}

impl From<i64> for LogValue {
    fn from(v: i64) -> Self {
        LogValue::Int(v)
    }
}

impl From<bool> for LogValue {
    fn from(v: bool) -> Self {
        LogValue::Bool(v)
    }
}

/// A single log record.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Severity.
    pub level: LogLevel,
    /// Subsystem that produced the entry.
    pub target: &'static str,
    /// Human readable message.
    pub message: String,
    /// Structured fields, in insertion order.
    pub fields: Vec<(&'static str, LogValue)>,
    /// Unix time in milliseconds.
    pub timestamp: u64,
    /// Name of the emitting thread, if it has one.
    pub thread_name: Option<String>,
}

impl LogEntry {
    /// Create an entry stamped with the current time and thread.
    pub fn new(level: LogLevel, target: &'static str, message: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            level,
            target,
            message: message.into(),
            fields: Vec::new(),
            timestamp,
            thread_name: std::thread::current().name().map(str::to_string),
        }
    }

    /// Render as a plain text line.
    pub fn format_plain(&self) -> String {
        let mut out = format!(
            "[{}.{:03}] {:<5} [{}] ",
            self.timestamp / 1000,
            self.timestamp % 1000,
            self.level.as_str(),
            self.target
        );

        if let Some(thread) = &self.thread_name {
            out.push_str(&format!("({}) ", thread));
        }

        out.push_str(&self.message);

        if !self.fields.is_empty() {
            let rendered: Vec<String> = self
                .fields
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            out.push_str(" {");
            out.push_str(&rendered.join(", "));
            out.push('}');
        }

        out
    }

    /// Render as a JSON object.
    pub fn format_json(&self) -> String {
        let mut out = format!(
            "{{\"timestamp\":{},\"level\":\"{}\",\"target\":\"{}\"",
            self.timestamp,
            self.level.as_str(),
            escape_json(self.target)
        );

        if let Some(thread) = &self.thread_name {
            out.push_str(&format!(",\"thread\":\"{}\"", escape_json(thread)));
        }

        out.push_str(&format!(",\"message\":\"{}\"", escape_json(&self.message)));

        if !self.fields.is_empty() {
            let rendered: Vec<String> = self
                .fields
                .iter()
                .map(|(k, v)| format!("\"{}\":{}", escape_json(k), v.to_json()))
                .collect();
            out.push_str(",\"fields\":{");
            out.push_str(&rendered.join(","));
            out.push('}');
        }

        out.push('}');
        out
    }

    /// Render in the given format.
    pub fn format(&self, format: LogFormat) -> String {
        match format {
            LogFormat::Plain => self.format_plain(),
            LogFormat::Json => self.format_json(),
        }
    }
}

fn escape_json(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Where and how entries are written.
#[derive(Debug)]
struct Sink {
    format: LogFormat,
    use_stderr: bool,
}

static SINK: OnceLock<Mutex<Sink>> = OnceLock::new();

static MIN_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

static ENABLED: AtomicBool = AtomicBool::new(true);

fn sink() -> &'static Mutex<Sink> {
    SINK.get_or_init(|| {
        Mutex::new(Sink {
            format: LogFormat::Plain,
            use_stderr: true,
        })
    })
}

/// Apply a logging configuration.
pub fn init(config: &crate::config::LogConfig) {
    set_level(config.level);
    set_format(config.format);
}

/// Set the minimum level.
pub fn set_level(level: LogLevel) {
    MIN_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Current minimum level.
pub fn level() -> LogLevel {
    LogLevel::from_u8(MIN_LEVEL.load(Ordering::SeqCst)).unwrap_or_default()
}

/// Set the output format.
pub fn set_format(format: LogFormat) {
    sink().lock().format = format;
}

/// Write to stderr (default) or stdout.
pub fn set_use_stderr(use_stderr: bool) {
    sink().lock().use_stderr = use_stderr;
}

/// Enable or disable all logging.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::SeqCst);
}

/// Whether logging is enabled at all.
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}

/// Whether an entry at `level` would be written.
pub fn would_log(level: LogLevel) -> bool {
    level != LogLevel::Off && is_enabled() && level >= self::level()
}

/// Write an entry if its level passes the filter.
pub fn emit(entry: &LogEntry) {
    if !would_log(entry.level) {
        return;
    }

    let sink = sink().lock();
    let line = entry.format(sink.format);
    if sink.use_stderr {
        let _ = writeln!(std::io::stderr(), "{}", line);
    } else {
        let _ = writeln!(std::io::stdout(), "{}", line);
    }
}

/// Builder for structured entries.
#[derive(Debug)]
pub struct LogBuilder {
    entry: LogEntry,
}

impl LogBuilder {
    /// Start an entry at `level` with an empty message and the `keel` target.
    pub fn new(level: LogLevel) -> Self {
        Self {
            entry: LogEntry::new(level, "keel", ""),
        }
    }

    /// Set the message.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.entry.message = msg.into();
        self
    }

    /// Set the target.
    pub fn target(mut self, target: &'static str) -> Self {
        self.entry.target = target;
        self
    }

    /// Append a field.
    pub fn field(mut self, key: &'static str, value: impl Into<LogValue>) -> Self {
        self.entry.fields.push((key, value.into()));
        self
    }

    /// Finish without writing, for inspection.
    pub fn build(self) -> LogEntry {
        self.entry
    }

    /// Write the entry.
    pub fn emit(self) {
        emit(&self.entry);
    }
}

/// Log a message at `level` under `target`.
pub fn log(level: LogLevel, target: &'static str, message: impl Into<String>) {
    if would_log(level) {
        emit(&LogEntry::new(level, target, message));
    }
}

/// Log at trace level.
pub fn trace(target: &'static str, message: impl Into<String>) {
    log(LogLevel::Trace, target, message);
}

/// Log at debug level.
pub fn debug(target: &'static str, message: impl Into<String>) {
    log(LogLevel::Debug, target, message);
}

/// Log at info level.
pub fn info(target: &'static str, message: impl Into<String>) {
    log(LogLevel::Info, target, message);
}

/// Log at warn level.
pub fn warn(target: &'static str, message: impl Into<String>) {
    log(LogLevel::Warn, target, message);
}

/// Log at error level.
pub fn error(target: &'static str, message: impl Into<String>) {
    log(LogLevel::Error, target, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Off);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(LogLevel::parse("TRACE"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse(" Info "), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("0"), Some(LogLevel::Off));
        assert_eq!(LogLevel::parse("5"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(LogFormat::parse("text"), Some(LogFormat::Plain));
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn test_plain_rendering() {
        let entry = LogBuilder::new(LogLevel::Debug)
            .target("memory")
            .message("block allocated")
            .field("index", 3usize)
            .field("policy", "decommit")
            .build();

        let line = entry.format_plain();
        assert!(line.contains("DEBUG"));
        assert!(line.contains("[memory]"));
        assert!(line.contains("block allocated"));
        assert!(line.contains("index=3, policy=decommit"));
    }

    #[test]
    fn test_json_rendering() {
        let entry = LogBuilder::new(LogLevel::Warn)
            .target("regalloc")
            .message("spill \"r3\"")
            .field("hint", 7u32)
            .field("locked", false)
            .build();

        let json = entry.format_json();
        assert!(json.contains("\"level\":\"WARN\""));
        assert!(json.contains("\"target\":\"regalloc\""));
        assert!(json.contains("\"message\":\"spill \\\"r3\\\"\""));
        assert!(json.contains("\"hint\":7"));
        assert!(json.contains("\"locked\":false"));
    }

    #[test]
    fn test_escape_json_control_chars() {
        assert_eq!(escape_json("a\nb"), "a\\nb");
        assert_eq!(escape_json("\u{1}"), "\\u0001");
    }

    // Tests that touch the global filter or sink hold this.
    static GLOBAL_STATE: Mutex<()> = Mutex::new(());

    #[test]
    fn test_would_log_respects_level() {
        let _guard = GLOBAL_STATE.lock();
        let original = level();
        set_level(LogLevel::Warn);
        assert!(!would_log(LogLevel::Debug));
        assert!(would_log(LogLevel::Error));
        assert!(!would_log(LogLevel::Off));
        set_level(original);
    }

    #[test]
    fn test_disabled_logging_writes_nothing() {
        let _guard = GLOBAL_STATE.lock();
        let original = level();
        set_level(LogLevel::Trace);
        set_enabled(false);
        assert!(!is_enabled());
        assert!(!would_log(LogLevel::Error));
        trace("test", "dropped");
        debug("test", "dropped");
        info("test", "dropped");

        set_enabled(true);
        assert!(is_enabled());
        assert!(would_log(LogLevel::Trace));
        set_level(original);
    }

    #[test]
    fn test_sink_selection() {
        let _guard = GLOBAL_STATE.lock();
        let original = level();
        set_level(LogLevel::Trace);

        set_use_stderr(false);
        assert!(!sink().lock().use_stderr);
        trace("test", "to stdout");
        debug("test", "to stdout");
        info("test", "to stdout");

        set_use_stderr(true);
        assert!(sink().lock().use_stderr);
        set_level(original);
    }
}
