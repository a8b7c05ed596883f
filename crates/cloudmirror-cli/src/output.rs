//! Human and JSON output for CLI commands
//!
//! Human output goes to stdout with a status glyph per line; problems go to
//! stderr. JSON output prints one object per message and pretty-prints
//! command results, so `cloudmirror --json ... | jq` sees only data on stdout.

use serde_json::json;

/// Output format selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        self == OutputFormat::Json
    }
}

/// Severity of a single output line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Success,
    Info,
    Warning,
    Error,
}

impl Level {
    fn glyph(self) -> &'static str {
        match self {
            Level::Success => "\u{2713} ",
            Level::Info => "  ",
            Level::Warning => "\u{26a0} Warning: ",
            Level::Error => "\u{2717} Error: ",
        }
    }

    fn name(self) -> &'static str {
        match self {
            Level::Success => "success",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        }
    }

    fn is_problem(self) -> bool {
        matches!(self, Level::Warning | Level::Error)
    }
}

/// Trait for formatting CLI output
pub trait OutputFormatter {
    /// Write one message at `level`
    fn emit(&self, level: Level, message: &str);

    /// Write a structured command result
    fn print_json(&self, value: &serde_json::Value);

    fn success(&self, message: &str) {
        self.emit(Level::Success, message);
    }
    fn info(&self, message: &str) {
        self.emit(Level::Info, message);
    }
    fn warn(&self, message: &str) {
        self.emit(Level::Warning, message);
    }
    fn error(&self, message: &str) {
        self.emit(Level::Error, message);
    }
}

/// Glyph-prefixed text for terminals
pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn emit(&self, level: Level, message: &str) {
        if level.is_problem() {
            eprintln!("{}{message}", level.glyph());
        } else {
            println!("{}{message}", level.glyph());
        }
    }

    fn print_json(&self, _value: &serde_json::Value) {}
}

/// Machine-readable output; informational chatter is dropped
pub struct JsonFormatter;

impl JsonFormatter {
    fn line(level: Level, message: &str) -> serde_json::Value {
        match level {
            Level::Error => json!({ "success": false, "error": message }),
            Level::Success => json!({ "success": true, "message": message }),
            _ => json!({ "level": level.name(), "message": message }),
        }
    }
}

impl OutputFormatter for JsonFormatter {
    fn emit(&self, level: Level, message: &str) {
        match level {
            Level::Info => {}
            Level::Success => println!("{}", Self::line(level, message)),
            Level::Warning | Level::Error => eprintln!("{}", Self::line(level, message)),
        }
    }

    fn print_json(&self, value: &serde_json::Value) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("{}", Self::line(Level::Error, &e.to_string())),
        }
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Human => Box::new(HumanFormatter),
    }
}

/// Format bytes as a human-readable string (e.g., "2.1 MB")
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{bytes} bytes");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// `"1 file"` / `"3 files"`
pub fn plural(n: impl Into<u64>, noun: &str) -> String {
    let n = n.into();
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}
