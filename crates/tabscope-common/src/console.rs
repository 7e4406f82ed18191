//! Console transcript lines.
//!
//! Each captured console message is rendered to its transcript form once, at
//! creation, so the byte length used for size accounting never drifts from
//! what the export step writes.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::protocol::ConsoleMessage;

/// Severity tag for a console line. Unrecognized levels pass through with
/// their original spelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Debug,
    Other(String),
}

impl Severity {
    pub fn from_level(level: &str) -> Self {
        match level {
            "log" | "info" => Severity::Info,
            "warning" => Severity::Warning,
            "error" => Severity::Error,
            "debug" => Severity::Debug,
            other => Severity::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "Info"),
            Severity::Warning => write!(f, "Warning"),
            Severity::Error => write!(f, "Error"),
            Severity::Debug => write!(f, "Debug"),
            Severity::Other(level) => write!(f, "{}", level),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub url: String,
    pub line: u32,
    pub column: u32,
}

/// One immutable transcript line: `[<ts>] [<Tag>] <text>( (<url>:<line>:<col>))?`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleLogLine {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub text: String,
    pub location: Option<SourceLocation>,
    rendered: String,
}

impl ConsoleLogLine {
    pub fn new(timestamp: DateTime<Utc>, message: &ConsoleMessage) -> Self {
        let severity = Severity::from_level(&message.level);
        let location = message
            .url
            .as_ref()
            .filter(|url| !url.is_empty())
            .map(|url| SourceLocation {
                url: url.clone(),
                line: message.line.unwrap_or(0),
                column: message.column.unwrap_or(0),
            });

        let mut rendered = format!(
            "[{}] [{}] {}",
            timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            severity,
            message.text
        );
        if let Some(loc) = &location {
            rendered.push_str(&format!(" ({}:{}:{})", loc.url, loc.line, loc.column));
        }

        Self {
            timestamp,
            severity,
            text: message.text.clone(),
            location,
            rendered,
        }
    }

    /// The transcript form of this line, without the trailing newline.
    pub fn rendered(&self) -> &str {
        &self.rendered
    }

    /// UTF-8 byte length of the rendered line plus its newline. This is the
    /// amount the line contributes to the accumulator's size counter.
    pub fn encoded_len(&self) -> usize {
        self.rendered.len() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(level: &str, text: &str, url: Option<&str>) -> ConsoleMessage {
        ConsoleMessage {
            level: level.to_string(),
            text: text.to_string(),
            url: url.map(str::to_string),
            line: Some(3),
            column: Some(7),
        }
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(Severity::from_level("log"), Severity::Info);
        assert_eq!(Severity::from_level("info"), Severity::Info);
        assert_eq!(Severity::from_level("warning"), Severity::Warning);
        assert_eq!(Severity::from_level("error"), Severity::Error);
        assert_eq!(Severity::from_level("debug"), Severity::Debug);
        assert_eq!(
            Severity::from_level("verbose"),
            Severity::Other("verbose".to_string())
        );
    }

    #[test]
    fn test_rendered_line_with_location() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let line = ConsoleLogLine::new(ts, &message("warning", "boom", Some("https://x")));
        assert_eq!(
            line.rendered(),
            "[2024-03-01T12:00:00.000Z] [Warning] boom (https://x:3:7)"
        );
    }

    #[test]
    fn test_rendered_line_without_location() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let line = ConsoleLogLine::new(ts, &message("log", "hello", None));
        assert_eq!(line.rendered(), "[2024-03-01T12:00:00.000Z] [Info] hello");
        assert_eq!(line.encoded_len(), line.rendered().len() + 1);
    }

    #[test]
    fn test_unrecognized_level_passes_through() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let line = ConsoleLogLine::new(ts, &message("verbose", "v", None));
        assert_eq!(line.rendered(), "[2024-03-01T12:00:00.000Z] [verbose] v");
    }

    #[test]
    fn test_empty_url_suppresses_location() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let line = ConsoleLogLine::new(ts, &message("log", "x", Some("")));
        assert!(line.location.is_none());
        assert_eq!(line.rendered(), "[2024-03-01T12:00:00.000Z] [Info] x");
    }
}
