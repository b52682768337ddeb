//! Log entries, levels and metadata

use crate::events::{Environment, Timestamp};
use crate::tracking::RawError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Free-form structured fields attached to an entry
pub type Fields = BTreeMap<String, serde_json::Value>;

/// Log severity, ordered `debug < info < warn < error < fatal`
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Fatal,
    ];

    /// Position in `ALL`, used for per-level counters
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        }
    }

    /// Levels that bypass sampling and flush the buffer immediately
    pub fn is_error(self) -> bool {
        self >= LogLevel::Error
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" | "critical" => Ok(LogLevel::Fatal),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Contextual metadata carried by every entry
///
/// Loggers hold a base metadata value; child loggers overlay their own on top
/// of it with `merge`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LogMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl LogMetadata {
    pub fn component(component: impl Into<String>) -> Self {
        Self {
            component: Some(component.into()),
            ..Self::default()
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Copy of `self` with every field set in `overlay` taking precedence
    ///
    /// Tags are unioned, keeping first-seen order.
    pub fn merge(&self, overlay: &LogMetadata) -> LogMetadata {
        let mut tags = self.tags.clone();
        for tag in &overlay.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }

        LogMetadata {
            environment: overlay.environment.or(self.environment),
            service: overlay.service.clone().or_else(|| self.service.clone()),
            version: overlay.version.clone().or_else(|| self.version.clone()),
            session_id: overlay.session_id.clone().or_else(|| self.session_id.clone()),
            user_id: overlay.user_id.clone().or_else(|| self.user_id.clone()),
            request_id: overlay.request_id.clone().or_else(|| self.request_id.clone()),
            trace_id: overlay.trace_id.clone().or_else(|| self.trace_id.clone()),
            component: overlay.component.clone().or_else(|| self.component.clone()),
            action: overlay.action.clone().or_else(|| self.action.clone()),
            duration_ms: overlay.duration_ms.or(self.duration_ms),
            tags,
        }
    }
}

/// Structured error attached to a log entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl LogError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            code: None,
        }
    }

    /// Capture any `std::error::Error`, folding its source chain into `stack`
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let raw = RawError::from_error(error);
        Self {
            name: "Error".to_string(),
            message: raw.message,
            stack: raw.stack,
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Convert into the error tracker's input form
    pub fn to_raw_error(&self) -> RawError {
        RawError {
            name: Some(self.name.clone()),
            message: self.message.clone(),
            stack: self.stack.clone(),
            code: self.code.clone(),
            ..RawError::default()
        }
    }
}

/// One immutable log record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: Timestamp,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: Fields,
    #[serde(default)]
    pub metadata: LogMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LogError>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            level,
            message: message.into(),
            fields: Fields::new(),
            metadata: LogMetadata::default(),
            error: None,
        }
    }

    /// Single-line text rendering used by the console transport
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "{} {:<5} ",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.level.as_str().to_uppercase()
        );
        if let Some(ref component) = self.metadata.component {
            line.push_str(&format!("[{}] ", component));
        }
        line.push_str(&self.message);
        for (key, value) in &self.fields {
            line.push_str(&format!(" {}={}", key, value));
        }
        if let Some(ref error) = self.error {
            line.push_str(&format!(" error={}: {}", error.name, error.message));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_level_ordering_and_index() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Error < LogLevel::Fatal);
        for (i, level) in LogLevel::ALL.iter().enumerate() {
            assert_eq!(level.index(), i);
        }
        assert!(LogLevel::Fatal.is_error());
        assert!(!LogLevel::Warn.is_error());
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("fatal".parse::<LogLevel>().unwrap(), LogLevel::Fatal);
        assert!("loud".parse::<LogLevel>().is_err());

        let level: LogLevel = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(level, LogLevel::Error);
    }

    #[test]
    fn test_metadata_merge_prefers_overlay() {
        let base = LogMetadata {
            service: Some("web".to_string()),
            component: Some("app".to_string()),
            tags: vec!["base".to_string()],
            ..LogMetadata::default()
        };
        let overlay = LogMetadata::component("checkout")
            .with_tag("base")
            .with_tag("child");

        let merged = base.merge(&overlay);
        assert_eq!(merged.service.as_deref(), Some("web"));
        assert_eq!(merged.component.as_deref(), Some("checkout"));
        assert_eq!(merged.tags, vec!["base".to_string(), "child".to_string()]);
    }

    #[test]
    fn test_log_error_to_raw_error() {
        let raw = LogError::new("TypeError", "x is undefined")
            .with_code("E_UNDEF")
            .to_raw_error();
        assert_eq!(raw.name.as_deref(), Some("TypeError"));
        assert_eq!(raw.code.as_deref(), Some("E_UNDEF"));
        assert_eq!(raw.message, "x is undefined");
    }

    #[test]
    fn test_entry_line_rendering() {
        let mut entry = LogEntry::new(LogLevel::Warn, "slow response", Utc::now());
        entry.metadata.component = Some("api".to_string());
        entry
            .fields
            .insert("ms".to_string(), serde_json::json!(1200));

        let line = entry.to_line();
        assert!(line.contains("WARN  [api] slow response ms=1200"));
    }
}
