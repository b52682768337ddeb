//! Error records and the raw input they are built from

use crate::events::{Environment, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Classification of where an error came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Javascript,
    Api,
    Network,
    Validation,
    Business,
    Security,
}

impl ErrorType {
    pub const ALL: [ErrorType; 6] = [
        ErrorType::Javascript,
        ErrorType::Api,
        ErrorType::Network,
        ErrorType::Validation,
        ErrorType::Business,
        ErrorType::Security,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::Javascript => "javascript",
            ErrorType::Api => "api",
            ErrorType::Network => "network",
            ErrorType::Validation => "validation",
            ErrorType::Business => "business",
            ErrorType::Security => "security",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Impact level of a tracked error
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub const ALL: [ErrorSeverity; 4] = [
        ErrorSeverity::Low,
        ErrorSeverity::Medium,
        ErrorSeverity::High,
        ErrorSeverity::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context attached to a tracked error when it is first recorded
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ErrorContext {
    pub session_id: String,
    pub user_id: Option<String>,
    pub environment: Environment,
    pub service: String,
    pub version: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ErrorContext {
    /// Overlay every field set in `patch`; metadata keys are merged
    pub fn apply(&mut self, patch: &ContextPatch) {
        if let Some(session_id) = &patch.session_id {
            self.session_id = session_id.clone();
        }
        if let Some(user_id) = &patch.user_id {
            self.user_id = Some(user_id.clone());
        }
        if let Some(environment) = patch.environment {
            self.environment = environment;
        }
        if let Some(service) = &patch.service {
            self.service = service.clone();
        }
        if let Some(version) = &patch.version {
            self.version = version.clone();
        }
        for (key, value) in &patch.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
    }

    /// Copy of this context with `patch` applied
    pub fn merged(&self, patch: &ContextPatch) -> Self {
        let mut context = self.clone();
        context.apply(patch);
        context
    }
}

/// Partial update for an `ErrorContext`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ContextPatch {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub environment: Option<Environment>,
    pub service: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ContextPatch {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// An error as reported by the host before classification
///
/// Every field except `message` is optional; `name` mirrors an exception class
/// name (`TypeError`, `NetworkError`, ...) and drives the default classifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RawError {
    #[serde(default)]
    pub name: Option<String>,
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, rename = "type")]
    pub error_type: Option<ErrorType>,
    #[serde(default)]
    pub severity: Option<ErrorSeverity>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RawError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Coerce any `std::error::Error` into a raw error using its display text
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut raw = Self::new(error.to_string());
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {}", cause));
            source = cause.source();
        }
        if !chain.is_empty() {
            raw.stack = Some(chain.join("\n"));
        }
        raw
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_type(mut self, error_type: ErrorType) -> Self {
        self.error_type = Some(error_type);
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

impl From<&str> for RawError {
    fn from(message: &str) -> Self {
        RawError::new(message)
    }
}

impl From<String> for RawError {
    fn from(message: String) -> Self {
        RawError::new(message)
    }
}

/// One group of error occurrences sharing a fingerprint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedError {
    pub id: String,
    pub fingerprint: String,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub severity: ErrorSeverity,
    pub name: Option<String>,
    pub message: String,
    pub stack: Option<String>,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub count: u64,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    pub resolved: bool,
    pub tags: Vec<String>,
    pub context: ErrorContext,
    /// Distinct users who hit this error
    pub affected_users: BTreeSet<String>,
}
