//! Type and severity inference for raw errors
//!
//! The default policy is a heuristic over HTTP status, exception name and
//! error code prefix. Hosts with their own error taxonomy can plug in a
//! different `ErrorClassifier`.

use crate::tracking::record::{ErrorSeverity, ErrorType, RawError};

/// Result of classifying a raw error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub error_type: ErrorType,
    pub severity: ErrorSeverity,
}

/// Strategy for classifying raw errors
///
/// Implementations must never panic: classification runs on the caller's
/// path inside `track_error`.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, raw: &RawError) -> Classification;
}

/// Built-in classification policy
///
/// Explicit `error_type` / `severity` fields on the raw error always win.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl DefaultClassifier {
    fn infer_type(raw: &RawError) -> ErrorType {
        if let Some(error_type) = raw.error_type {
            return error_type;
        }

        let name = raw.name.as_deref().unwrap_or_default().to_lowercase();
        let code = raw.code.as_deref().unwrap_or_default().to_uppercase();

        if matches!(raw.status, Some(401) | Some(403))
            || name.contains("security")
            || name.contains("auth")
            || code.starts_with("SECURITY_")
            || code.starts_with("AUTH_")
        {
            return ErrorType::Security;
        }

        if raw.status == Some(0)
            || name.contains("network")
            || name.contains("timeout")
            || code.starts_with("NETWORK_")
            || code.starts_with("ECONN")
            || code.starts_with("ETIMEDOUT")
        {
            return ErrorType::Network;
        }

        if matches!(raw.status, Some(400) | Some(422))
            || name.contains("validation")
            || code.starts_with("VALIDATION_")
        {
            return ErrorType::Validation;
        }

        if code.starts_with("BUSINESS_") {
            return ErrorType::Business;
        }

        if raw.status.is_some() {
            return ErrorType::Api;
        }

        ErrorType::Javascript
    }

    fn infer_severity(raw: &RawError, error_type: ErrorType) -> ErrorSeverity {
        if let Some(severity) = raw.severity {
            return severity;
        }

        let name = raw.name.as_deref().unwrap_or_default();

        if name.to_lowercase().contains("fatal") {
            return ErrorSeverity::Critical;
        }

        match raw.status {
            Some(status) if status >= 500 => return ErrorSeverity::High,
            Some(404) => return ErrorSeverity::Low,
            _ => {}
        }

        if error_type == ErrorType::Security {
            return ErrorSeverity::High;
        }

        if matches!(
            name,
            "TypeError" | "ReferenceError" | "SyntaxError" | "RangeError"
        ) {
            return ErrorSeverity::High;
        }

        ErrorSeverity::Medium
    }
}

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, raw: &RawError) -> Classification {
        let error_type = Self::infer_type(raw);
        let severity = Self::infer_severity(raw, error_type);
        Classification {
            error_type,
            severity,
        }
    }
}
