//! Alert rule definitions and the built-in rule templates
//!
//! A rule sums the occurrence counts of stored errors that match its filter and
//! were last seen inside its time window, and fires when that sum satisfies its
//! comparison against the threshold. A fired rule stays silent for `cooldown`
//! minutes.

use crate::error::ConfigError;
use crate::events::{ComparisonOperator, Timestamp};
use crate::tracking::{ErrorSeverity, ErrorType, TrackedError};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Name of the alert action registered by default
pub const LOG_ACTION: &str = "log";

/// Condition part of an alert rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertCondition {
    /// Only count errors of this type
    #[serde(default)]
    pub error_type: Option<ErrorType>,
    /// Only count errors of this severity
    #[serde(default)]
    pub severity: Option<ErrorSeverity>,
    /// Value the windowed sum is compared against
    pub threshold: f64,
    /// Window length in minutes
    pub time_window: u32,
    /// How the windowed sum is compared with the threshold
    pub operator: ComparisonOperator,
}

impl AlertCondition {
    /// Whether an error passes the type/severity filter
    pub fn matches(&self, error: &TrackedError) -> bool {
        self.error_type.map_or(true, |t| t == error.error_type)
            && self.severity.map_or(true, |s| s == error.severity)
    }
}

/// Configurable threshold/window alert rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub condition: AlertCondition,
    /// Names of registered alert actions to dispatch to
    #[serde(default = "default_actions")]
    pub actions: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Minutes the rule stays silent after firing
    #[serde(default)]
    pub cooldown: u32,
    #[serde(default)]
    pub last_triggered: Option<Timestamp>,
}

fn default_actions() -> Vec<String> {
    vec![LOG_ACTION.to_string()]
}

fn default_enabled() -> bool {
    true
}

impl AlertRule {
    /// Create an enabled rule dispatching to the `log` action with no cooldown
    pub fn new(id: impl Into<String>, name: impl Into<String>, condition: AlertCondition) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            condition,
            actions: default_actions(),
            enabled: true,
            cooldown: 0,
            last_triggered: None,
        }
    }

    pub fn with_cooldown(mut self, minutes: u32) -> Self {
        self.cooldown = minutes;
        self
    }

    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    /// Reject rules that could never evaluate meaningfully
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "alert rule id must not be empty".to_string(),
            ));
        }
        if !self.condition.threshold.is_finite() || self.condition.threshold < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "alert rule '{}' threshold must be a finite non-negative number",
                self.id
            )));
        }
        if self.condition.time_window == 0 {
            return Err(ConfigError::ValidationError(format!(
                "alert rule '{}' time window must be at least one minute",
                self.id
            )));
        }
        Ok(())
    }

    /// Whether the rule fired less than `cooldown` minutes before `now`
    pub fn is_cooling_down(&self, now: Timestamp) -> bool {
        match self.last_triggered {
            Some(last) => now < last + Duration::minutes(i64::from(self.cooldown)),
            None => false,
        }
    }

    /// Sum of occurrence counts of matching errors seen in the window
    ///
    /// Resolved records count too; their `last_seen` still places them in or
    /// out of the window.
    pub fn windowed_count<'a, I>(&self, errors: I, now: Timestamp) -> u64
    where
        I: IntoIterator<Item = &'a TrackedError>,
    {
        let cutoff = now - Duration::minutes(i64::from(self.condition.time_window));
        errors
            .into_iter()
            .filter(|error| {
                self.condition.matches(error)
                    && error.last_seen >= cutoff
                    && error.last_seen <= now
            })
            .map(|error| error.count)
            .sum()
    }

    /// Any critical error (cooldown 5 minutes)
    pub fn critical_errors() -> Self {
        Self::new(
            "critical-errors",
            "Critical error detected",
            AlertCondition {
                error_type: None,
                severity: Some(ErrorSeverity::Critical),
                threshold: 1.0,
                time_window: 1,
                operator: ComparisonOperator::Gte,
            },
        )
        .with_cooldown(5)
    }

    /// 50 or more errors of any type within 5 minutes (cooldown 15 minutes)
    pub fn error_spike() -> Self {
        Self::new(
            "error-spike",
            "Error rate spike",
            AlertCondition {
                error_type: None,
                severity: None,
                threshold: 50.0,
                time_window: 5,
                operator: ComparisonOperator::Gte,
            },
        )
        .with_cooldown(15)
    }

    /// 10 or more security errors within 5 minutes (cooldown 10 minutes)
    pub fn security_errors() -> Self {
        Self::new(
            "security-errors",
            "Security error burst",
            AlertCondition {
                error_type: Some(ErrorType::Security),
                severity: None,
                threshold: 10.0,
                time_window: 5,
                operator: ComparisonOperator::Gte,
            },
        )
        .with_cooldown(10)
    }

    /// The built-in rule templates
    pub fn default_rules() -> Vec<AlertRule> {
        vec![
            Self::critical_errors(),
            Self::error_spike(),
            Self::security_errors(),
        ]
    }
}
