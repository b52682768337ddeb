use crate::alerts::AlertRule;
use crate::error::ConfigError;
use crate::events::Environment;
use crate::logging::LogLevel;
use crate::performance::PerformanceBudget;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level pipeline configuration
///
/// Every section and field is optional in the TOML file; missing values take
/// the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitoringConfig {
    pub environment: Environment,
    pub service: String,
    pub version: String,
    /// Seconds between periodic reports
    pub report_interval_seconds: u64,
    pub errors: ErrorsConfig,
    pub logging: LoggingConfig,
    pub performance: PerformanceConfig,
    pub alerts: AlertsConfig,
    pub wiring: WiringConfig,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            service: "app".to_string(),
            version: "0.0.0".to_string(),
            report_interval_seconds: 60,
            errors: ErrorsConfig::default(),
            logging: LoggingConfig::default(),
            performance: PerformanceConfig::default(),
            alerts: AlertsConfig::default(),
            wiring: WiringConfig::default(),
        }
    }
}

/// `[errors]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ErrorsConfig {
    pub enabled: bool,
    /// Fraction of occurrences stored, 0.0-1.0
    pub sample_rate: f64,
    /// Capacity of the error store
    pub max_errors: usize,
    /// Records not seen for this many days are reaped
    pub retention_days: u32,
    pub sweep_interval_seconds: u64,
    /// Replaces the built-in alert rules when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<AlertRule>>,
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 1.0,
            max_errors: 1000,
            retention_days: 7,
            sweep_interval_seconds: 3600,
            rules: None,
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub level: LogLevel,
    /// Fraction of debug/info/warn entries kept; error and fatal are never sampled
    pub sample_rate: f64,
    /// Buffered entries that trigger a flush
    pub buffer_size: usize,
    pub flush_interval_ms: u64,
    pub console: bool,
    /// Minimum level for the console transport, defaults to `level`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console_level: Option<LogLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_endpoint: Option<String>,
    /// Minimum level for the HTTP transport, defaults to `level`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_level: Option<LogLevel>,
    pub allow_components: Vec<String>,
    pub block_components: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: LogLevel::Info,
            sample_rate: 1.0,
            buffer_size: 100,
            flush_interval_ms: 5000,
            console: true,
            console_level: None,
            http_endpoint: None,
            http_level: None,
            allow_components: Vec::new(),
            block_components: Vec::new(),
        }
    }
}

/// `[performance]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PerformanceConfig {
    pub enabled: bool,
    pub memory_interval_seconds: u64,
    pub budgets: Vec<PerformanceBudget>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_interval_seconds: 5,
            budgets: Vec::new(),
        }
    }
}

/// `[alerts]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AlertsConfig {
    /// Registered as the `webhook` action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Registered as the `slack` action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slack_webhook_url: Option<String>,
    /// Run alert actions on the tracking thread instead of a worker
    pub inline_dispatch: bool,
}

/// `[wiring]` section: cross-component event routing in the hub
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WiringConfig {
    /// Performance alerts of severity `error` become tracked errors
    pub performance_alerts_to_errors: bool,
    /// Error and fatal log entries carrying an error become tracked errors
    pub error_logs_to_errors: bool,
    /// Rule and performance alerts become warn log entries
    pub alerts_to_logs: bool,
    /// Poor Web Vitals become warn log entries
    pub poor_vitals_to_logs: bool,
}

impl Default for WiringConfig {
    fn default() -> Self {
        Self {
            performance_alerts_to_errors: true,
            error_logs_to_errors: true,
            alerts_to_logs: true,
            poor_vitals_to_logs: true,
        }
    }
}

impl MonitoringConfig {
    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it is not valid TOML for this schema and
    /// `ConfigError::ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::ReadError {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_toml_str(&contents)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: MonitoringConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value is within its allowed range
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::ValidationError(message));

        if self.report_interval_seconds == 0 {
            return invalid("report_interval_seconds must be positive".to_string());
        }

        let errors = &self.errors;
        if !(0.0..=1.0).contains(&errors.sample_rate) {
            return invalid(format!(
                "errors.sample_rate must be within 0.0-1.0, got {}",
                errors.sample_rate
            ));
        }
        if errors.max_errors == 0 {
            return invalid("errors.max_errors must be positive".to_string());
        }
        if errors.retention_days == 0 {
            return invalid("errors.retention_days must be positive".to_string());
        }
        if errors.sweep_interval_seconds == 0 {
            return invalid("errors.sweep_interval_seconds must be positive".to_string());
        }
        if let Some(ref rules) = errors.rules {
            for rule in rules {
                rule.validate()?;
            }
        }

        let logging = &self.logging;
        if !(0.0..=1.0).contains(&logging.sample_rate) {
            return invalid(format!(
                "logging.sample_rate must be within 0.0-1.0, got {}",
                logging.sample_rate
            ));
        }
        if logging.buffer_size == 0 {
            return invalid("logging.buffer_size must be positive".to_string());
        }
        if logging.flush_interval_ms == 0 {
            return invalid("logging.flush_interval_ms must be positive".to_string());
        }
        if let Some(ref endpoint) = logging.http_endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return invalid(format!(
                    "logging.http_endpoint must be an http(s) URL, got '{}'",
                    endpoint
                ));
            }
        }

        if self.performance.memory_interval_seconds == 0 {
            return invalid("performance.memory_interval_seconds must be positive".to_string());
        }
        for budget in &self.performance.budgets {
            budget.validate()?;
        }

        Ok(())
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ComparisonOperator;
    use crate::performance::BudgetSeverity;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
environment = "production"
service = "web-frontend"
version = "1.0.0"
report_interval_seconds = 30

[errors]
sample_rate = 0.5
max_errors = 200

[[errors.rules]]
id = "api-burst"
name = "API burst"
cooldown = 5
condition = { error_type = "api", threshold = 20.0, time_window = 5, operator = "gte" }

[logging]
level = "warn"
buffer_size = 50
http_endpoint = "https://logs.example.com/batch"
block_components = ["noisy"]

[[performance.budgets]]
metric = "LCP"
threshold = 2500.0
operator = "lte"
severity = "error"

[alerts]
slack_webhook_url = "https://hooks.example.com/slack"

[wiring]
alerts_to_logs = false
"#;

    #[test]
    fn test_parse_full_config() {
        let config = MonitoringConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.report_interval(), Duration::from_secs(30));
        assert_eq!(config.errors.sample_rate, 0.5);
        assert_eq!(config.errors.retention_days, 7);

        let rules = config.errors.rules.as_ref().unwrap();
        assert_eq!(rules[0].id, "api-burst");
        assert_eq!(rules[0].actions, vec!["log".to_string()]);
        assert_eq!(rules[0].condition.operator, ComparisonOperator::Gte);

        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.logging.flush_interval_ms, 5000);
        assert_eq!(config.logging.block_components, vec!["noisy".to_string()]);

        assert_eq!(config.performance.budgets[0].severity, BudgetSeverity::Error);
        assert!(config.alerts.webhook_url.is_none());
        assert!(!config.wiring.alerts_to_logs);
        assert!(config.wiring.poor_vitals_to_logs);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = MonitoringConfig::from_toml_str("").unwrap();
        assert_eq!(config, MonitoringConfig::default());
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        let cases = [
            "[errors]\nsample_rate = 1.5",
            "[errors]\nmax_errors = 0",
            "[logging]\nbuffer_size = 0",
            "[logging]\nhttp_endpoint = \"ftp://logs\"",
            "[performance]\nmemory_interval_seconds = 0",
            "[[performance.budgets]]\nmetric = \"\"\nthreshold = 1.0\noperator = \"lt\"\nseverity = \"warning\"",
        ];
        for case in cases {
            assert!(
                matches!(
                    MonitoringConfig::from_toml_str(case),
                    Err(ConfigError::ValidationError(_))
                ),
                "expected validation error for {:?}",
                case
            );
        }
    }

    #[test]
    fn test_invalid_toml_is_a_toml_error() {
        let result = MonitoringConfig::from_toml_str("environment = \"moon\"");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = MonitoringConfig::from_file(file.path()).unwrap();
        assert_eq!(config.service, "web-frontend");
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = MonitoringConfig::from_file(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }
}
