//! Newline-delimited JSON signals fed to the hub by the `vigil` binary
//!
//! Each line is one object tagged by `kind`:
//!
//! ```text
//! {"kind":"error","message":"Request failed","status":503}
//! {"kind":"log","level":"warn","message":"Slow response","fields":{"ms":1200}}
//! {"kind":"metric","name":"api_latency","value":320.5,"unit":"ms"}
//! {"kind":"vital","name":"LCP","value":2800}
//! ```

use crate::hub::MonitoringHub;
use crate::logging::{Fields, LogError, LogLevel};
use crate::performance::{MetricCategory, MetricOptions, WebVital};
use crate::tracking::{ContextPatch, RawError};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::BTreeMap;

fn default_unit() -> String {
    "ms".to_string()
}

/// One inbound signal
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Signal {
    Error {
        #[serde(flatten)]
        error: RawError,
        #[serde(default)]
        context: Option<ContextPatch>,
    },
    Log {
        #[serde(default)]
        level: LogLevel,
        message: String,
        #[serde(default)]
        fields: Option<Fields>,
        #[serde(default)]
        error: Option<LogError>,
    },
    Metric {
        name: String,
        value: f64,
        #[serde(default = "default_unit")]
        unit: String,
        #[serde(default)]
        category: MetricCategory,
        #[serde(default)]
        tags: BTreeMap<String, String>,
    },
    Vital {
        name: WebVital,
        value: f64,
    },
}

impl Signal {
    /// Parse one NDJSON line
    pub fn from_json(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Feed the signal to the hub
    pub fn apply(self, hub: &MonitoringHub) {
        match self {
            Signal::Error { error, context } => {
                hub.track_error(error, context.as_ref());
            }
            Signal::Log {
                level,
                message,
                fields,
                error,
            } => {
                hub.log(level, message, fields, error);
            }
            Signal::Metric {
                name,
                value,
                unit,
                category,
                tags,
            } => {
                let options = MetricOptions {
                    category,
                    tags,
                    timestamp: None,
                };
                hub.record_metric(&name, value, &unit, options);
            }
            Signal::Vital { name, value } => {
                hub.record_web_vital(name, value);
            }
        }
    }
}

/// Counts of lines seen by `Ingestor`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub accepted: u64,
    pub rejected: u64,
}

/// Parses lines and applies them to a hub, counting malformed input
pub struct Ingestor<'a> {
    hub: &'a MonitoringHub,
    summary: IngestSummary,
}

impl<'a> Ingestor<'a> {
    pub fn new(hub: &'a MonitoringHub) -> Self {
        Self {
            hub,
            summary: IngestSummary::default(),
        }
    }

    /// Handle one line; blank lines are skipped, malformed ones logged and counted
    pub fn line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match Signal::from_json(line) {
            Ok(signal) => {
                debug!("Ingesting {:?}", signal);
                signal.apply(self.hub);
                self.summary.accepted += 1;
            }
            Err(e) => {
                warn!("Skipping malformed signal: {} ({})", e, line);
                self.summary.rejected += 1;
            }
        }
    }

    pub fn summary(&self) -> IngestSummary {
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitoringConfig;
    use crate::tracking::ErrorType;

    fn hub() -> MonitoringHub {
        let mut config = MonitoringConfig::default();
        config.logging.console = false;
        config.alerts.inline_dispatch = true;
        MonitoringHub::new(config).unwrap()
    }

    #[test]
    fn test_parse_each_kind() {
        let error = Signal::from_json(
            r#"{"kind":"error","message":"Request failed","status":503,"context":{"user_id":"u1"}}"#,
        )
        .unwrap();
        match error {
            Signal::Error { error, context } => {
                assert_eq!(error.status, Some(503));
                assert_eq!(context.unwrap().user_id.as_deref(), Some("u1"));
            }
            other => panic!("unexpected signal {:?}", other),
        }

        let log = Signal::from_json(r#"{"kind":"log","message":"hi"}"#).unwrap();
        assert!(matches!(log, Signal::Log { level: LogLevel::Info, .. }));

        let metric = Signal::from_json(r#"{"kind":"metric","name":"latency","value":12.5}"#).unwrap();
        match metric {
            Signal::Metric { unit, category, .. } => {
                assert_eq!(unit, "ms");
                assert_eq!(category, MetricCategory::Custom);
            }
            other => panic!("unexpected signal {:?}", other),
        }

        let vital = Signal::from_json(r#"{"kind":"vital","name":"LCP","value":2800}"#).unwrap();
        assert_eq!(
            vital,
            Signal::Vital {
                name: WebVital::Lcp,
                value: 2800.0
            }
        );
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(Signal::from_json(r#"{"kind":"trace","message":"x"}"#).is_err());
        assert!(Signal::from_json("not json").is_err());
    }

    #[test]
    fn test_ingestor_feeds_hub() {
        let hub = hub();
        let mut ingestor = Ingestor::new(&hub);

        for line in [
            r#"{"kind":"error","message":"Request failed","status":503}"#,
            r#"{"kind":"error","message":"Request failed","status":503}"#,
            "",
            r#"{"kind":"metric","name":"api_latency","value":320.5}"#,
            r#"{"kind":"vital","name":"CLS","value":0.3}"#,
            r#"{"kind":"log","level":"info","message":"ok"}"#,
            "{broken",
        ] {
            ingestor.line(line);
        }

        assert_eq!(
            ingestor.summary(),
            IngestSummary {
                accepted: 5,
                rejected: 1
            }
        );

        let errors = hub.tracker().errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].count, 2);
        assert_eq!(errors[0].error_type, ErrorType::Api);
        assert_eq!(hub.collector().metrics().len(), 1);
        assert_eq!(hub.collector().web_vitals().len(), 1);
        assert_eq!(hub.stats().snapshot().logs_accepted, 2);
    }
}
