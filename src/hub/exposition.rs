//! Prometheus text exposition of a monitoring report

use crate::hub::report::MonitoringReport;
use crate::logging::LogLevel;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

/// Escape a label value: backslash, double quote and newline
pub fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

/// Accumulates metric families in exposition order
#[derive(Debug, Default)]
pub struct PrometheusWriter {
    out: String,
}

impl PrometheusWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one unlabelled sample with its HELP/TYPE header
    pub fn single(&mut self, name: &str, help: &str, kind: MetricKind, value: f64) {
        self.family(name, help, kind, &[(Vec::new(), value)]);
    }

    /// Write a metric family: header, then one line per labelled sample
    pub fn family(
        &mut self,
        name: &str,
        help: &str,
        kind: MetricKind,
        samples: &[(Vec<(&str, String)>, f64)],
    ) {
        let _ = writeln!(self.out, "# HELP {} {}", name, help);
        let _ = writeln!(self.out, "# TYPE {} {}", name, kind.as_str());
        for (labels, value) in samples {
            if labels.is_empty() {
                let _ = writeln!(self.out, "{} {}", name, format_value(*value));
                continue;
            }
            let rendered: Vec<String> = labels
                .iter()
                .map(|(key, value)| format!("{}=\"{}\"", key, escape_label_value(value)))
                .collect();
            let _ = writeln!(
                self.out,
                "{}{{{}}} {}",
                name,
                rendered.join(","),
                format_value(*value)
            );
        }
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// Render the counters and gauges of a report in the text exposition format
pub fn render_report(report: &MonitoringReport) -> String {
    let pipeline = &report.pipeline;
    let mut w = PrometheusWriter::new();

    w.single(
        "vigil_errors_tracked_total",
        "Error occurrences stored by the tracker",
        MetricKind::Counter,
        pipeline.errors_tracked as f64,
    );
    w.single(
        "vigil_errors_sampled_out_total",
        "Error occurrences dropped by sampling",
        MetricKind::Counter,
        pipeline.errors_sampled_out as f64,
    );
    w.single(
        "vigil_error_groups",
        "Distinct error fingerprints in the store",
        MetricKind::Gauge,
        report.errors.unique as f64,
    );
    w.single(
        "vigil_errors_unresolved",
        "Unresolved error groups",
        MetricKind::Gauge,
        report.errors.unresolved as f64,
    );

    let by_type: Vec<_> = report
        .errors
        .by_type
        .iter()
        .map(|(error_type, count)| (vec![("type", error_type.to_string())], *count as f64))
        .collect();
    w.family(
        "vigil_errors_by_type",
        "Error occurrences in the store by type",
        MetricKind::Gauge,
        &by_type,
    );

    let by_severity: Vec<_> = report
        .errors
        .by_severity
        .iter()
        .map(|(severity, count)| (vec![("severity", severity.to_string())], *count as f64))
        .collect();
    w.family(
        "vigil_errors_by_severity",
        "Error occurrences in the store by severity",
        MetricKind::Gauge,
        &by_severity,
    );

    let top: Vec<_> = report
        .errors
        .top_errors
        .iter()
        .map(|error| {
            (
                vec![
                    ("fingerprint", error.fingerprint.clone()),
                    ("message", error.message.clone()),
                ],
                error.count as f64,
            )
        })
        .collect();
    w.family(
        "vigil_top_error_count",
        "Occurrence count of the most frequent error groups",
        MetricKind::Gauge,
        &top,
    );

    w.single(
        "vigil_alerts_triggered_total",
        "Alert rules that fired",
        MetricKind::Counter,
        pipeline.alerts_triggered as f64,
    );
    w.family(
        "vigil_alert_dispatch_total",
        "Alert action dispatches by outcome",
        MetricKind::Counter,
        &[
            (vec![("outcome", "success".to_string())], pipeline.alert_dispatches as f64),
            (
                vec![("outcome", "failure".to_string())],
                pipeline.alert_dispatch_failures as f64,
            ),
        ],
    );

    let by_level: Vec<_> = LogLevel::ALL
        .iter()
        .map(|level| {
            (
                vec![("level", level.to_string())],
                pipeline.logs_by_level[level.index()] as f64,
            )
        })
        .collect();
    w.family(
        "vigil_logs_total",
        "Log entries accepted by level",
        MetricKind::Counter,
        &by_level,
    );
    w.single(
        "vigil_logs_filtered_total",
        "Log entries rejected by the filter chain",
        MetricKind::Counter,
        pipeline.logs_filtered as f64,
    );
    w.single(
        "vigil_log_flushes_total",
        "Non-empty log buffer flushes",
        MetricKind::Counter,
        pipeline.log_flushes as f64,
    );
    w.single(
        "vigil_transport_failures_total",
        "Log transport failures",
        MetricKind::Counter,
        pipeline.transport_failures as f64,
    );
    w.single(
        "vigil_metrics_recorded_total",
        "Performance metrics recorded",
        MetricKind::Counter,
        pipeline.metrics_recorded as f64,
    );
    w.single(
        "vigil_performance_alerts_total",
        "Performance budget violations",
        MetricKind::Counter,
        pipeline.performance_alerts as f64,
    );

    let vitals: Vec<_> = report
        .performance
        .web_vitals
        .values()
        .map(|sample| {
            (
                vec![
                    ("name", sample.name.to_string()),
                    ("rating", sample.rating.to_string()),
                ],
                sample.value,
            )
        })
        .collect();
    w.family(
        "vigil_web_vital",
        "Latest Web Vital reading",
        MetricKind::Gauge,
        &vitals,
    );

    if let Some(ref memory) = report.performance.memory {
        w.single(
            "vigil_memory_usage_percent",
            "Memory in use as a percentage of the limit",
            MetricKind::Gauge,
            memory.usage_percent,
        );
    }
    w.single(
        "vigil_performance_score",
        "Performance score derived from Web Vitals (0-100)",
        MetricKind::Gauge,
        f64::from(report.performance.score),
    );
    w.single(
        "vigil_health_score",
        "Overall health score (0-100)",
        MetricKind::Gauge,
        f64::from(report.health.score),
    );
    w.single(
        "vigil_alert_dispatch_success_rate",
        "Alert dispatch success rate over the last minute (percent)",
        MetricKind::Gauge,
        pipeline.dispatch_success_rate,
    );

    w.finish()
}
