//! Reports, health scoring and insights
//!
//! The scoring functions are pure so they can be exercised without a running
//! hub; `MonitoringHub::generate_report` gathers the inputs.

use crate::events::{Environment, Timestamp};
use crate::logging::LogLevel;
use crate::monitoring::PipelineStatsSnapshot;
use crate::performance::{
    MemorySnapshot, MemoryTrend, PerformanceAlert, Rating, VitalsMetric, WebVital,
};
use crate::tracking::{ErrorMetrics, ErrorSeverity, ErrorType, TrackedError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Errors listed in a report
pub const REPORT_TOP_ERRORS: usize = 5;
/// Performance alerts listed in a report
pub const REPORT_RECENT_ALERTS: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

impl HealthStatus {
    /// `healthy` from 80, `degraded` from 50, otherwise `critical`
    pub fn from_score(score: u32) -> Self {
        if score >= 80 {
            HealthStatus::Healthy
        } else if score >= 50 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Critical
        }
    }
}

/// Per-component scores the overall health is the minimum of
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComponentScores {
    pub performance: u32,
    pub errors: u32,
    pub memory: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthAnalysis {
    pub score: u32,
    pub status: HealthStatus,
    pub components: ComponentScores,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorSummary {
    pub total: u64,
    pub unique: usize,
    pub unresolved: usize,
    pub last_hour: u64,
    pub critical_unresolved: usize,
    pub by_type: BTreeMap<ErrorType, u64>,
    pub by_severity: BTreeMap<ErrorSeverity, u64>,
    pub top_errors: Vec<TrackedError>,
}

impl ErrorSummary {
    pub fn from_metrics(metrics: &ErrorMetrics) -> Self {
        Self {
            total: metrics.total_errors,
            unique: metrics.unique_errors,
            unresolved: metrics.unresolved_errors,
            last_hour: metrics.errors_last_hour,
            critical_unresolved: metrics.critical_unresolved,
            by_type: metrics.errors_by_type.clone(),
            by_severity: metrics.errors_by_severity.clone(),
            top_errors: metrics
                .top_errors
                .iter()
                .take(REPORT_TOP_ERRORS)
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSummary {
    pub score: u32,
    pub web_vitals: BTreeMap<WebVital, VitalsMetric>,
    /// Newest first
    pub recent_alerts: Vec<PerformanceAlert>,
    pub memory: Option<MemorySnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogSummary {
    pub accepted: u64,
    pub filtered: u64,
    pub delivered: u64,
    pub flushes: u64,
    pub transport_failures: u64,
    pub buffered: usize,
    pub by_level: BTreeMap<LogLevel, u64>,
}

impl LogSummary {
    pub fn from_stats(stats: &PipelineStatsSnapshot, buffered: usize) -> Self {
        Self {
            accepted: stats.logs_accepted,
            filtered: stats.logs_filtered,
            delivered: stats.logs_delivered,
            flushes: stats.log_flushes,
            transport_failures: stats.transport_failures,
            buffered,
            by_level: LogLevel::ALL
                .iter()
                .map(|level| (*level, stats.logs_by_level[level.index()]))
                .collect(),
        }
    }
}

/// Everything the hub knows, as one serializable document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoringReport {
    pub generated_at: Timestamp,
    pub environment: Environment,
    pub service: String,
    pub version: String,
    pub errors: ErrorSummary,
    pub performance: PerformanceSummary,
    pub logs: LogSummary,
    pub pipeline: PipelineStatsSnapshot,
    pub health: HealthAnalysis,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorInsight {
    pub fingerprint: String,
    pub message: String,
    pub error_type: ErrorType,
    pub severity: ErrorSeverity,
    pub count: u64,
    pub affected_users: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Insights {
    pub top_errors: Vec<ErrorInsight>,
    pub performance_issues: Vec<String>,
    pub resource_bottlenecks: Vec<String>,
    pub recommendations: Vec<String>,
}

/// 100 minus 2 per occurrence in the last hour and 20 per unresolved critical record
pub fn error_score(metrics: &ErrorMetrics) -> u32 {
    let penalty = metrics
        .errors_last_hour
        .saturating_mul(2)
        .saturating_add((metrics.critical_unresolved as u64).saturating_mul(20));
    100u64.saturating_sub(penalty) as u32
}

/// Step score by usage, capped at 50 while a leak is suspected
pub fn memory_score(memory: Option<&MemorySnapshot>) -> u32 {
    let Some(memory) = memory else {
        return 100;
    };
    let score = match memory.usage_percent {
        p if p > 90.0 => 40,
        p if p > 80.0 => 60,
        p if p > 70.0 => 80,
        _ => 100,
    };
    if memory.leak_suspected {
        score.min(50)
    } else {
        score
    }
}

/// Combine component scores into a health analysis with recommendations
pub fn analyze_health(
    performance_score: u32,
    errors: &ErrorMetrics,
    vitals: &BTreeMap<WebVital, VitalsMetric>,
    memory: Option<&MemorySnapshot>,
) -> HealthAnalysis {
    let components = ComponentScores {
        performance: performance_score,
        errors: error_score(errors),
        memory: memory_score(memory),
    };
    let score = components
        .performance
        .min(components.errors)
        .min(components.memory);

    let mut recommendations = Vec::new();
    if errors.critical_unresolved > 0 {
        recommendations.push(format!(
            "Resolve {} unresolved critical error group(s)",
            errors.critical_unresolved
        ));
    }
    if errors.errors_last_hour > 10 {
        recommendations.push(format!(
            "Investigate the error rate: {} occurrences in the last hour",
            errors.errors_last_hour
        ));
    }
    for sample in vitals.values() {
        if sample.rating != Rating::Good {
            recommendations.push(vital_recommendation(sample));
        }
    }
    if let Some(memory) = memory {
        if memory.leak_suspected {
            recommendations
                .push("Memory keeps growing near the limit; check for leaks".to_string());
        } else if memory.usage_percent > 80.0 {
            recommendations.push(format!(
                "Memory usage is high ({:.0}% of limit)",
                memory.usage_percent
            ));
        }
    }

    HealthAnalysis {
        score,
        status: HealthStatus::from_score(score),
        components,
        recommendations,
    }
}

fn vital_recommendation(sample: &VitalsMetric) -> String {
    let hint = match sample.name {
        WebVital::Fcp => "reduce render-blocking resources",
        WebVital::Lcp => "optimize the largest above-the-fold element",
        WebVital::Fid | WebVital::Inp => "break up long main-thread tasks",
        WebVital::Cls => "reserve space for late-loading content",
        WebVital::Ttfb => "speed up server response or add caching",
    };
    format!(
        "{} is {} ({} {}): {}",
        sample.name, sample.rating, sample.value, sample.unit, hint
    )
}

/// Summarise what needs attention first
pub fn build_insights(
    errors: &ErrorMetrics,
    vitals: &BTreeMap<WebVital, VitalsMetric>,
    recent_alerts: &[PerformanceAlert],
    memory: Option<&MemorySnapshot>,
    health: &HealthAnalysis,
) -> Insights {
    let top_errors = errors
        .top_errors
        .iter()
        .take(REPORT_TOP_ERRORS)
        .map(|error| ErrorInsight {
            fingerprint: error.fingerprint.clone(),
            message: error.message.clone(),
            error_type: error.error_type,
            severity: error.severity,
            count: error.count,
            affected_users: error.affected_users.len(),
        })
        .collect();

    let mut performance_issues: Vec<String> = vitals
        .values()
        .filter(|sample| sample.rating == Rating::Poor)
        .map(|sample| format!("{} is poor at {} {}", sample.name, sample.value, sample.unit))
        .collect();
    let mut violated: Vec<&str> = recent_alerts.iter().map(|a| a.metric.as_str()).collect();
    violated.sort_unstable();
    violated.dedup();
    for metric in violated {
        performance_issues.push(format!("Budget violated for {}", metric));
    }

    let mut resource_bottlenecks = Vec::new();
    if let Some(memory) = memory {
        if memory.usage_percent > 70.0 {
            resource_bottlenecks.push(format!(
                "Memory at {:.0}% of limit",
                memory.usage_percent
            ));
        }
        if memory.trend == MemoryTrend::Increasing {
            resource_bottlenecks.push("Memory usage trending upward".to_string());
        }
    }

    Insights {
        top_errors,
        performance_issues,
        resource_bottlenecks,
        recommendations: health.recommendations.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metrics(last_hour: u64, critical: usize) -> ErrorMetrics {
        ErrorMetrics {
            total_errors: last_hour,
            unique_errors: 0,
            unresolved_errors: critical,
            errors_last_hour: last_hour,
            critical_unresolved: critical,
            errors_by_type: BTreeMap::new(),
            errors_by_severity: BTreeMap::new(),
            hourly_trend: Vec::new(),
            top_errors: Vec::new(),
            affected_users: 0,
            generated_at: Utc::now(),
        }
    }

    fn memory(usage_percent: f64, leak_suspected: bool) -> MemorySnapshot {
        MemorySnapshot {
            current: None,
            usage_percent,
            trend: if leak_suspected {
                MemoryTrend::Increasing
            } else {
                MemoryTrend::Stable
            },
            leak_suspected,
            sample_count: 20,
        }
    }

    #[test]
    fn test_status_thresholds() {
        assert_eq!(HealthStatus::from_score(100), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(80), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(79), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(50), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(49), HealthStatus::Critical);
    }

    #[test]
    fn test_error_score() {
        assert_eq!(error_score(&metrics(0, 0)), 100);
        assert_eq!(error_score(&metrics(5, 1)), 70);
        assert_eq!(error_score(&metrics(1000, 3)), 0);
    }

    #[test]
    fn test_memory_score_steps() {
        assert_eq!(memory_score(None), 100);
        assert_eq!(memory_score(Some(&memory(50.0, false))), 100);
        assert_eq!(memory_score(Some(&memory(75.0, false))), 80);
        assert_eq!(memory_score(Some(&memory(85.0, false))), 60);
        assert_eq!(memory_score(Some(&memory(95.0, false))), 40);
        assert_eq!(memory_score(Some(&memory(85.0, true))), 50);
    }

    #[test]
    fn test_health_is_minimum_of_components() {
        let mut vitals = BTreeMap::new();
        vitals.insert(
            WebVital::Lcp,
            VitalsMetric::new(WebVital::Lcp, 5000.0, Utc::now()),
        );

        let health = analyze_health(70, &metrics(2, 0), &vitals, Some(&memory(85.0, false)));
        assert_eq!(health.components.errors, 96);
        assert_eq!(health.score, 60);
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(health.recommendations.iter().any(|r| r.starts_with("LCP is poor")));
        assert!(health.recommendations.iter().any(|r| r.contains("Memory usage is high")));
    }

    #[test]
    fn test_insights_collect_issues() {
        let mut vitals = BTreeMap::new();
        vitals.insert(
            WebVital::Cls,
            VitalsMetric::new(WebVital::Cls, 0.5, Utc::now()),
        );
        let alert = |metric: &str| PerformanceAlert {
            id: "p".to_string(),
            metric: metric.to_string(),
            value: 1.0,
            threshold: 0.0,
            operator: crate::events::ComparisonOperator::Lte,
            severity: crate::performance::BudgetSeverity::Warning,
            message: String::new(),
            timestamp: Utc::now(),
        };
        let alerts = vec![alert("CLS"), alert("CLS"), alert("api_latency")];
        let memory = memory(92.0, true);
        let health = analyze_health(70, &metrics(0, 0), &vitals, Some(&memory));

        let insights = build_insights(&metrics(0, 0), &vitals, &alerts, Some(&memory), &health);
        assert_eq!(
            insights.performance_issues,
            vec![
                "CLS is poor at 0.5 score".to_string(),
                "Budget violated for CLS".to_string(),
                "Budget violated for api_latency".to_string(),
            ]
        );
        assert_eq!(insights.resource_bottlenecks.len(), 2);
        assert_eq!(insights.recommendations, health.recommendations);
    }
}
