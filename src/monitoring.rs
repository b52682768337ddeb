//! Self-monitoring counters for the observability pipeline
//!
//! Every component records what it did (errors tracked, logs delivered,
//! transport and dispatch failures) into a shared `PipelineStats`. Reports and
//! the Prometheus exposition read a `PipelineStatsSnapshot` from it. Failures
//! that are swallowed to protect the caller stay observable here.

use crate::events::lock;
use crate::logging::LogLevel;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Point-in-time copy of the pipeline counters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineStatsSnapshot {
    /// Error occurrences stored by the tracker
    pub errors_tracked: u64,
    /// Error occurrences dropped by sampling
    pub errors_sampled_out: u64,
    /// Alert rules that fired
    pub alerts_triggered: u64,
    /// Successful alert action dispatches
    pub alert_dispatches: u64,
    /// Failed alert action dispatches
    pub alert_dispatch_failures: u64,
    /// Log entries accepted by the filter chain
    pub logs_accepted: u64,
    /// Log entries rejected by a filter
    pub logs_filtered: u64,
    /// Accepted log entries per level, indexed debug..fatal
    pub logs_by_level: [u64; 5],
    /// Log entries handed to transports
    pub logs_delivered: u64,
    /// Non-empty buffer flushes
    pub log_flushes: u64,
    /// Transport failures (one per failing transport per flush)
    pub transport_failures: u64,
    /// Performance metrics recorded
    pub metrics_recorded: u64,
    /// Performance budget violations
    pub performance_alerts: u64,
    /// Alert dispatch success rate over the last minute, as a percentage (0-100)
    pub dispatch_success_rate: f64,
    /// When this snapshot was taken
    pub timestamp: DateTime<Utc>,
}

/// Tracks alert dispatch outcomes for the success rate window
#[derive(Debug, Clone)]
struct DispatchResult {
    success: bool,
    timestamp: DateTime<Utc>,
}

/// Shared counters updated by every pipeline component
#[derive(Debug)]
pub struct PipelineStats {
    errors_tracked: AtomicU64,
    errors_sampled_out: AtomicU64,
    alerts_triggered: AtomicU64,
    alert_dispatches: AtomicU64,
    alert_dispatch_failures: AtomicU64,
    logs_accepted: AtomicU64,
    logs_filtered: AtomicU64,
    logs_by_level: [AtomicU64; 5],
    logs_delivered: AtomicU64,
    log_flushes: AtomicU64,
    transport_failures: AtomicU64,
    metrics_recorded: AtomicU64,
    performance_alerts: AtomicU64,
    /// Recent dispatch results (last 1000 dispatches)
    dispatch_results: Mutex<VecDeque<DispatchResult>>,
    /// Maximum number of dispatch results to keep
    max_dispatch_samples: usize,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStats {
    /// Create a zeroed set of counters
    pub fn new() -> Self {
        Self {
            errors_tracked: AtomicU64::new(0),
            errors_sampled_out: AtomicU64::new(0),
            alerts_triggered: AtomicU64::new(0),
            alert_dispatches: AtomicU64::new(0),
            alert_dispatch_failures: AtomicU64::new(0),
            logs_accepted: AtomicU64::new(0),
            logs_filtered: AtomicU64::new(0),
            logs_by_level: Default::default(),
            logs_delivered: AtomicU64::new(0),
            log_flushes: AtomicU64::new(0),
            transport_failures: AtomicU64::new(0),
            metrics_recorded: AtomicU64::new(0),
            performance_alerts: AtomicU64::new(0),
            dispatch_results: Mutex::new(VecDeque::new()),
            max_dispatch_samples: 1000,
        }
    }

    pub fn record_error_tracked(&self) {
        self.errors_tracked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error_sampled_out(&self) {
        self.errors_sampled_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_triggered(&self) {
        self.alerts_triggered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one alert action dispatch
    pub fn record_dispatch_result(&self, success: bool) {
        if success {
            self.alert_dispatches.fetch_add(1, Ordering::Relaxed);
        } else {
            self.alert_dispatch_failures.fetch_add(1, Ordering::Relaxed);
        }

        let mut results = lock(&self.dispatch_results);
        results.push_back(DispatchResult {
            success,
            timestamp: Utc::now(),
        });
        while results.len() > self.max_dispatch_samples {
            results.pop_front();
        }
        debug!(
            "Alert dispatch result recorded: success={}, samples={}",
            success,
            results.len()
        );
    }

    pub fn record_log_accepted(&self, level: LogLevel) {
        self.logs_accepted.fetch_add(1, Ordering::Relaxed);
        self.logs_by_level[level.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_log_filtered(&self) {
        self.logs_filtered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a non-empty flush handing `delivered` entries to the transports
    pub fn record_flush(&self, delivered: usize) {
        self.log_flushes.fetch_add(1, Ordering::Relaxed);
        self.logs_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
    }

    pub fn record_transport_failure(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_metric(&self) {
        self.metrics_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_performance_alert(&self) {
        self.performance_alerts.fetch_add(1, Ordering::Relaxed);
    }

    /// Dispatch success rate over the last minute
    ///
    /// With no recent dispatches the rate is reported as 100%.
    fn dispatch_success_rate(&self) -> f64 {
        let one_minute_ago = Utc::now() - chrono::Duration::minutes(1);
        let results = lock(&self.dispatch_results);

        let recent: Vec<_> = results
            .iter()
            .filter(|result| result.timestamp >= one_minute_ago)
            .collect();

        if recent.is_empty() {
            return 100.0;
        }

        let successful = recent.iter().filter(|r| r.success).count();
        (successful as f64 / recent.len() as f64) * 100.0
    }

    /// Collect the current counter values
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        let mut logs_by_level = [0u64; 5];
        for (slot, counter) in logs_by_level.iter_mut().zip(self.logs_by_level.iter()) {
            *slot = counter.load(Ordering::Relaxed);
        }

        let snapshot = PipelineStatsSnapshot {
            errors_tracked: self.errors_tracked.load(Ordering::Relaxed),
            errors_sampled_out: self.errors_sampled_out.load(Ordering::Relaxed),
            alerts_triggered: self.alerts_triggered.load(Ordering::Relaxed),
            alert_dispatches: self.alert_dispatches.load(Ordering::Relaxed),
            alert_dispatch_failures: self.alert_dispatch_failures.load(Ordering::Relaxed),
            logs_accepted: self.logs_accepted.load(Ordering::Relaxed),
            logs_filtered: self.logs_filtered.load(Ordering::Relaxed),
            logs_by_level,
            logs_delivered: self.logs_delivered.load(Ordering::Relaxed),
            log_flushes: self.log_flushes.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            metrics_recorded: self.metrics_recorded.load(Ordering::Relaxed),
            performance_alerts: self.performance_alerts.load(Ordering::Relaxed),
            dispatch_success_rate: self.dispatch_success_rate(),
            timestamp: Utc::now(),
        };

        if snapshot.dispatch_success_rate < 90.0 {
            warn!(
                "Low alert dispatch success rate: {:.1}%",
                snapshot.dispatch_success_rate
            );
        }

        snapshot
    }
}
