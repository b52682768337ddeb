//! Performance collector: custom metrics, Web Vitals, timing and budgets
//!
//! The collector owns its metric rings, the budget evaluator and the memory
//! monitor. Every recorded metric is checked against the budgets registered
//! for its name; violations are broadcast as `PerformanceEvent::Alert` after
//! the evaluator lock is released.

use crate::config::PerformanceConfig;
use crate::error::ConfigError;
use crate::events::{lock, EventEmitter, Timestamp};
use crate::monitoring::PipelineStats;
use crate::performance::budget::{BudgetEvaluator, PerformanceAlert, PerformanceBudget};
use crate::performance::memory::{MemoryMonitor, MemorySample, MemorySnapshot};
use crate::performance::vitals::{Rating, VitalsMetric, WebVital};
use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Custom metrics kept in the ring
pub const MAX_CUSTOM_METRICS: usize = 1000;
/// Web Vital samples kept in the history ring
pub const MAX_VITALS_HISTORY: usize = 1000;

/// Tag key carrying how a measured function finished
pub const MEASURE_TAG: &str = "type";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetricCategory {
    Navigation,
    Resource,
    Function,
    Memory,
    #[default]
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceMetric {
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub category: MetricCategory,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Optional attributes for `record_metric`
#[derive(Debug, Clone, Default)]
pub struct MetricOptions {
    pub category: MetricCategory,
    pub tags: BTreeMap<String, String>,
    pub timestamp: Option<Timestamp>,
}

impl MetricOptions {
    pub fn category(category: MetricCategory) -> Self {
        Self {
            category,
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Navigation phase timestamps in milliseconds since navigation start
///
/// Zero means the phase was not reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct NavigationTiming {
    pub navigation_start: f64,
    pub domain_lookup_start: f64,
    pub domain_lookup_end: f64,
    pub connect_start: f64,
    pub connect_end: f64,
    pub request_start: f64,
    pub response_start: f64,
    pub dom_content_loaded_event_end: f64,
    pub load_event_end: f64,
}

/// Events published by the collector
#[derive(Debug, Clone)]
pub enum PerformanceEvent {
    Metric(PerformanceMetric),
    WebVital(VitalsMetric),
    Alert(PerformanceAlert),
    MemoryLeakSuspected(MemorySnapshot),
}

pub struct PerformanceCollector {
    enabled: bool,
    metrics: Mutex<VecDeque<PerformanceMetric>>,
    vitals: Mutex<BTreeMap<WebVital, VitalsMetric>>,
    vitals_history: Mutex<VecDeque<VitalsMetric>>,
    budgets: Mutex<BudgetEvaluator>,
    memory: Option<MemoryMonitor>,
    events: EventEmitter<PerformanceEvent>,
    stats: Arc<PipelineStats>,
}

impl PerformanceCollector {
    /// Create a collector with the configured budgets and a process memory monitor
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if a configured budget is invalid.
    pub fn new(config: &PerformanceConfig, stats: Arc<PipelineStats>) -> Result<Self, ConfigError> {
        let mut budgets = BudgetEvaluator::new();
        for budget in &config.budgets {
            budgets.add_budget(budget.clone())?;
        }

        Ok(Self {
            enabled: config.enabled,
            metrics: Mutex::new(VecDeque::new()),
            vitals: Mutex::new(BTreeMap::new()),
            vitals_history: Mutex::new(VecDeque::new()),
            budgets: Mutex::new(budgets),
            memory: config.enabled.then(MemoryMonitor::for_process),
            events: EventEmitter::new(),
            stats,
        })
    }

    /// Replace the memory monitor
    pub fn with_memory_monitor(mut self, monitor: MemoryMonitor) -> Self {
        self.memory = Some(monitor);
        self
    }

    pub fn events(&self) -> &EventEmitter<PerformanceEvent> {
        &self.events
    }

    /// Register a validated budget
    pub fn add_budget(&self, budget: PerformanceBudget) -> Result<(), ConfigError> {
        debug!(
            "Adding performance budget {} {} {}",
            budget.metric,
            budget.operator.symbol(),
            budget.threshold
        );
        lock(&self.budgets).add_budget(budget)
    }

    pub fn remove_budgets(&self, metric: &str) -> usize {
        lock(&self.budgets).remove_budgets(metric)
    }

    pub fn budgets(&self) -> Vec<PerformanceBudget> {
        lock(&self.budgets).budgets().to_vec()
    }

    /// Record a custom metric and check it against its budgets
    ///
    /// NaN and infinite values are logged and dropped.
    pub fn record_metric(
        &self,
        name: &str,
        value: f64,
        unit: &str,
        options: MetricOptions,
    ) -> PerformanceMetric {
        let metric = PerformanceMetric {
            name: name.to_string(),
            value,
            unit: unit.to_string(),
            category: options.category,
            timestamp: options.timestamp.unwrap_or_else(Utc::now),
            tags: options.tags,
        };
        if !self.enabled {
            return metric;
        }
        if !value.is_finite() {
            warn!("Ignoring non-finite value {} for metric {}", value, name);
            return metric;
        }

        {
            let mut metrics = lock(&self.metrics);
            if metrics.len() >= MAX_CUSTOM_METRICS {
                metrics.pop_front();
            }
            metrics.push_back(metric.clone());
        }
        self.stats.record_metric();
        self.events.emit(&PerformanceEvent::Metric(metric.clone()));

        self.check_budgets(name, value, metric.timestamp);
        metric
    }

    /// Record a Web Vital sample, rate it and check its budgets
    pub fn record_web_vital(&self, vital: WebVital, value: f64) -> VitalsMetric {
        self.record_web_vital_at(vital, value, Utc::now())
    }

    pub fn record_web_vital_at(&self, vital: WebVital, value: f64, now: Timestamp) -> VitalsMetric {
        let sample = VitalsMetric::new(vital, value, now);
        if !self.enabled {
            return sample;
        }
        if !value.is_finite() {
            warn!("Ignoring non-finite {} reading: {}", vital, value);
            return sample;
        }

        lock(&self.vitals).insert(vital, sample.clone());
        {
            let mut history = lock(&self.vitals_history);
            if history.len() >= MAX_VITALS_HISTORY {
                history.pop_front();
            }
            history.push_back(sample.clone());
        }
        if sample.rating == Rating::Poor {
            debug!("Poor {} reading: {}{}", vital, value, sample.unit);
        }
        self.stats.record_metric();
        self.events.emit(&PerformanceEvent::WebVital(sample.clone()));

        self.check_budgets(vital.as_str(), value, now);
        sample
    }

    /// Derive TTFB and phase durations from a navigation timing record
    pub fn record_navigation_timing(&self, timing: &NavigationTiming) {
        let span = |start: f64, end: f64| (end > 0.0 && end >= start).then(|| end - start);

        if let Some(ttfb) = span(timing.navigation_start, timing.response_start) {
            self.record_web_vital(WebVital::Ttfb, ttfb);
        }

        let phases = [
            ("dns_lookup", span(timing.domain_lookup_start, timing.domain_lookup_end)),
            ("tcp_connect", span(timing.connect_start, timing.connect_end)),
            (
                "dom_content_loaded",
                span(timing.navigation_start, timing.dom_content_loaded_event_end),
            ),
            ("page_load", span(timing.navigation_start, timing.load_event_end)),
        ];
        for (name, duration) in phases {
            if let Some(duration) = duration {
                self.record_metric(
                    name,
                    duration,
                    "ms",
                    MetricOptions::category(MetricCategory::Navigation),
                );
            }
        }
    }

    fn check_budgets(&self, metric: &str, value: f64, now: Timestamp) {
        let alerts = lock(&self.budgets).check(metric, value, now);
        for alert in alerts {
            warn!("Performance budget violated: {}", alert.message);
            self.stats.record_performance_alert();
            self.events.emit(&PerformanceEvent::Alert(alert));
        }
    }

    /// Run `f`, recording its duration tagged `sync` (or `panic` if it unwinds)
    pub fn measure_function<T, F>(&self, name: &str, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let _guard = MeasureGuard::new(self, name, "sync");
        f()
    }

    /// Like `measure_function`, tagging `error` when `f` returns `Err`
    pub fn measure_result<T, E, F>(&self, name: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let mut guard = MeasureGuard::new(self, name, "sync");
        let result = f();
        if result.is_err() {
            guard.outcome = "error";
        }
        result
    }

    /// Await `future`, recording its duration tagged `async`
    ///
    /// The duration is also recorded if the returned future is dropped
    /// before completion.
    pub async fn measure_async<F>(&self, name: &str, future: F) -> F::Output
    where
        F: Future,
    {
        let _guard = MeasureGuard::new(self, name, "async");
        future.await
    }

    /// Like `measure_async`, tagging `error` when the future resolves to `Err`
    pub async fn measure_async_result<T, E, F>(&self, name: &str, future: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let mut guard = MeasureGuard::new(self, name, "async");
        let result = future.await;
        if result.is_err() {
            guard.outcome = "error";
        }
        result
    }

    /// Take a memory sample; emits `MemoryLeakSuspected` when a leak is suspected
    pub fn sample_memory(&self) -> Option<MemorySample> {
        let monitor = self.memory.as_ref()?;
        let sample = monitor.sample()?;

        let snapshot = monitor.snapshot();
        if snapshot.leak_suspected {
            warn!(
                "Memory leak suspected: {:.1}% of limit in use and rising",
                snapshot.usage_percent
            );
            self.events.emit(&PerformanceEvent::MemoryLeakSuspected(snapshot));
        }
        Some(sample)
    }

    pub fn memory_snapshot(&self) -> Option<MemorySnapshot> {
        self.memory.as_ref().map(MemoryMonitor::snapshot)
    }

    /// Custom metrics, oldest first
    pub fn metrics(&self) -> Vec<PerformanceMetric> {
        lock(&self.metrics).iter().cloned().collect()
    }

    /// Latest sample of each recorded Web Vital
    pub fn web_vitals(&self) -> BTreeMap<WebVital, VitalsMetric> {
        lock(&self.vitals).clone()
    }

    pub fn vitals_history(&self) -> Vec<VitalsMetric> {
        lock(&self.vitals_history).iter().cloned().collect()
    }

    /// The `limit` most recent budget violations, newest first
    pub fn recent_alerts(&self, limit: usize) -> Vec<PerformanceAlert> {
        lock(&self.budgets).recent_alerts(limit)
    }

    pub fn alerts(&self) -> Vec<PerformanceAlert> {
        lock(&self.budgets).alerts()
    }

    /// 100 minus 30 per poor and 15 per needs-improvement vital, floored at 0
    pub fn performance_score(&self) -> u32 {
        let vitals = lock(&self.vitals);
        let penalty: u32 = vitals
            .values()
            .map(|sample| match sample.rating {
                Rating::Poor => 30,
                Rating::NeedsImprovement => 15,
                Rating::Good => 0,
            })
            .sum();
        100u32.saturating_sub(penalty)
    }

    pub fn clear(&self) {
        lock(&self.metrics).clear();
        lock(&self.vitals).clear();
        lock(&self.vitals_history).clear();
        lock(&self.budgets).clear_alerts();
    }
}

/// Records the elapsed time of a measured call when dropped
struct MeasureGuard<'a> {
    collector: &'a PerformanceCollector,
    name: &'a str,
    started: Instant,
    outcome: &'static str,
}

impl<'a> MeasureGuard<'a> {
    fn new(collector: &'a PerformanceCollector, name: &'a str, outcome: &'static str) -> Self {
        Self {
            collector,
            name,
            started: Instant::now(),
            outcome,
        }
    }
}

impl Drop for MeasureGuard<'_> {
    fn drop(&mut self) {
        let outcome = if std::thread::panicking() {
            "panic"
        } else {
            self.outcome
        };
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.collector.record_metric(
            self.name,
            elapsed_ms,
            "ms",
            MetricOptions::category(MetricCategory::Function).with_tag(MEASURE_TAG, outcome),
        );
    }
}
