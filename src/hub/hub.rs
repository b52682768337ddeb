//! The integration hub: one facade over the tracker, logger and collector
//!
//! Components publish typed events; the hub subscribes to them and routes
//! signals between components according to `WiringConfig`. Every handler and
//! background task holds weak references so no component keeps another alive.

use crate::alerts::{AlertAction, AlertEvent, AlertRule, DispatchMode, WebhookAction};
use crate::config::{MonitoringConfig, WiringConfig};
use crate::error::ConfigError;
use crate::events::{EventEmitter, SubscriptionId};
use crate::hub::exposition::render_report;
use crate::hub::report::{
    analyze_health, build_insights, ErrorSummary, HealthAnalysis, Insights, LogSummary,
    MonitoringReport, PerformanceSummary, REPORT_RECENT_ALERTS,
};
use crate::logging::{Fields, LogError, LogLevel, LogMetadata, Logger, LoggerEvent, WeakLogger};
use crate::monitoring::PipelineStats;
use crate::performance::{
    BudgetSeverity, MetricOptions, PerformanceBudget, PerformanceCollector, PerformanceEvent,
    PerformanceMetric, Rating, VitalsMetric, WebVital,
};
use crate::tasks::TaskGroup;
use crate::tracking::{
    ContextPatch, ErrorContext, ErrorSeverity, ErrorTracker, RawError, TrackedError,
};
use chrono::Utc;
use log::{debug, error, info};
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Tag attached to errors raised from performance budget violations
pub const PERFORMANCE_TAG: &str = "performance";
/// Tag attached to errors raised from error-level log entries
pub const LOG_TAG: &str = "log";

/// Events published by the hub itself
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// A periodic or final report
    Report(Box<MonitoringReport>),
    /// A rule alert fired
    Alert(Box<crate::alerts::Alert>),
    /// A performance budget was violated
    PerformanceAlert(crate::performance::PerformanceAlert),
}

struct HubInner {
    config: MonitoringConfig,
    stats: Arc<PipelineStats>,
    tracker: Arc<ErrorTracker>,
    logger: Logger,
    performance: Arc<PerformanceCollector>,
    events: EventEmitter<HubEvent>,
}

impl HubInner {
    fn generate_report(&self) -> MonitoringReport {
        let now = Utc::now();
        let metrics = self.tracker.get_metrics_at(now);
        let vitals = self.performance.web_vitals();
        let memory = self.performance.memory_snapshot();
        let score = self.performance.performance_score();
        let health = analyze_health(score, &metrics, &vitals, memory.as_ref());
        let pipeline = self.stats.snapshot();

        MonitoringReport {
            generated_at: now,
            environment: self.config.environment,
            service: self.config.service.clone(),
            version: self.config.version.clone(),
            errors: ErrorSummary::from_metrics(&metrics),
            performance: PerformanceSummary {
                score,
                web_vitals: vitals,
                recent_alerts: self.performance.recent_alerts(REPORT_RECENT_ALERTS),
                memory,
            },
            logs: LogSummary::from_stats(&pipeline, self.logger.buffered()),
            pipeline,
            health,
        }
    }

    fn publish_report(&self) -> MonitoringReport {
        let report = self.generate_report();
        debug!(
            "Report generated: health {} ({:?})",
            report.health.score, report.health.status
        );
        self.events.emit(&HubEvent::Report(Box::new(report.clone())));
        report
    }
}

/// Facade and event router for the whole pipeline
pub struct MonitoringHub {
    inner: Arc<HubInner>,
    tasks: Mutex<TaskGroup>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl MonitoringHub {
    /// Build every component from `config` and wire them together
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the configuration is invalid,
    /// a configured rule or budget is rejected, or a configured transport or
    /// webhook action cannot be created.
    pub fn new(config: MonitoringConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let stats = Arc::new(PipelineStats::new());
        let mode = if config.alerts.inline_dispatch {
            DispatchMode::Inline
        } else {
            DispatchMode::Background
        };

        let tracker = ErrorTracker::with_dispatch_mode(
            &config.errors,
            base_error_context(&config),
            Arc::clone(&stats),
            mode,
        );
        if let Some(ref rules) = config.errors.rules {
            tracker.alerts().replace_rules(rules.clone())?;
        }
        register_webhooks(&tracker, &config)?;

        let logger = Logger::from_config(
            &config.logging,
            base_log_metadata(&config),
            Arc::clone(&stats),
        )
        .map_err(|e| ConfigError::ValidationError(format!("logging transport: {}", e)))?;
        let performance = PerformanceCollector::new(&config.performance, Arc::clone(&stats))?;

        Ok(Self::with_components(
            config,
            stats,
            Arc::new(tracker),
            logger,
            Arc::new(performance),
        ))
    }

    /// Wire already-built components together
    pub fn with_components(
        config: MonitoringConfig,
        stats: Arc<PipelineStats>,
        tracker: Arc<ErrorTracker>,
        logger: Logger,
        performance: Arc<PerformanceCollector>,
    ) -> Self {
        let inner = Arc::new(HubInner {
            config,
            stats,
            tracker,
            logger,
            performance,
            events: EventEmitter::new(),
        });
        wire(&inner);

        Self {
            inner,
            tasks: Mutex::new(TaskGroup::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Spawn the background tasks; a second call is a no-op
    ///
    /// # Errors
    ///
    /// Returns the I/O error if a task thread cannot be spawned.
    pub fn start(&self) -> std::io::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let config = &self.inner.config;
        let mut tasks = crate::events::lock(&self.tasks);

        if config.errors.enabled {
            let tracker = Arc::downgrade(&self.inner.tracker);
            tasks.spawn_periodic(
                "retention-sweep",
                Duration::from_secs(config.errors.sweep_interval_seconds),
                move || {
                    if let Some(tracker) = tracker.upgrade() {
                        tracker.reap();
                    }
                },
            )?;
        }

        if config.logging.enabled {
            let logger = self.inner.logger.downgrade();
            tasks.spawn_periodic("log-flush", self.inner.logger.flush_interval(), move || {
                if let Some(logger) = logger.upgrade() {
                    logger.flush();
                }
            })?;
        }

        let inner = Arc::downgrade(&self.inner);
        tasks.spawn_periodic("report", config.report_interval(), move || {
            if let Some(inner) = inner.upgrade() {
                inner.publish_report();
            }
        })?;

        if config.performance.enabled {
            let performance = Arc::downgrade(&self.inner.performance);
            tasks.spawn_periodic(
                "memory-sample",
                Duration::from_secs(config.performance.memory_interval_seconds),
                move || {
                    if let Some(performance) = performance.upgrade() {
                        performance.sample_memory();
                    }
                },
            )?;
        }

        info!(
            "Monitoring started for {} {} ({}): {} task(s)",
            config.service,
            config.version,
            config.environment,
            tasks.len()
        );
        Ok(())
    }

    /// Stop background tasks, drain the log buffer and emit a final report
    ///
    /// Later calls only regenerate the report.
    pub fn shutdown(&self) -> MonitoringReport {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return self.inner.generate_report();
        }

        crate::events::lock(&self.tasks).shutdown();
        self.inner.tracker.alerts().shutdown();
        self.inner.logger.flush();

        let report = self.inner.publish_report();
        self.inner.logger.close();
        info!(
            "Monitoring stopped: health {} ({:?})",
            report.health.score, report.health.status
        );
        report
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.inner.config
    }

    pub fn generate_report(&self) -> MonitoringReport {
        self.inner.generate_report()
    }

    pub fn analyze_health(&self) -> HealthAnalysis {
        let vitals = self.inner.performance.web_vitals();
        let memory = self.inner.performance.memory_snapshot();
        analyze_health(
            self.inner.performance.performance_score(),
            &self.inner.tracker.get_metrics(),
            &vitals,
            memory.as_ref(),
        )
    }

    pub fn get_insights(&self) -> Insights {
        let metrics = self.inner.tracker.get_metrics();
        let vitals = self.inner.performance.web_vitals();
        let memory = self.inner.performance.memory_snapshot();
        let alerts = self.inner.performance.recent_alerts(REPORT_RECENT_ALERTS);
        let health = analyze_health(
            self.inner.performance.performance_score(),
            &metrics,
            &vitals,
            memory.as_ref(),
        );
        build_insights(&metrics, &vitals, &alerts, memory.as_ref(), &health)
    }

    /// The current report in the Prometheus text exposition format
    pub fn render_prometheus(&self) -> String {
        render_report(&self.inner.generate_report())
    }

    pub fn track_error(
        &self,
        raw: impl Into<RawError>,
        context: Option<&ContextPatch>,
    ) -> TrackedError {
        self.inner.tracker.track_error(raw, context)
    }

    pub fn resolve_error(&self, fingerprint: &str) -> bool {
        self.inner.tracker.resolve_error(fingerprint)
    }

    pub fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        fields: Option<Fields>,
        error: Option<LogError>,
    ) -> Option<crate::logging::LogEntry> {
        self.inner.logger.log(level, message, fields, error)
    }

    /// The shared logger, for level sugar and the `log_*` helpers
    pub fn logger(&self) -> &Logger {
        &self.inner.logger
    }

    pub fn record_metric(
        &self,
        name: &str,
        value: f64,
        unit: &str,
        options: MetricOptions,
    ) -> PerformanceMetric {
        self.inner.performance.record_metric(name, value, unit, options)
    }

    pub fn record_web_vital(&self, vital: WebVital, value: f64) -> VitalsMetric {
        self.inner.performance.record_web_vital(vital, value)
    }

    pub fn measure_function<T, F>(&self, name: &str, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.inner.performance.measure_function(name, f)
    }

    pub async fn measure_async<F>(&self, name: &str, future: F) -> F::Output
    where
        F: Future,
    {
        self.inner.performance.measure_async(name, future).await
    }

    pub async fn measure_async_result<T, E, F>(&self, name: &str, future: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.inner
            .performance
            .measure_async_result(name, future)
            .await
    }

    /// Update the context on tracked errors and log entries alike
    pub fn set_context(&self, patch: &ContextPatch) {
        self.inner.tracker.set_context(patch);
        self.inner.logger.update_context(|metadata| {
            if let Some(ref session_id) = patch.session_id {
                metadata.session_id = Some(session_id.clone());
            }
            if let Some(ref user_id) = patch.user_id {
                metadata.user_id = Some(user_id.clone());
            }
            if let Some(environment) = patch.environment {
                metadata.environment = Some(environment);
            }
            if let Some(ref service) = patch.service {
                metadata.service = Some(service.clone());
            }
            if let Some(ref version) = patch.version {
                metadata.version = Some(version.clone());
            }
        });
    }

    /// Set or clear the current user
    pub fn set_user(&self, user_id: Option<String>) {
        self.inner.tracker.set_user(user_id.clone());
        self.inner
            .logger
            .update_context(|metadata| metadata.user_id = user_id);
    }

    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for an invalid or duplicate rule.
    pub fn add_rule(&self, rule: AlertRule) -> Result<(), ConfigError> {
        self.inner.tracker.alerts().add_rule(rule)
    }

    pub fn register_alert_action(&self, name: impl Into<String>, action: Arc<dyn AlertAction>) {
        self.inner.tracker.alerts().register_action(name, action);
    }

    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for an invalid budget.
    pub fn add_performance_budget(&self, budget: PerformanceBudget) -> Result<(), ConfigError> {
        self.inner.performance.add_budget(budget)
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&HubEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener)
    }

    pub fn events(&self) -> &EventEmitter<HubEvent> {
        &self.inner.events
    }

    pub fn tracker(&self) -> &Arc<ErrorTracker> {
        &self.inner.tracker
    }

    pub fn collector(&self) -> &Arc<PerformanceCollector> {
        &self.inner.performance
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.inner.stats
    }
}

fn base_error_context(config: &MonitoringConfig) -> ErrorContext {
    ErrorContext {
        session_id: uuid::Uuid::new_v4().to_string(),
        user_id: None,
        environment: config.environment,
        service: config.service.clone(),
        version: config.version.clone(),
        metadata: Default::default(),
    }
}

fn base_log_metadata(config: &MonitoringConfig) -> LogMetadata {
    LogMetadata {
        environment: Some(config.environment),
        service: Some(config.service.clone()),
        version: Some(config.version.clone()),
        ..LogMetadata::default()
    }
}

fn register_webhooks(tracker: &ErrorTracker, config: &MonitoringConfig) -> Result<(), ConfigError> {
    let invalid = |e: crate::error::AlertError| ConfigError::ValidationError(e.to_string());

    if let Some(ref url) = config.alerts.webhook_url {
        let action = WebhookAction::new(url.clone()).map_err(invalid)?;
        tracker.alerts().register_action("webhook", Arc::new(action));
    }
    if let Some(ref url) = config.alerts.slack_webhook_url {
        let action = WebhookAction::slack(url.clone()).map_err(invalid)?;
        tracker.alerts().register_action("slack", Arc::new(action));
    }
    Ok(())
}

/// Subscribe the cross-component handlers
fn wire(inner: &Arc<HubInner>) {
    let wiring: WiringConfig = inner.config.wiring;
    let weak_tracker = Arc::downgrade(&inner.tracker);
    let weak_logger = inner.logger.downgrade();
    let weak_inner = Arc::downgrade(inner);

    inner.tracker.alerts().events().subscribe({
        let logger = weak_logger.clone();
        let hub = weak_inner.clone();
        move |event| {
            if let AlertEvent::Triggered(alert) = event {
                if wiring.alerts_to_logs {
                    with_logger(&logger, |logger| {
                        let mut fields = Fields::new();
                        fields.insert("rule_id".to_string(), json!(alert.rule_id));
                        fields.insert("value".to_string(), json!(alert.value));
                        fields.insert("threshold".to_string(), json!(alert.threshold));
                        logger
                            .with_context(LogMetadata::component("alerts"))
                            .warn(format!("Alert triggered: {}", alert.message), Some(fields));
                    });
                }
                if let Some(hub) = hub.upgrade() {
                    hub.events.emit(&HubEvent::Alert(Box::new(alert.clone())));
                }
            }
        }
    });

    inner.performance.events().subscribe({
        let tracker = weak_tracker.clone();
        let logger = weak_logger.clone();
        let hub = weak_inner;
        move |event| match event {
            PerformanceEvent::Alert(alert) => {
                if wiring.performance_alerts_to_errors && alert.severity == BudgetSeverity::Error {
                    if let Some(tracker) = tracker.upgrade() {
                        let raw = RawError::new(alert.message.clone())
                            .with_name("PerformanceBudgetError")
                            .with_code(alert.metric.clone())
                            .with_severity(ErrorSeverity::High)
                            .with_tag(PERFORMANCE_TAG);
                        tracker.track_error(raw, None);
                    }
                }
                if wiring.alerts_to_logs {
                    with_logger(&logger, |logger| {
                        let mut fields = Fields::new();
                        fields.insert("metric".to_string(), json!(alert.metric));
                        fields.insert("value".to_string(), json!(alert.value));
                        fields.insert("threshold".to_string(), json!(alert.threshold));
                        fields.insert("severity".to_string(), json!(alert.severity));
                        let message = format!("Performance budget violated: {}", alert.message);
                        logger
                            .with_context(LogMetadata::component("performance"))
                            .warn(message, Some(fields));
                    });
                }
                if let Some(hub) = hub.upgrade() {
                    hub.events.emit(&HubEvent::PerformanceAlert(alert.clone()));
                }
            }
            PerformanceEvent::WebVital(sample) if sample.rating == Rating::Poor => {
                if wiring.poor_vitals_to_logs {
                    with_logger(&logger, |logger| {
                        let mut fields = Fields::new();
                        fields.insert("vital".to_string(), json!(sample.name));
                        fields.insert("value".to_string(), json!(sample.value));
                        fields.insert("unit".to_string(), json!(sample.unit));
                        let message = format!("Poor {} reading: {}", sample.name, sample.value);
                        logger
                            .with_context(LogMetadata::component("performance"))
                            .warn(message, Some(fields));
                    });
                }
            }
            PerformanceEvent::MemoryLeakSuspected(snapshot) => {
                if wiring.alerts_to_logs {
                    with_logger(&logger, |logger| {
                        let mut fields = Fields::new();
                        fields.insert("usage_percent".to_string(), json!(snapshot.usage_percent));
                        logger
                            .with_context(LogMetadata::component("memory"))
                            .warn("Memory leak suspected", Some(fields));
                    });
                }
            }
            _ => {}
        }
    });

    if wiring.error_logs_to_errors {
        inner.logger.events().subscribe(move |event| {
            let LoggerEvent::Entry(entry) = event else {
                return;
            };
            let Some(ref log_error) = entry.error else {
                return;
            };
            if !entry.level.is_error() {
                return;
            }
            let Some(tracker) = weak_tracker.upgrade() else {
                return;
            };

            let mut raw = log_error.to_raw_error().with_tag(LOG_TAG);
            if entry.level == LogLevel::Fatal {
                raw = raw.with_severity(ErrorSeverity::Critical);
            }
            if let Some(ref component) = entry.metadata.component {
                raw = raw.with_tag(component.clone());
            }
            let patch = ContextPatch {
                session_id: entry.metadata.session_id.clone(),
                user_id: entry.metadata.user_id.clone(),
                ..ContextPatch::default()
            };
            tracker.track_error(raw, Some(&patch));
        });
    }

    debug!("Hub wiring: {:?}", wiring);
}

fn with_logger<F: FnOnce(&Logger)>(logger: &WeakLogger, f: F) {
    match logger.upgrade() {
        Some(logger) => f(&logger),
        None => error!("Logger dropped before a routed event could be logged"),
    }
}
