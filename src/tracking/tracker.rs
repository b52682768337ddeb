//! Error tracker: grouping, sampling, metrics and retention
//!
//! The tracker owns the error store exclusively. Every read-modify-write of
//! the store happens under one mutex; lifecycle events and alert dispatch run
//! after it is released.

use crate::alerts::{AlertEngine, DispatchMode};
use crate::config::ErrorsConfig;
use crate::events::{lock, EventEmitter, Timestamp};
use crate::monitoring::PipelineStats;
use crate::tracking::classifier::{Classification, DefaultClassifier, ErrorClassifier};
use crate::tracking::fingerprint::fingerprint;
use crate::tracking::record::{ContextPatch, ErrorContext, ErrorSeverity, ErrorType, RawError, TrackedError};
use crate::tracking::store::ErrorStore;
use chrono::{Duration, Timelike, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

/// Number of records returned in `ErrorMetrics::top_errors`
const TOP_ERRORS: usize = 10;

/// Lifecycle events published by the tracker
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    /// First occurrence of a fingerprint
    ErrorNew(TrackedError),
    /// Repeat occurrence of a stored fingerprint
    ErrorUpdated(TrackedError),
    /// A record was marked resolved
    ErrorResolved(TrackedError),
    /// The retention sweep removed records
    ErrorsReaped { removed: usize },
}

/// Errors summed by the hour of their `last_seen`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HourlyBucket {
    pub hour: Timestamp,
    pub count: u64,
}

/// Aggregate view over the error store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorMetrics {
    /// Sum of occurrence counts
    pub total_errors: u64,
    /// Number of distinct fingerprints
    pub unique_errors: usize,
    pub unresolved_errors: usize,
    /// Occurrences of records last seen within the past hour
    pub errors_last_hour: u64,
    /// Unresolved critical records
    pub critical_unresolved: usize,
    pub errors_by_type: BTreeMap<ErrorType, u64>,
    pub errors_by_severity: BTreeMap<ErrorSeverity, u64>,
    /// Trailing 24 hours, oldest bucket first
    pub hourly_trend: Vec<HourlyBucket>,
    pub top_errors: Vec<TrackedError>,
    /// Distinct users affected by errors seen in the trailing 24 hours
    pub affected_users: usize,
    pub generated_at: Timestamp,
}

/// Groups error occurrences by fingerprint and drives alert evaluation
pub struct ErrorTracker {
    store: Mutex<ErrorStore>,
    context: Mutex<ErrorContext>,
    classifier: Mutex<Arc<dyn ErrorClassifier>>,
    sample_rate: f64,
    retention: Duration,
    enabled: bool,
    alerts: AlertEngine,
    events: EventEmitter<TrackerEvent>,
    stats: Arc<PipelineStats>,
}

impl ErrorTracker {
    /// Create a tracker with the built-in alert rules
    pub fn new(config: &ErrorsConfig, context: ErrorContext, stats: Arc<PipelineStats>) -> Self {
        Self::with_dispatch_mode(config, context, stats, DispatchMode::Background)
    }

    /// Create a tracker whose alert engine dispatches in the given mode
    pub fn with_dispatch_mode(
        config: &ErrorsConfig,
        context: ErrorContext,
        stats: Arc<PipelineStats>,
        mode: DispatchMode,
    ) -> Self {
        Self {
            store: Mutex::new(ErrorStore::new(config.max_errors)),
            context: Mutex::new(context),
            classifier: Mutex::new(Arc::new(DefaultClassifier)),
            sample_rate: config.sample_rate.clamp(0.0, 1.0),
            retention: Duration::days(i64::from(config.retention_days)),
            enabled: config.enabled,
            alerts: AlertEngine::new(mode, Arc::clone(&stats)),
            events: EventEmitter::new(),
            stats,
        }
    }

    /// Track one occurrence of an error at the current time
    pub fn track_error(
        &self,
        raw: impl Into<RawError>,
        context_override: Option<&ContextPatch>,
    ) -> TrackedError {
        self.track_error_at(raw, context_override, Utc::now())
    }

    /// Track one occurrence of an error at `now`
    ///
    /// Unsampled occurrences (or any occurrence while tracking is disabled)
    /// return a throwaway record that is never stored, counted or alerted on.
    pub fn track_error_at(
        &self,
        raw: impl Into<RawError>,
        context_override: Option<&ContextPatch>,
        now: Timestamp,
    ) -> TrackedError {
        let raw = raw.into();
        let classification = lock(&self.classifier).classify(&raw);
        let fingerprint = fingerprint(classification.error_type, &raw);
        let context = {
            let ambient = lock(&self.context);
            match context_override {
                Some(patch) => ambient.merged(patch),
                None => ambient.clone(),
            }
        };

        if !self.enabled || !self.sampled() {
            self.stats.record_error_sampled_out();
            return Self::new_record(raw, classification, fingerprint, context, now);
        }

        let (record, is_new, alerts) = {
            let mut store = lock(&self.store);

            let (record, is_new) = match store.get_mut(&fingerprint) {
                Some(existing) => {
                    existing.count += 1;
                    if now > existing.last_seen {
                        existing.last_seen = now;
                    }
                    existing.resolved = false;
                    if let Some(user) = &context.user_id {
                        existing.affected_users.insert(user.clone());
                    }
                    for tag in &raw.tags {
                        if !existing.tags.contains(tag) {
                            existing.tags.push(tag.clone());
                        }
                    }
                    (existing.clone(), false)
                }
                None => {
                    let record = Self::new_record(raw, classification, fingerprint, context, now);
                    let evicted = store.insert(record.clone());
                    if !evicted.is_empty() {
                        debug!(
                            "Error store full, evicted {} least recently seen record(s)",
                            evicted.len()
                        );
                    }
                    (record, true)
                }
            };

            let alerts = self.alerts.evaluate(&store, &record, now);
            (record, is_new, alerts)
        };

        self.stats.record_error_tracked();
        if is_new {
            debug!(
                "New error group {} [{}/{}]: {}",
                record.fingerprint, record.error_type, record.severity, record.message
            );
            self.events.emit(&TrackerEvent::ErrorNew(record.clone()));
        } else {
            self.events.emit(&TrackerEvent::ErrorUpdated(record.clone()));
        }

        self.alerts.dispatch(alerts);
        record
    }

    fn new_record(
        raw: RawError,
        classification: Classification,
        fingerprint: String,
        context: ErrorContext,
        now: Timestamp,
    ) -> TrackedError {
        let affected_users: BTreeSet<String> = context.user_id.iter().cloned().collect();
        TrackedError {
            id: uuid::Uuid::new_v4().to_string(),
            fingerprint,
            error_type: classification.error_type,
            severity: classification.severity,
            name: raw.name,
            message: raw.message,
            stack: raw.stack,
            status: raw.status,
            code: raw.code,
            count: 1,
            first_seen: now,
            last_seen: now,
            resolved: false,
            tags: raw.tags,
            context,
            affected_users,
        }
    }

    fn sampled(&self) -> bool {
        if self.sample_rate >= 1.0 {
            true
        } else if self.sample_rate <= 0.0 {
            false
        } else {
            rand::random::<f64>() < self.sample_rate
        }
    }

    /// Mark a record resolved; returns `false` for an unknown fingerprint
    pub fn resolve_error(&self, fingerprint: &str) -> bool {
        let resolved = {
            let mut store = lock(&self.store);
            match store.get_mut(fingerprint) {
                Some(error) => {
                    error.resolved = true;
                    Some(error.clone())
                }
                None => None,
            }
        };

        match resolved {
            Some(error) => {
                info!("Resolved error group {}", fingerprint);
                self.events.emit(&TrackerEvent::ErrorResolved(error));
                true
            }
            None => false,
        }
    }

    pub fn get_error(&self, fingerprint: &str) -> Option<TrackedError> {
        lock(&self.store).get(fingerprint).cloned()
    }

    /// Copy of every stored record, most recently seen first
    pub fn errors(&self) -> Vec<TrackedError> {
        let mut errors: Vec<TrackedError> = lock(&self.store).values().cloned().collect();
        errors.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        errors
    }

    pub fn len(&self) -> usize {
        lock(&self.store).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.store).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.store).clear();
    }

    /// Aggregate metrics at the current time
    pub fn get_metrics(&self) -> ErrorMetrics {
        self.get_metrics_at(Utc::now())
    }

    /// Aggregate metrics relative to `now`
    pub fn get_metrics_at(&self, now: Timestamp) -> ErrorMetrics {
        let store = lock(&self.store);
        let day_ago = now - Duration::hours(24);
        let hour_ago = now - Duration::hours(1);

        let mut errors_by_type = BTreeMap::new();
        let mut errors_by_severity = BTreeMap::new();
        let mut trend: BTreeMap<Timestamp, u64> = BTreeMap::new();
        let mut users = BTreeSet::new();
        let mut total_errors = 0;
        let mut errors_last_hour = 0;
        let mut unresolved_errors = 0;
        let mut critical_unresolved = 0;

        for error in store.values() {
            total_errors += error.count;
            *errors_by_type.entry(error.error_type).or_insert(0) += error.count;
            *errors_by_severity.entry(error.severity).or_insert(0) += error.count;

            if !error.resolved {
                unresolved_errors += 1;
                if error.severity == ErrorSeverity::Critical {
                    critical_unresolved += 1;
                }
            }
            if error.last_seen >= hour_ago {
                errors_last_hour += error.count;
            }
            if error.last_seen >= day_ago {
                *trend.entry(truncate_to_hour(error.last_seen)).or_insert(0) += error.count;
                users.extend(error.affected_users.iter().cloned());
            }
        }

        let mut top_errors: Vec<TrackedError> = store.values().cloned().collect();
        top_errors.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| b.last_seen.cmp(&a.last_seen))
        });
        top_errors.truncate(TOP_ERRORS);

        ErrorMetrics {
            total_errors,
            unique_errors: store.len(),
            unresolved_errors,
            errors_last_hour,
            critical_unresolved,
            errors_by_type,
            errors_by_severity,
            hourly_trend: trend
                .into_iter()
                .map(|(hour, count)| HourlyBucket { hour, count })
                .collect(),
            top_errors,
            affected_users: users.len(),
            generated_at: now,
        }
    }

    /// Run the retention sweep at the current time
    pub fn reap(&self) -> usize {
        self.reap_at(Utc::now())
    }

    /// Delete records older than the retention window, then enforce the cap
    pub fn reap_at(&self, now: Timestamp) -> usize {
        let removed = lock(&self.store).reap(now - self.retention);
        if removed > 0 {
            info!("Retention sweep removed {} error record(s)", removed);
            self.events.emit(&TrackerEvent::ErrorsReaped { removed });
        }
        removed
    }

    /// Overlay fields onto the ambient context used for new records
    pub fn set_context(&self, patch: &ContextPatch) {
        lock(&self.context).apply(patch);
    }

    pub fn set_user(&self, user_id: Option<String>) {
        lock(&self.context).user_id = user_id;
    }

    pub fn context(&self) -> ErrorContext {
        lock(&self.context).clone()
    }

    /// Replace the classification policy
    pub fn set_classifier(&self, classifier: Arc<dyn ErrorClassifier>) {
        *lock(&self.classifier) = classifier;
    }

    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    pub fn events(&self) -> &EventEmitter<TrackerEvent> {
        &self.events
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

fn truncate_to_hour(timestamp: Timestamp) -> Timestamp {
    timestamp
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertCondition, AlertEvent, AlertRule};
    use crate::events::ComparisonOperator;
    use chrono::TimeZone;

    fn config() -> ErrorsConfig {
        ErrorsConfig::default()
    }

    fn tracker_with(config: &ErrorsConfig) -> ErrorTracker {
        ErrorTracker::with_dispatch_mode(
            config,
            ErrorContext::default(),
            Arc::new(PipelineStats::new()),
            DispatchMode::Inline,
        )
    }

    fn tracker() -> ErrorTracker {
        tracker_with(&config())
    }

    #[test]
    fn test_retries_collapse_into_one_record() {
        let tracker = tracker();
        let raw = || RawError::new("Failed after 3 retries").with_type(ErrorType::Javascript);

        for _ in 0..3 {
            tracker.track_error(raw(), None);
        }
        let last = tracker.track_error(
            RawError::new("Failed after 9 retries").with_type(ErrorType::Javascript),
            None,
        );

        assert_eq!(tracker.len(), 1);
        assert_eq!(last.count, 4);
        assert_eq!(tracker.get_error(&last.fingerprint).unwrap().count, 4);
    }

    #[test]
    fn test_dedup_count_equals_occurrences() {
        let tracker = tracker();
        let mut fingerprint = String::new();
        for _ in 0..25 {
            fingerprint = tracker.track_error("same failure", None).fingerprint;
        }
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get_error(&fingerprint).unwrap().count, 25);
    }

    #[test]
    fn test_lifecycle_events() {
        let tracker = tracker();
        let (_id, events) = tracker.events().channel();

        let first = tracker.track_error("boom", None);
        tracker.track_error("boom", None);
        assert!(tracker.resolve_error(&first.fingerprint));
        assert!(!tracker.resolve_error("unknown"));

        let received: Vec<TrackerEvent> = events.try_iter().collect();
        assert!(matches!(received[0], TrackerEvent::ErrorNew(_)));
        assert!(matches!(&received[1], TrackerEvent::ErrorUpdated(e) if e.count == 2));
        assert!(matches!(&received[2], TrackerEvent::ErrorResolved(e) if e.resolved));
    }

    #[test]
    fn test_resolved_error_reopens_on_recurrence() {
        let tracker = tracker();
        let first = tracker.track_error("boom", None);
        tracker.resolve_error(&first.fingerprint);
        assert!(tracker.get_error(&first.fingerprint).unwrap().resolved);

        let again = tracker.track_error("boom", None);
        assert!(!again.resolved);
        assert_eq!(again.count, 2);
    }

    #[test]
    fn test_unsampled_occurrences_are_not_stored() {
        let mut config = config();
        config.sample_rate = 0.0;
        let stats = Arc::new(PipelineStats::new());
        let tracker = ErrorTracker::with_dispatch_mode(
            &config,
            ErrorContext::default(),
            Arc::clone(&stats),
            DispatchMode::Inline,
        );
        let (_id, events) = tracker.events().channel();

        let record = tracker.track_error(RawError::new("fatal").with_severity(ErrorSeverity::Critical), None);

        assert_eq!(record.count, 1);
        assert!(tracker.is_empty());
        assert!(events.try_recv().is_err());
        assert!(tracker.alerts().rules()[0].last_triggered.is_none());
        assert_eq!(stats.snapshot().errors_sampled_out, 1);
        assert_eq!(stats.snapshot().errors_tracked, 0);
    }

    #[test]
    fn test_context_override_and_ambient_context() {
        let tracker = tracker();
        tracker.set_context(&ContextPatch {
            service: Some("checkout".to_string()),
            ..ContextPatch::default()
        });
        tracker.set_user(Some("ambient-user".to_string()));

        let record = tracker.track_error("boom", Some(&ContextPatch::user("override-user")));
        assert_eq!(record.context.service, "checkout");
        assert_eq!(record.context.user_id.as_deref(), Some("override-user"));
        assert_eq!(tracker.context().user_id.as_deref(), Some("ambient-user"));

        tracker.track_error("boom", None);
        let stored = tracker.get_error(&record.fingerprint).unwrap();
        assert_eq!(stored.affected_users.len(), 2);
        // Context is fixed at creation
        assert_eq!(stored.context.user_id.as_deref(), Some("override-user"));
    }

    #[test]
    fn test_critical_rule_cooldown_scenario() {
        let tracker = tracker();
        tracker
            .alerts()
            .replace_rules(vec![AlertRule::new(
                "critical",
                "Critical",
                AlertCondition {
                    error_type: None,
                    severity: Some(ErrorSeverity::Critical),
                    threshold: 1.0,
                    time_window: 1,
                    operator: ComparisonOperator::Gte,
                },
            )
            .with_cooldown(5)])
            .unwrap();
        let (_id, alerts) = tracker.alerts().events().channel();

        let t0 = Utc::now();
        let critical = |message: &str| RawError::new(message).with_severity(ErrorSeverity::Critical);

        tracker.track_error_at(critical("db down"), None, t0);
        tracker.track_error_at(critical("cache down"), None, t0 + Duration::minutes(2));
        tracker.track_error_at(critical("queue down"), None, t0 + Duration::minutes(6));

        let fired: Vec<Timestamp> = alerts
            .try_iter()
            .filter_map(|event| match event {
                AlertEvent::Triggered(alert) => Some(alert.triggered_at),
                _ => None,
            })
            .collect();
        assert_eq!(fired, vec![t0, t0 + Duration::minutes(6)]);
    }

    #[test]
    fn test_capacity_eviction_keeps_most_recent() {
        let mut config = config();
        config.max_errors = 5;
        let tracker = tracker_with(&config);
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let mut fingerprints = Vec::new();
        for i in 0..8 {
            let record = tracker.track_error_at(
                RawError::new(format!("distinct failure {}", ["a", "b", "c", "d", "e", "f", "g", "h"][i])),
                None,
                base + Duration::minutes(i as i64),
            );
            fingerprints.push(record.fingerprint);
        }

        assert_eq!(tracker.len(), 5);
        for evicted in &fingerprints[..3] {
            assert!(tracker.get_error(evicted).is_none());
        }
        for kept in &fingerprints[3..] {
            assert!(tracker.get_error(kept).is_some());
        }
    }

    #[test]
    fn test_reap_removes_records_past_retention() {
        let tracker = tracker();
        let now = Utc::now();
        let (_id, events) = tracker.events().channel();

        tracker.track_error_at("ancient", None, now - Duration::days(30));
        tracker.track_error_at("recent", None, now - Duration::hours(2));

        assert_eq!(tracker.reap_at(now), 1);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.errors()[0].message, "recent");
        assert!(events
            .try_iter()
            .any(|event| matches!(event, TrackerEvent::ErrorsReaped { removed: 1 })));
    }

    #[test]
    fn test_metrics_aggregation() {
        let tracker = tracker();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();

        for _ in 0..3 {
            tracker.track_error_at(
                RawError::new("api down").with_status(503),
                Some(&ContextPatch::user("u1")),
                now - Duration::minutes(10),
            );
        }
        tracker.track_error_at(
            RawError::new("forbidden").with_status(403),
            Some(&ContextPatch::user("u2")),
            now - Duration::hours(3),
        );
        tracker.track_error_at(
            RawError::new("old").with_severity(ErrorSeverity::Critical),
            Some(&ContextPatch::user("u3")),
            now - Duration::hours(30),
        );

        let metrics = tracker.get_metrics_at(now);

        assert_eq!(metrics.total_errors, 5);
        assert_eq!(metrics.unique_errors, 3);
        assert_eq!(metrics.errors_last_hour, 3);
        assert_eq!(metrics.critical_unresolved, 1);
        assert_eq!(metrics.errors_by_type[&ErrorType::Api], 3);
        assert_eq!(metrics.errors_by_type[&ErrorType::Security], 1);
        assert_eq!(metrics.errors_by_severity[&ErrorSeverity::High], 4);
        assert_eq!(metrics.affected_users, 2);
        assert_eq!(metrics.top_errors[0].message, "api down");

        let trend: Vec<u64> = metrics.hourly_trend.iter().map(|b| b.count).collect();
        assert_eq!(trend, vec![1, 3]);
        assert_eq!(
            metrics.hourly_trend[1].hour,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_custom_classifier() {
        struct EverythingIsBusiness;
        impl ErrorClassifier for EverythingIsBusiness {
            fn classify(&self, _raw: &RawError) -> Classification {
                Classification {
                    error_type: ErrorType::Business,
                    severity: ErrorSeverity::Low,
                }
            }
        }

        let tracker = tracker();
        tracker.set_classifier(Arc::new(EverythingIsBusiness));
        let record = tracker.track_error(RawError::new("x").with_status(500), None);

        assert_eq!(record.error_type, ErrorType::Business);
        assert_eq!(record.severity, ErrorSeverity::Low);
    }

    #[test]
    fn test_concurrent_tracking_keeps_exact_count() {
        let tracker = Arc::new(tracker());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        tracker.track_error("shared failure", None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.errors()[0].count, 400);
    }
}
