//! Rule evaluation with per-rule cooldown
//!
//! The engine owns the rule list and the action registry. The error tracker
//! calls `evaluate` with its store locked after every sampled occurrence, then
//! `dispatch` once the store lock has been released.

use crate::alerts::actions::{AlertAction, LogAction};
use crate::alerts::dispatcher::{AlertDispatcher, DispatchMode};
use crate::alerts::rules::{AlertRule, LOG_ACTION};
use crate::error::ConfigError;
use crate::events::{lock, ComparisonOperator, EventEmitter, Timestamp};
use crate::monitoring::PipelineStats;
use crate::tracking::{ErrorStore, TrackedError};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A fired alert rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub message: String,
    /// Windowed error count that satisfied the rule
    pub value: f64,
    pub threshold: f64,
    pub operator: ComparisonOperator,
    pub triggered_at: Timestamp,
    /// The occurrence whose tracking caused the evaluation
    pub error: Option<TrackedError>,
}

/// Events published by the alert engine
#[derive(Debug, Clone)]
pub enum AlertEvent {
    /// A rule fired
    Triggered(Alert),
    /// An action failed to deliver an alert
    DispatchFailed {
        alert_id: String,
        rule_id: String,
        action: String,
        reason: String,
    },
}

/// Threshold/window alert rules evaluated against the error store
pub struct AlertEngine {
    rules: Mutex<Vec<AlertRule>>,
    actions: Mutex<HashMap<String, Arc<dyn AlertAction>>>,
    dispatcher: AlertDispatcher,
    events: Arc<EventEmitter<AlertEvent>>,
    stats: Arc<PipelineStats>,
}

impl AlertEngine {
    /// Create an engine with the built-in rule templates and the `log` action
    pub fn new(mode: DispatchMode, stats: Arc<PipelineStats>) -> Self {
        let engine = Self::empty(mode, stats);
        *lock(&engine.rules) = AlertRule::default_rules();
        engine
    }

    /// Create an engine with no rules; only the `log` action is registered
    pub fn empty(mode: DispatchMode, stats: Arc<PipelineStats>) -> Self {
        let events = Arc::new(EventEmitter::new());
        let dispatcher = AlertDispatcher::new(mode, Arc::clone(&events), Arc::clone(&stats));

        let mut actions: HashMap<String, Arc<dyn AlertAction>> = HashMap::new();
        actions.insert(LOG_ACTION.to_string(), Arc::new(LogAction));

        Self {
            rules: Mutex::new(Vec::new()),
            actions: Mutex::new(actions),
            dispatcher,
            events,
            stats,
        }
    }

    /// Register a validated rule
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for an invalid rule or a
    /// duplicate id.
    pub fn add_rule(&self, rule: AlertRule) -> Result<(), ConfigError> {
        rule.validate()?;

        let mut rules = lock(&self.rules);
        if rules.iter().any(|existing| existing.id == rule.id) {
            return Err(ConfigError::ValidationError(format!(
                "alert rule '{}' already exists",
                rule.id
            )));
        }

        for action in &rule.actions {
            if !lock(&self.actions).contains_key(action) {
                warn!(
                    "Alert rule '{}' references unregistered action '{}'",
                    rule.id, action
                );
            }
        }

        info!("Added alert rule '{}' ({})", rule.id, rule.name);
        rules.push(rule);
        Ok(())
    }

    /// Replace the whole rule list, validating every rule first
    pub fn replace_rules(&self, new_rules: Vec<AlertRule>) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for rule in &new_rules {
            rule.validate()?;
            if !seen.insert(rule.id.clone()) {
                return Err(ConfigError::ValidationError(format!(
                    "alert rule '{}' is defined twice",
                    rule.id
                )));
            }
        }
        *lock(&self.rules) = new_rules;
        Ok(())
    }

    /// Remove a rule; returns `false` if no rule had that id
    pub fn remove_rule(&self, id: &str) -> bool {
        let mut rules = lock(&self.rules);
        let before = rules.len();
        rules.retain(|rule| rule.id != id);
        rules.len() != before
    }

    /// Enable or disable a rule; returns `false` if no rule had that id
    pub fn set_rule_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut rules = lock(&self.rules);
        match rules.iter_mut().find(|rule| rule.id == id) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Copy of the current rules, including their `last_triggered` stamps
    pub fn rules(&self) -> Vec<AlertRule> {
        lock(&self.rules).clone()
    }

    /// Register an action under a channel name, replacing any previous one
    pub fn register_action(&self, name: impl Into<String>, action: Arc<dyn AlertAction>) {
        lock(&self.actions).insert(name.into(), action);
    }

    pub fn events(&self) -> &EventEmitter<AlertEvent> {
        &self.events
    }

    /// Evaluate every enabled rule that is out of cooldown
    ///
    /// Fired rules get `last_triggered = now`. The returned alerts have not
    /// been announced or dispatched yet; pass them to `dispatch`.
    pub fn evaluate(&self, store: &ErrorStore, trigger: &TrackedError, now: Timestamp) -> Vec<Alert> {
        let mut fired = Vec::new();
        let mut rules = lock(&self.rules);

        for rule in rules.iter_mut() {
            if !rule.enabled || rule.is_cooling_down(now) {
                continue;
            }

            let value = rule.windowed_count(store.values(), now) as f64;
            if !rule.condition.operator.compare(value, rule.condition.threshold) {
                continue;
            }

            rule.last_triggered = Some(now);
            fired.push(Alert {
                id: uuid::Uuid::new_v4().to_string(),
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                message: format!(
                    "{} matching error(s) in the last {} minute(s) ({} {})",
                    value,
                    rule.condition.time_window,
                    rule.condition.operator.symbol(),
                    rule.condition.threshold
                ),
                value,
                threshold: rule.condition.threshold,
                operator: rule.condition.operator,
                triggered_at: now,
                error: Some(trigger.clone()),
            });
        }

        fired
    }

    /// Announce fired alerts and hand them to their actions
    pub fn dispatch(&self, alerts: Vec<Alert>) {
        for alert in alerts {
            info!("Alert rule '{}' triggered: {}", alert.rule_id, alert.message);
            self.stats.record_alert_triggered();
            self.events.emit(&AlertEvent::Triggered(alert.clone()));

            let action_names = lock(&self.rules)
                .iter()
                .find(|rule| rule.id == alert.rule_id)
                .map(|rule| rule.actions.clone())
                .unwrap_or_default();

            let actions: Vec<(String, Option<Arc<dyn AlertAction>>)> = {
                let registry = lock(&self.actions);
                action_names
                    .into_iter()
                    .map(|name| {
                        let action = registry.get(&name).cloned();
                        (name, action)
                    })
                    .collect()
            };

            self.dispatcher.dispatch(&alert, actions);
        }
    }

    /// Wait for queued dispatches and stop the dispatch worker
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::actions::MockAlertAction;
    use crate::alerts::rules::AlertCondition;
    use crate::tracking::{ErrorContext, ErrorSeverity, ErrorType};
    use chrono::{Duration, Utc};
    use std::collections::BTreeSet;

    fn tracked(fingerprint: &str, severity: ErrorSeverity, count: u64, seen: Timestamp) -> TrackedError {
        TrackedError {
            id: format!("id-{}", fingerprint),
            fingerprint: fingerprint.to_string(),
            error_type: ErrorType::Javascript,
            severity,
            name: None,
            message: "boom".to_string(),
            stack: None,
            status: None,
            code: None,
            count,
            first_seen: seen,
            last_seen: seen,
            resolved: false,
            tags: Vec::new(),
            context: ErrorContext::default(),
            affected_users: BTreeSet::new(),
        }
    }

    fn engine_with(rule: AlertRule) -> AlertEngine {
        let engine = AlertEngine::empty(DispatchMode::Inline, Arc::new(PipelineStats::new()));
        engine.add_rule(rule).unwrap();
        engine
    }

    #[test]
    fn test_new_engine_has_default_rules() {
        let engine = AlertEngine::new(DispatchMode::Inline, Arc::new(PipelineStats::new()));
        let ids: Vec<String> = engine.rules().into_iter().map(|rule| rule.id).collect();
        assert_eq!(ids, vec!["critical-errors", "error-spike", "security-errors"]);
    }

    #[test]
    fn test_add_rule_rejects_duplicates_and_invalid() {
        let engine = engine_with(AlertRule::critical_errors());
        assert!(engine.add_rule(AlertRule::critical_errors()).is_err());

        let mut invalid = AlertRule::error_spike();
        invalid.condition.time_window = 0;
        assert!(engine.add_rule(invalid).is_err());
        assert_eq!(engine.rules().len(), 1);
    }

    #[test]
    fn test_remove_and_disable_rule() {
        let engine = engine_with(AlertRule::critical_errors());
        let now = Utc::now();
        let mut store = ErrorStore::new(10);
        let error = tracked("a", ErrorSeverity::Critical, 1, now);
        store.insert(error.clone());

        assert!(engine.set_rule_enabled("critical-errors", false));
        assert!(engine.evaluate(&store, &error, now).is_empty());

        assert!(engine.remove_rule("critical-errors"));
        assert!(!engine.remove_rule("critical-errors"));
        assert!(!engine.set_rule_enabled("critical-errors", true));
    }

    #[test]
    fn test_threshold_comparison() {
        let rule = AlertRule::new(
            "many",
            "Many errors",
            AlertCondition {
                error_type: None,
                severity: None,
                threshold: 5.0,
                time_window: 5,
                operator: ComparisonOperator::Gt,
            },
        );
        let engine = engine_with(rule);
        let now = Utc::now();
        let mut store = ErrorStore::new(10);
        let error = tracked("a", ErrorSeverity::Low, 5, now);
        store.insert(error.clone());

        assert!(engine.evaluate(&store, &error, now).is_empty());

        let second = tracked("b", ErrorSeverity::Low, 1, now - Duration::minutes(2));
        store.insert(second);
        let fired = engine.evaluate(&store, &error, now);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].value, 6.0);
        assert_eq!(fired[0].error.as_ref().unwrap().fingerprint, "a");
    }

    #[test]
    fn test_cooldown_suppresses_refire() {
        let engine = engine_with(AlertRule::critical_errors());
        let t0 = Utc::now();
        let mut store = ErrorStore::new(10);

        let first = tracked("a", ErrorSeverity::Critical, 1, t0);
        store.insert(first.clone());
        assert_eq!(engine.evaluate(&store, &first, t0).len(), 1);

        let t2 = t0 + Duration::minutes(2);
        let second = tracked("b", ErrorSeverity::Critical, 1, t2);
        store.insert(second.clone());
        assert!(engine.evaluate(&store, &second, t2).is_empty());

        let t6 = t0 + Duration::minutes(6);
        let third = tracked("c", ErrorSeverity::Critical, 1, t6);
        store.insert(third.clone());
        assert_eq!(engine.evaluate(&store, &third, t6).len(), 1);

        let rule = engine.rules().into_iter().next().unwrap();
        assert_eq!(rule.last_triggered, Some(t6));
    }

    #[test]
    fn test_dispatch_emits_and_calls_actions() {
        let rule = AlertRule::critical_errors().with_actions(["mock", "missing"]);
        let stats = Arc::new(PipelineStats::new());
        let engine = AlertEngine::empty(DispatchMode::Inline, Arc::clone(&stats));
        engine.add_rule(rule).unwrap();

        let mut action = MockAlertAction::new();
        action
            .expect_dispatch()
            .withf(|alert: &Alert| alert.rule_id == "critical-errors")
            .times(1)
            .returning(|_| Ok(()));
        engine.register_action("mock", Arc::new(action));

        let (_id, events) = engine.events().channel();
        let now = Utc::now();
        let mut store = ErrorStore::new(10);
        let error = tracked("a", ErrorSeverity::Critical, 1, now);
        store.insert(error.clone());

        let fired = engine.evaluate(&store, &error, now);
        engine.dispatch(fired);

        let received: Vec<AlertEvent> = events.try_iter().collect();
        assert!(matches!(received[0], AlertEvent::Triggered(_)));
        assert!(matches!(
            &received[1],
            AlertEvent::DispatchFailed { action, .. } if action == "missing"
        ));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.alerts_triggered, 1);
        assert_eq!(snapshot.alert_dispatches, 1);
        assert_eq!(snapshot.alert_dispatch_failures, 1);
    }

    #[test]
    fn test_replace_rules_rejects_duplicate_ids() {
        let engine = engine_with(AlertRule::critical_errors());
        let result = engine.replace_rules(vec![AlertRule::error_spike(), AlertRule::error_spike()]);
        assert!(result.is_err());
        assert_eq!(engine.rules().len(), 1);

        engine
            .replace_rules(vec![AlertRule::security_errors()])
            .unwrap();
        assert_eq!(engine.rules()[0].id, "security-errors");
    }
}
