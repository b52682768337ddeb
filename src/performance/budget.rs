//! Performance budgets and the alert log they produce

use crate::error::ConfigError;
use crate::events::{ComparisonOperator, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Most recent performance alerts kept in the log
pub const MAX_PERFORMANCE_ALERTS: usize = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum BudgetSeverity {
    Warning,
    Error,
}

impl fmt::Display for BudgetSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetSeverity::Warning => f.write_str("warning"),
            BudgetSeverity::Error => f.write_str("error"),
        }
    }
}

/// A bound a metric is expected to satisfy
///
/// The budget holds while `value <operator> threshold` is true; a value
/// failing the comparison is a violation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceBudget {
    pub metric: String,
    pub threshold: f64,
    pub operator: ComparisonOperator,
    pub severity: BudgetSeverity,
}

impl PerformanceBudget {
    pub fn new(
        metric: impl Into<String>,
        threshold: f64,
        operator: ComparisonOperator,
        severity: BudgetSeverity,
    ) -> Self {
        Self {
            metric: metric.into(),
            threshold,
            operator,
            severity,
        }
    }

    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for an empty metric name or a
    /// non-finite threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metric.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "performance budget metric must not be empty".to_string(),
            ));
        }
        if !self.threshold.is_finite() {
            return Err(ConfigError::ValidationError(format!(
                "performance budget for '{}' has a non-finite threshold",
                self.metric
            )));
        }
        Ok(())
    }

    pub fn is_violated_by(&self, value: f64) -> bool {
        !self.operator.compare(value, self.threshold)
    }
}

/// A budget violation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceAlert {
    pub id: String,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub operator: ComparisonOperator,
    pub severity: BudgetSeverity,
    pub message: String,
    pub timestamp: Timestamp,
}

/// Checks metric values against registered budgets
#[derive(Debug, Default)]
pub struct BudgetEvaluator {
    budgets: Vec<PerformanceBudget>,
    alerts: VecDeque<PerformanceAlert>,
}

impl BudgetEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validated budget
    pub fn add_budget(&mut self, budget: PerformanceBudget) -> Result<(), ConfigError> {
        budget.validate()?;
        self.budgets.push(budget);
        Ok(())
    }

    /// Remove every budget for `metric`, returning how many were removed
    pub fn remove_budgets(&mut self, metric: &str) -> usize {
        let before = self.budgets.len();
        self.budgets.retain(|budget| budget.metric != metric);
        before - self.budgets.len()
    }

    pub fn budgets(&self) -> &[PerformanceBudget] {
        &self.budgets
    }

    /// Check `value` against every budget for `metric`
    ///
    /// Each violation is appended to the alert log and returned. Alerts are
    /// never deduplicated.
    pub fn check(&mut self, metric: &str, value: f64, now: Timestamp) -> Vec<PerformanceAlert> {
        let violations: Vec<PerformanceAlert> = self
            .budgets
            .iter()
            .filter(|budget| budget.metric == metric && budget.is_violated_by(value))
            .map(|budget| PerformanceAlert {
                id: uuid::Uuid::new_v4().to_string(),
                metric: metric.to_string(),
                value,
                threshold: budget.threshold,
                operator: budget.operator,
                severity: budget.severity,
                message: format!(
                    "{} = {} violates budget {} {}",
                    metric,
                    value,
                    budget.operator.symbol(),
                    budget.threshold
                ),
                timestamp: now,
            })
            .collect();

        for alert in &violations {
            if self.alerts.len() >= MAX_PERFORMANCE_ALERTS {
                self.alerts.pop_front();
            }
            self.alerts.push_back(alert.clone());
        }
        violations
    }

    /// The alert log, oldest first
    pub fn alerts(&self) -> Vec<PerformanceAlert> {
        self.alerts.iter().cloned().collect()
    }

    /// The `limit` most recent alerts, newest first
    pub fn recent_alerts(&self, limit: usize) -> Vec<PerformanceAlert> {
        self.alerts.iter().rev().take(limit).cloned().collect()
    }

    pub fn clear_alerts(&mut self) {
        self.alerts.clear();
    }
}
