//! Shared event plumbing and core enums
//!
//! This module defines the types every pipeline component agrees on: the
//! timestamp alias, the deployment environment, the comparison operators used
//! by alert rules and performance budgets, and the `EventEmitter` callback list
//! each component uses to publish its outbound events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Lock a mutex, recovering the data if a previous holder panicked
///
/// Observability state is always left consistent between statements, so a
/// poisoned lock carries usable data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Deployment environment the host application runs in
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        };
        f.write_str(name)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

/// Comparison operator shared by alert rules and performance budgets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl ComparisonOperator {
    /// Check whether `value <op> threshold` holds
    pub fn compare(self, value: f64, threshold: f64) -> bool {
        match self {
            ComparisonOperator::Gt => value > threshold,
            ComparisonOperator::Gte => value >= threshold,
            ComparisonOperator::Lt => value < threshold,
            ComparisonOperator::Lte => value <= threshold,
            ComparisonOperator::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }

    /// Symbol used in human readable alert messages
    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Gte => ">=",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::Lte => "<=",
            ComparisonOperator::Eq => "==",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComparisonOperator::Gt => "gt",
            ComparisonOperator::Gte => "gte",
            ComparisonOperator::Lt => "lt",
            ComparisonOperator::Lte => "lte",
            ComparisonOperator::Eq => "eq",
        };
        f.write_str(name)
    }
}

/// Handle returned by `EventEmitter::subscribe`, used to unsubscribe later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Typed outbound event list
///
/// Components publish their lifecycle events through an emitter; the
/// integration hub (or any caller) subscribes with a callback. Listeners are
/// invoked on the emitting thread, after the component released its own locks,
/// so a listener may call back into any component.
pub struct EventEmitter<E> {
    listeners: Mutex<Vec<(SubscriptionId, Listener<E>)>>,
    next_id: AtomicU64,
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<E> EventEmitter<E> {
    /// Create an emitter with no listeners
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback invoked for every emitted event
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((id, Arc::new(listener)));
        id
    }

    /// Remove a previously registered callback
    ///
    /// Returns `false` if the subscription was not found.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Deliver an event to every listener
    pub fn emit(&self, event: &E) {
        // Snapshot so listeners can subscribe/unsubscribe without deadlocking
        let listeners: Vec<Listener<E>> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(event);
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Drop every listener
    pub fn clear(&self) {
        lock(&self.listeners).clear();
    }
}

impl<E: Clone + Send + 'static> EventEmitter<E> {
    /// Subscribe through an mpsc channel instead of a callback
    ///
    /// The returned receiver yields a clone of every event emitted after this
    /// call. The subscription stays registered until `unsubscribe` is called;
    /// sends to a dropped receiver are ignored.
    pub fn channel(&self) -> (SubscriptionId, Receiver<E>) {
        let (sender, receiver) = mpsc::channel();
        let sender: Mutex<Sender<E>> = Mutex::new(sender);
        let id = self.subscribe(move |event: &E| {
            let _ = lock(&sender).send(event.clone());
        });
        (id, receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_environment_serialization() {
        assert_eq!(
            serde_json::to_string(&Environment::Production).unwrap(),
            "\"production\""
        );
        assert_eq!(
            serde_json::from_str::<Environment>("\"staging\"").unwrap(),
            Environment::Staging
        );
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn test_comparison_operators() {
        assert!(ComparisonOperator::Gt.compare(3.0, 2.0));
        assert!(!ComparisonOperator::Gt.compare(2.0, 2.0));
        assert!(ComparisonOperator::Gte.compare(2.0, 2.0));
        assert!(ComparisonOperator::Lt.compare(1.0, 2.0));
        assert!(!ComparisonOperator::Lt.compare(2.0, 2.0));
        assert!(ComparisonOperator::Lte.compare(2.0, 2.0));
        assert!(ComparisonOperator::Eq.compare(2.0, 2.0));
        assert!(!ComparisonOperator::Eq.compare(2.0, 2.5));
    }

    #[test]
    fn test_comparison_operator_serialization() {
        assert_eq!(
            serde_json::to_string(&ComparisonOperator::Lte).unwrap(),
            "\"lte\""
        );
        assert_eq!(
            serde_json::from_str::<ComparisonOperator>("\"gte\"").unwrap(),
            ComparisonOperator::Gte
        );
    }

    #[test]
    fn test_emitter_delivers_to_all_listeners() {
        let emitter: EventEmitter<u32> = EventEmitter::new();
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let total = Arc::clone(&total);
            emitter.subscribe(move |value: &u32| {
                total.fetch_add(*value as usize, Ordering::SeqCst);
            });
        }

        emitter.emit(&2);
        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_emitter_unsubscribe() {
        let emitter: EventEmitter<u32> = EventEmitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = emitter.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(&1);
        assert!(emitter.unsubscribe(id));
        assert!(!emitter.unsubscribe(id));
        emitter.emit(&1);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_emitter_listener_may_subscribe_reentrantly() {
        let emitter: Arc<EventEmitter<u32>> = Arc::new(EventEmitter::new());
        let inner = Arc::clone(&emitter);
        emitter.subscribe(move |_| {
            inner.subscribe(|_| {});
        });

        emitter.emit(&1);
        assert_eq!(emitter.listener_count(), 2);
    }

    #[test]
    fn test_emitter_channel() {
        let emitter: EventEmitter<String> = EventEmitter::new();
        let (_id, receiver) = emitter.channel();

        emitter.emit(&"first".to_string());
        emitter.emit(&"second".to_string());

        assert_eq!(receiver.try_recv().unwrap(), "first");
        assert_eq!(receiver.try_recv().unwrap(), "second");
        assert!(receiver.try_recv().is_err());
    }
}
