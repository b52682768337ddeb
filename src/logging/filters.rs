//! Log filters applied before an entry is buffered

use crate::logging::entry::{LogEntry, LogLevel};
use std::collections::BTreeSet;

/// Predicate deciding whether an entry is kept
pub trait LogFilter: Send + Sync {
    /// Short name used in diagnostics
    fn name(&self) -> &str;

    fn allows(&self, entry: &LogEntry) -> bool;
}

/// Drops entries below a minimum level
#[derive(Debug, Clone, Copy)]
pub struct LevelFilter {
    min_level: LogLevel,
}

impl LevelFilter {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }
}

impl LogFilter for LevelFilter {
    fn name(&self) -> &str {
        "level"
    }

    fn allows(&self, entry: &LogEntry) -> bool {
        entry.level >= self.min_level
    }
}

/// Keeps a random fraction of entries; error and fatal always pass
#[derive(Debug, Clone, Copy)]
pub struct SamplingFilter {
    rate: f64,
}

impl SamplingFilter {
    pub fn new(rate: f64) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl LogFilter for SamplingFilter {
    fn name(&self) -> &str {
        "sampling"
    }

    fn allows(&self, entry: &LogEntry) -> bool {
        if entry.level.is_error() || self.rate >= 1.0 {
            return true;
        }
        if self.rate <= 0.0 {
            return false;
        }
        rand::random::<f64>() < self.rate
    }
}

/// Allow/block lists on `metadata.component`
///
/// A non-empty allow list drops every entry whose component is absent or not
/// listed. The block list is checked after the allow list.
#[derive(Debug, Clone, Default)]
pub struct ComponentFilter {
    allow: BTreeSet<String>,
    block: BTreeSet<String>,
}

impl ComponentFilter {
    pub fn new<A, B, S>(allow: A, block: B) -> Self
    where
        A: IntoIterator<Item = S>,
        B: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow: allow.into_iter().map(Into::into).collect(),
            block: block.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.block.is_empty()
    }
}

impl LogFilter for ComponentFilter {
    fn name(&self) -> &str {
        "component"
    }

    fn allows(&self, entry: &LogEntry) -> bool {
        let component = entry.metadata.component.as_deref();
        if !self.allow.is_empty() {
            match component {
                Some(c) if self.allow.contains(c) => {}
                _ => return false,
            }
        }
        !component.is_some_and(|c| self.block.contains(c))
    }
}

/// Wraps a closure as a filter
pub struct FnFilter {
    name: String,
    predicate: Box<dyn Fn(&LogEntry) -> bool + Send + Sync>,
}

impl FnFilter {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&LogEntry) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
        }
    }
}

impl LogFilter for FnFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn allows(&self, entry: &LogEntry) -> bool {
        (self.predicate)(entry)
    }
}
