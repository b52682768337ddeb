//! Core Web Vitals and their rating thresholds

use crate::events::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A Core Web Vital
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum WebVital {
    /// First Contentful Paint (ms)
    Fcp,
    /// Largest Contentful Paint (ms)
    Lcp,
    /// First Input Delay (ms)
    Fid,
    /// Cumulative Layout Shift (unitless)
    Cls,
    /// Time To First Byte (ms)
    Ttfb,
    /// Interaction to Next Paint (ms)
    Inp,
}

impl WebVital {
    pub const ALL: [WebVital; 6] = [
        WebVital::Fcp,
        WebVital::Lcp,
        WebVital::Fid,
        WebVital::Cls,
        WebVital::Ttfb,
        WebVital::Inp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WebVital::Fcp => "FCP",
            WebVital::Lcp => "LCP",
            WebVital::Fid => "FID",
            WebVital::Cls => "CLS",
            WebVital::Ttfb => "TTFB",
            WebVital::Inp => "INP",
        }
    }

    /// `(good, poor)` boundaries
    pub fn thresholds(self) -> (f64, f64) {
        match self {
            WebVital::Fcp => (1800.0, 3000.0),
            WebVital::Lcp => (2500.0, 4000.0),
            WebVital::Fid => (100.0, 300.0),
            WebVital::Cls => (0.1, 0.25),
            WebVital::Ttfb => (800.0, 1800.0),
            WebVital::Inp => (200.0, 500.0),
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            WebVital::Cls => "score",
            _ => "ms",
        }
    }

    /// `good` up to and including the good boundary, `poor` strictly above
    /// the poor boundary
    pub fn rate(self, value: f64) -> Rating {
        let (good, poor) = self.thresholds();
        if value <= good {
            Rating::Good
        } else if value > poor {
            Rating::Poor
        } else {
            Rating::NeedsImprovement
        }
    }
}

impl fmt::Display for WebVital {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebVital {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WebVital::ALL
            .into_iter()
            .find(|vital| vital.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown web vital '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Rating {
    Good,
    NeedsImprovement,
    Poor,
}

impl Rating {
    pub fn as_str(self) -> &'static str {
        match self {
            Rating::Good => "good",
            Rating::NeedsImprovement => "needs-improvement",
            Rating::Poor => "poor",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rated Web Vital sample
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VitalsMetric {
    pub name: WebVital,
    pub value: f64,
    pub unit: String,
    pub rating: Rating,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl VitalsMetric {
    pub fn new(name: WebVital, value: f64, timestamp: Timestamp) -> Self {
        Self {
            name,
            value,
            unit: name.unit().to_string(),
            rating: name.rate(value),
            timestamp,
            tags: BTreeMap::new(),
        }
    }
}
