//! Memory sampling, trend detection and leak suspicion

use crate::events::{lock, Timestamp};
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Samples kept by the monitor
pub const MAX_MEMORY_SAMPLES: usize = 100;

/// Samples needed before a trend is reported
const TREND_MIN_SAMPLES: usize = 20;
const TREND_WINDOW: usize = 10;
/// Fraction of the baseline mean the recent mean must move to count as a trend
const TREND_BAND: f64 = 0.1;
/// Usage ratio above which an increasing trend is reported as a suspected leak
const LEAK_USAGE_RATIO: f64 = 0.8;

/// Memory figures as reported by a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReading {
    pub used_bytes: u64,
    /// Zero when the limit is unknown
    pub limit_bytes: u64,
}

/// Provides the host's current memory usage
#[cfg_attr(test, mockall::automock)]
pub trait MemorySource: Send + Sync {
    /// Current reading, or `None` when usage cannot be determined
    fn read(&self) -> Option<MemoryReading>;
}

/// Reads the current process's resident set size
///
/// Uses `/proc/self/status` and `/proc/meminfo` where available and falls back
/// to `getrusage`, which reports peak rather than current usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemorySource;

impl ProcessMemorySource {
    fn resident_bytes() -> Option<u64> {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            if let Some(kib) = parse_kib_field(&status, "VmRSS:") {
                return Some(kib * 1024);
            }
        }

        #[cfg(unix)]
        {
            // SAFETY: getrusage only writes into the zeroed struct we pass
            let usage = unsafe {
                let mut usage: libc::rusage = std::mem::zeroed();
                if libc::getrusage(libc::RUSAGE_SELF, &mut usage) != 0 {
                    return None;
                }
                usage
            };
            // ru_maxrss is in KB on Linux, bytes on macOS
            #[cfg(target_os = "macos")]
            return Some(usage.ru_maxrss as u64);
            #[cfg(not(target_os = "macos"))]
            return Some(usage.ru_maxrss as u64 * 1024);
        }

        #[cfg(not(unix))]
        None
    }

    fn total_bytes() -> u64 {
        std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|meminfo| parse_kib_field(&meminfo, "MemTotal:"))
            .map(|kib| kib * 1024)
            .unwrap_or(0)
    }
}

impl MemorySource for ProcessMemorySource {
    fn read(&self) -> Option<MemoryReading> {
        let used_bytes = Self::resident_bytes()?;
        Some(MemoryReading {
            used_bytes,
            limit_bytes: Self::total_bytes(),
        })
    }
}

/// Value of a `Name:   1234 kB` line
fn parse_kib_field(contents: &str, field: &str) -> Option<u64> {
    contents
        .lines()
        .find(|line| line.starts_with(field))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MemorySample {
    pub used_bytes: u64,
    pub limit_bytes: u64,
    pub timestamp: Timestamp,
}

impl MemorySample {
    /// Used fraction of the limit, zero when the limit is unknown
    pub fn usage_ratio(&self) -> f64 {
        if self.limit_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.limit_bytes as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTrend {
    Increasing,
    Decreasing,
    Stable,
    /// Fewer samples than the trend needs
    Unknown,
}

/// Point-in-time view of the monitor for reports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemorySnapshot {
    pub current: Option<MemorySample>,
    pub usage_percent: f64,
    pub trend: MemoryTrend,
    pub leak_suspected: bool,
    pub sample_count: usize,
}

/// Keeps a ring of memory samples from a `MemorySource`
pub struct MemoryMonitor {
    source: Arc<dyn MemorySource>,
    samples: Mutex<VecDeque<MemorySample>>,
}

impl MemoryMonitor {
    pub fn new(source: Arc<dyn MemorySource>) -> Self {
        Self {
            source,
            samples: Mutex::new(VecDeque::with_capacity(MAX_MEMORY_SAMPLES)),
        }
    }

    /// Monitor for the current process
    pub fn for_process() -> Self {
        Self::new(Arc::new(ProcessMemorySource))
    }

    pub fn sample(&self) -> Option<MemorySample> {
        self.sample_at(Utc::now())
    }

    /// Take a reading and append it to the ring
    pub fn sample_at(&self, now: Timestamp) -> Option<MemorySample> {
        let Some(reading) = self.source.read() else {
            debug!("Memory source returned no reading");
            return None;
        };
        let sample = MemorySample {
            used_bytes: reading.used_bytes,
            limit_bytes: reading.limit_bytes,
            timestamp: now,
        };

        let mut samples = lock(&self.samples);
        if samples.len() >= MAX_MEMORY_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(sample);
        Some(sample)
    }

    pub fn latest(&self) -> Option<MemorySample> {
        lock(&self.samples).back().copied()
    }

    pub fn samples(&self) -> Vec<MemorySample> {
        lock(&self.samples).iter().copied().collect()
    }

    /// Compare the mean of the last ten samples with the ten before them
    pub fn trend(&self) -> MemoryTrend {
        let samples = lock(&self.samples);
        trend_of(&samples)
    }

    /// Increasing trend while usage is above 80% of the limit
    pub fn is_leak_suspected(&self) -> bool {
        let samples = lock(&self.samples);
        leak_suspected(&samples)
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        let samples = lock(&self.samples);
        let current = samples.back().copied();
        MemorySnapshot {
            current,
            usage_percent: current.map(|s| s.usage_ratio() * 100.0).unwrap_or(0.0),
            trend: trend_of(&samples),
            leak_suspected: leak_suspected(&samples),
            sample_count: samples.len(),
        }
    }
}

fn trend_of(samples: &VecDeque<MemorySample>) -> MemoryTrend {
    if samples.len() < TREND_MIN_SAMPLES {
        return MemoryTrend::Unknown;
    }

    let mean = |range: std::ops::Range<usize>| {
        let len = range.len() as f64;
        range.map(|i| samples[i].used_bytes as f64).sum::<f64>() / len
    };
    let n = samples.len();
    let recent = mean(n - TREND_WINDOW..n);
    let baseline = mean(n - 2 * TREND_WINDOW..n - TREND_WINDOW);
    let band = baseline * TREND_BAND;

    if recent > baseline + band {
        MemoryTrend::Increasing
    } else if recent < baseline - band {
        MemoryTrend::Decreasing
    } else {
        MemoryTrend::Stable
    }
}

fn leak_suspected(samples: &VecDeque<MemorySample>) -> bool {
    let Some(current) = samples.back() else {
        return false;
    };
    current.usage_ratio() > LEAK_USAGE_RATIO && trend_of(samples) == MemoryTrend::Increasing
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    /// Source replaying a fixed sequence of used-byte values
    fn replaying(values: Vec<u64>, limit: u64) -> Arc<MockMemorySource> {
        let mut source = MockMemorySource::new();
        let mut values = values.into_iter();
        source.expect_read().returning(move || {
            values.next().map(|used_bytes| MemoryReading {
                used_bytes,
                limit_bytes: limit,
            })
        });
        Arc::new(source)
    }

    #[test]
    fn test_parse_proc_fields() {
        let status = "Name:\tvigil\nVmPeak:\t  20000 kB\nVmRSS:\t   1234 kB\n";
        assert_eq!(parse_kib_field(status, "VmRSS:"), Some(1234));
        assert_eq!(parse_kib_field(status, "VmSwap:"), None);
    }

    #[test]
    fn test_process_source_reads_something() {
        let reading = ProcessMemorySource.read();
        assert!(reading.map(|r| r.used_bytes > 0).unwrap_or(true));
    }

    #[test]
    fn test_ring_is_bounded() {
        let monitor = MemoryMonitor::new(replaying((0..150).collect(), 1000));
        for _ in 0..150 {
            monitor.sample();
        }
        let samples = monitor.samples();
        assert_eq!(samples.len(), MAX_MEMORY_SAMPLES);
        assert_eq!(samples[0].used_bytes, 50);
        assert_eq!(monitor.latest().unwrap().used_bytes, 149);
    }

    #[test]
    fn test_trend_needs_twenty_samples() {
        let monitor = MemoryMonitor::new(replaying((0..19).map(|i| i * GIB).collect(), 0));
        for _ in 0..19 {
            monitor.sample();
        }
        assert_eq!(monitor.trend(), MemoryTrend::Unknown);
    }

    #[test]
    fn test_trend_directions() {
        let flat = MemoryMonitor::new(replaying(vec![100; 20], 1000));
        let rising = MemoryMonitor::new(replaying((0..20).map(|i| 100 + i * 10).collect(), 1000));
        let falling = MemoryMonitor::new(replaying((0..20).map(|i| 400 - i * 10).collect(), 1000));
        for _ in 0..20 {
            flat.sample();
            rising.sample();
            falling.sample();
        }
        assert_eq!(flat.trend(), MemoryTrend::Stable);
        assert_eq!(rising.trend(), MemoryTrend::Increasing);
        assert_eq!(falling.trend(), MemoryTrend::Decreasing);
        assert!(!rising.is_leak_suspected());
    }

    #[test]
    fn test_leak_requires_high_usage_and_growth() {
        let limit = 10 * GIB;
        let values = (0..20).map(|i| 6 * GIB + i * (GIB / 8)).collect();
        let monitor = MemoryMonitor::new(replaying(values, limit));
        for _ in 0..20 {
            monitor.sample();
        }

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.trend, MemoryTrend::Increasing);
        assert!(snapshot.usage_percent > 80.0);
        assert!(snapshot.leak_suspected);
        assert_eq!(snapshot.sample_count, 20);
    }

    #[test]
    fn test_missing_reading_is_skipped() {
        let monitor = MemoryMonitor::new(replaying(vec![], 0));
        assert!(monitor.sample().is_none());
        assert!(monitor.snapshot().current.is_none());
    }
}
