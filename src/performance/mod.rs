/// Performance metrics, Web Vitals, memory monitoring and budgets
pub mod budget;
pub mod collector;
pub mod memory;
pub mod vitals;

pub use budget::{BudgetEvaluator, BudgetSeverity, PerformanceAlert, PerformanceBudget};
pub use collector::{
    MetricCategory, MetricOptions, NavigationTiming, PerformanceCollector, PerformanceEvent,
    PerformanceMetric,
};
pub use memory::{
    MemoryMonitor, MemoryReading, MemorySample, MemorySnapshot, MemorySource, MemoryTrend,
    ProcessMemorySource,
};
pub use vitals::{Rating, VitalsMetric, WebVital};
