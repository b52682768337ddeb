/// Configuration loading and validation
#[allow(clippy::module_inception)]
pub mod config;

pub use config::{
    AlertsConfig, ErrorsConfig, LoggingConfig, MonitoringConfig, PerformanceConfig, WiringConfig,
};
