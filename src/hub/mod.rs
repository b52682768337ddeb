/// Integration hub, reports and metric exposition
pub mod exposition;
#[allow(clippy::module_inception)]
pub mod hub;
pub mod report;

pub use exposition::{render_report, PrometheusWriter};
pub use hub::{HubEvent, MonitoringHub};
pub use report::{analyze_health, HealthAnalysis, HealthStatus, Insights, MonitoringReport};
