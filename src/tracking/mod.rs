/// Error classification, fingerprinting, grouping and retention
pub mod classifier;
pub mod fingerprint;
pub mod record;
pub mod store;
pub mod tracker;

pub use classifier::{Classification, DefaultClassifier, ErrorClassifier};
pub use fingerprint::fingerprint;
pub use record::{ContextPatch, ErrorContext, ErrorSeverity, ErrorType, RawError, TrackedError};
pub use store::ErrorStore;
pub use tracker::{ErrorMetrics, ErrorTracker, HourlyBucket, TrackerEvent};
