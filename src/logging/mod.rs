/// Structured log pipeline: entries, filters, transports and the logger
pub mod entry;
pub mod filters;
pub mod pipeline;
pub mod transports;

pub use entry::{Fields, LogEntry, LogError, LogLevel, LogMetadata};
pub use filters::{ComponentFilter, FnFilter, LevelFilter, LogFilter, SamplingFilter};
pub use pipeline::{Logger, LoggerEvent, WeakLogger};
pub use transports::{BufferedTransport, ConsoleTransport, HttpTransport, Transport};
