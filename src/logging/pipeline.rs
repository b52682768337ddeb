//! Structured logger: filter chain, buffer and flush policy
//!
//! A `Logger` is a thin handle over a shared `LoggerCore` plus a metadata
//! overlay. `with_context` produces child handles that share the core's
//! buffer, filters and transports.

use crate::config::LoggingConfig;
use crate::error::TransportError;
use crate::events::{lock, EventEmitter};
use crate::logging::entry::{Fields, LogEntry, LogError, LogLevel, LogMetadata};
use crate::logging::filters::{ComponentFilter, LevelFilter, LogFilter, SamplingFilter};
use crate::logging::transports::{ConsoleTransport, HttpTransport, Transport};
use crate::monitoring::PipelineStats;
use crate::tracking::ErrorSeverity;
use chrono::Utc;
use log::{debug, info, warn};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Events published by the logger
#[derive(Debug, Clone)]
pub enum LoggerEvent {
    /// An entry passed the filter chain and was buffered
    Entry(LogEntry),
    /// A non-empty buffer was delivered to the transports
    Flushed { count: usize },
    /// A transport failed while receiving a batch
    TransportError { transport: String, reason: String },
}

struct LoggerCore {
    enabled: bool,
    level: Mutex<LevelFilter>,
    base: Mutex<LogMetadata>,
    filters: Mutex<Vec<Arc<dyn LogFilter>>>,
    sampling: SamplingFilter,
    buffer: Mutex<Vec<LogEntry>>,
    buffer_size: usize,
    flush_interval: Duration,
    transports: Mutex<Vec<Arc<dyn Transport>>>,
    flush_lock: Mutex<()>,
    closed: AtomicBool,
    events: EventEmitter<LoggerEvent>,
    stats: Arc<PipelineStats>,
}

/// Handle to the log pipeline
#[derive(Clone)]
pub struct Logger {
    core: Arc<LoggerCore>,
    context: LogMetadata,
}

/// Non-owning handle to a logger, for event handlers wired between components
#[derive(Clone)]
pub struct WeakLogger {
    core: Weak<LoggerCore>,
    context: LogMetadata,
}

impl WeakLogger {
    pub fn upgrade(&self) -> Option<Logger> {
        self.core.upgrade().map(|core| Logger {
            core,
            context: self.context.clone(),
        })
    }
}

impl Logger {
    /// Create a logger without transports
    ///
    /// Level, sampling rate, buffer size and component lists come from
    /// `config`; transports are added with `add_transport`.
    pub fn new(config: &LoggingConfig, base: LogMetadata, stats: Arc<PipelineStats>) -> Self {
        let mut filters: Vec<Arc<dyn LogFilter>> = Vec::new();
        let components = ComponentFilter::new(
            config.allow_components.iter().cloned(),
            config.block_components.iter().cloned(),
        );
        if !components.is_empty() {
            filters.push(Arc::new(components));
        }

        let core = LoggerCore {
            enabled: config.enabled,
            level: Mutex::new(LevelFilter::new(config.level)),
            base: Mutex::new(base),
            filters: Mutex::new(filters),
            sampling: SamplingFilter::new(config.sample_rate),
            buffer: Mutex::new(Vec::new()),
            buffer_size: config.buffer_size.max(1),
            flush_interval: Duration::from_millis(config.flush_interval_ms),
            transports: Mutex::new(Vec::new()),
            flush_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            events: EventEmitter::new(),
            stats,
        };

        Self {
            core: Arc::new(core),
            context: LogMetadata::default(),
        }
    }

    /// Create a logger with the console and HTTP transports named in `config`
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` if the HTTP transport cannot be started.
    pub fn from_config(
        config: &LoggingConfig,
        base: LogMetadata,
        stats: Arc<PipelineStats>,
    ) -> Result<Self, TransportError> {
        let logger = Self::new(config, base, Arc::clone(&stats));

        if config.console {
            let level = config.console_level.unwrap_or(config.level);
            logger.add_transport(Arc::new(ConsoleTransport::new(level)));
        }
        if let Some(ref endpoint) = config.http_endpoint {
            let level = config.http_level.unwrap_or(config.level);
            logger.add_transport(Arc::new(HttpTransport::new(endpoint.clone(), level, stats)?));
        }

        Ok(logger)
    }

    /// Child logger sharing this logger's core, with `context` overlaid
    pub fn with_context(&self, context: LogMetadata) -> Logger {
        Logger {
            core: Arc::clone(&self.core),
            context: self.context.merge(&context),
        }
    }

    /// Overlay metadata onto the shared base context
    pub fn set_context(&self, context: LogMetadata) {
        let mut base = lock(&self.core.base);
        *base = base.merge(&context);
    }

    /// Edit the shared base context in place
    pub fn update_context<F>(&self, update: F)
    where
        F: FnOnce(&mut LogMetadata),
    {
        update(&mut lock(&self.core.base));
    }

    pub fn downgrade(&self) -> WeakLogger {
        WeakLogger {
            core: Arc::downgrade(&self.core),
            context: self.context.clone(),
        }
    }

    pub fn context(&self) -> LogMetadata {
        lock(&self.core.base).merge(&self.context)
    }

    pub fn set_level(&self, level: LogLevel) {
        *lock(&self.core.level) = LevelFilter::new(level);
    }

    pub fn level(&self) -> LogLevel {
        lock(&self.core.level).min_level()
    }

    /// Append a filter; filters run in insertion order
    pub fn add_filter(&self, filter: Arc<dyn LogFilter>) {
        lock(&self.core.filters).push(filter);
    }

    pub fn add_transport(&self, transport: Arc<dyn Transport>) {
        debug!(
            "Adding log transport '{}' (min level {})",
            transport.name(),
            transport.min_level()
        );
        lock(&self.core.transports).push(transport);
    }

    /// Remove every transport with the given name and close it
    pub fn remove_transport(&self, name: &str) -> bool {
        let removed: Vec<Arc<dyn Transport>> = {
            let mut transports = lock(&self.core.transports);
            let (removed, kept): (Vec<_>, Vec<_>) = transports
                .drain(..)
                .partition(|transport| transport.name() == name);
            *transports = kept;
            removed
        };

        for transport in &removed {
            if let Err(e) = transport.close() {
                warn!("Failed to close log transport '{}': {}", name, e);
            }
        }
        !removed.is_empty()
    }

    pub fn transport_names(&self) -> Vec<String> {
        lock(&self.core.transports)
            .iter()
            .map(|transport| transport.name().to_string())
            .collect()
    }

    pub fn events(&self) -> &EventEmitter<LoggerEvent> {
        &self.core.events
    }

    pub fn flush_interval(&self) -> Duration {
        self.core.flush_interval
    }

    /// Entries buffered and not yet flushed
    pub fn buffered(&self) -> usize {
        lock(&self.core.buffer).len()
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::SeqCst)
    }

    /// Record an entry
    ///
    /// Returns the buffered entry, or `None` if the filter chain rejected it
    /// or the logger is disabled or closed.
    pub fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        fields: Option<Fields>,
        error: Option<LogError>,
    ) -> Option<LogEntry> {
        self.log_with(level, message.into(), fields, error, None)
    }

    fn log_with(
        &self,
        level: LogLevel,
        message: String,
        fields: Option<Fields>,
        error: Option<LogError>,
        extra: Option<LogMetadata>,
    ) -> Option<LogEntry> {
        let core = &self.core;
        if !core.enabled || self.is_closed() {
            return None;
        }

        let mut metadata = lock(&core.base).merge(&self.context);
        if let Some(extra) = extra {
            metadata = metadata.merge(&extra);
        }

        let mut entry = LogEntry::new(level, message, Utc::now());
        entry.fields = fields.unwrap_or_default();
        entry.metadata = metadata;
        entry.error = error;

        if !self.accepts(&entry) {
            core.stats.record_log_filtered();
            return None;
        }

        core.stats.record_log_accepted(level);
        let buffered = {
            let mut buffer = lock(&core.buffer);
            buffer.push(entry.clone());
            buffer.len()
        };
        core.events.emit(&LoggerEvent::Entry(entry.clone()));

        if level.is_error() || buffered >= core.buffer_size {
            self.flush();
        }
        Some(entry)
    }

    fn accepts(&self, entry: &LogEntry) -> bool {
        let level = *lock(&self.core.level);
        if !level.allows(entry) {
            return false;
        }
        let filters = lock(&self.core.filters).clone();
        if !filters.iter().all(|filter| filter.allows(entry)) {
            return false;
        }
        self.core.sampling.allows(entry)
    }

    pub fn debug(&self, message: impl Into<String>, fields: Option<Fields>) -> Option<LogEntry> {
        self.log(LogLevel::Debug, message, fields, None)
    }

    pub fn info(&self, message: impl Into<String>, fields: Option<Fields>) -> Option<LogEntry> {
        self.log(LogLevel::Info, message, fields, None)
    }

    pub fn warn(&self, message: impl Into<String>, fields: Option<Fields>) -> Option<LogEntry> {
        self.log(LogLevel::Warn, message, fields, None)
    }

    pub fn error(
        &self,
        message: impl Into<String>,
        error: Option<LogError>,
        fields: Option<Fields>,
    ) -> Option<LogEntry> {
        self.log(LogLevel::Error, message, fields, error)
    }

    pub fn fatal(
        &self,
        message: impl Into<String>,
        error: Option<LogError>,
        fields: Option<Fields>,
    ) -> Option<LogEntry> {
        self.log(LogLevel::Fatal, message, fields, error)
    }

    /// Log the outcome of a named operation with its duration
    ///
    /// Successful operations log at info, failures at error.
    pub fn log_operation(
        &self,
        operation: &str,
        duration: Duration,
        success: bool,
        fields: Option<Fields>,
    ) -> Option<LogEntry> {
        let duration_ms = duration.as_secs_f64() * 1000.0;
        let (level, message) = if success {
            (LogLevel::Info, format!("{} completed in {:.1}ms", operation, duration_ms))
        } else {
            (LogLevel::Error, format!("{} failed after {:.1}ms", operation, duration_ms))
        };
        let extra = LogMetadata::default()
            .with_action(operation)
            .with_duration_ms(duration_ms)
            .with_tag("operation");
        self.log_with(level, message, fields, None, Some(extra))
    }

    /// Log a measured value; warns when it exceeds `threshold`
    pub fn log_performance(
        &self,
        metric: &str,
        value: f64,
        unit: &str,
        threshold: Option<f64>,
    ) -> Option<LogEntry> {
        let exceeded = threshold.is_some_and(|t| value > t);
        let level = if exceeded { LogLevel::Warn } else { LogLevel::Info };

        let mut fields = Fields::new();
        fields.insert("metric".to_string(), json!(metric));
        fields.insert("value".to_string(), json!(value));
        fields.insert("unit".to_string(), json!(unit));
        if let Some(t) = threshold {
            fields.insert("threshold".to_string(), json!(t));
        }

        let message = if exceeded {
            format!("{} = {}{} exceeds threshold", metric, value, unit)
        } else {
            format!("{} = {}{}", metric, value, unit)
        };
        let extra = LogMetadata::default().with_tag("performance");
        self.log_with(level, message, Some(fields), None, Some(extra))
    }

    /// Log a security-relevant event; high and critical severities log at error
    pub fn log_security(
        &self,
        event: &str,
        severity: ErrorSeverity,
        fields: Option<Fields>,
    ) -> Option<LogEntry> {
        let level = if severity >= ErrorSeverity::High {
            LogLevel::Error
        } else {
            LogLevel::Warn
        };
        let mut fields = fields.unwrap_or_default();
        fields.insert("severity".to_string(), json!(severity.as_str()));

        let extra = LogMetadata::default().with_action(event).with_tag("security");
        self.log_with(level, format!("Security event: {}", event), Some(fields), None, Some(extra))
    }

    pub fn log_user_action(&self, action: &str, fields: Option<Fields>) -> Option<LogEntry> {
        let extra = LogMetadata::default().with_action(action).with_tag("user-action");
        self.log_with(LogLevel::Info, format!("User action: {}", action), fields, None, Some(extra))
    }

    /// Log an outbound API call; 5xx logs at error, 4xx at warn
    pub fn log_api_call(
        &self,
        method: &str,
        url: &str,
        status: u16,
        duration: Duration,
    ) -> Option<LogEntry> {
        let level = match status {
            500..=u16::MAX => LogLevel::Error,
            400..=499 => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        let duration_ms = duration.as_secs_f64() * 1000.0;

        let mut fields = Fields::new();
        fields.insert("method".to_string(), json!(method));
        fields.insert("url".to_string(), json!(url));
        fields.insert("status".to_string(), json!(status));

        let extra = LogMetadata::default()
            .with_action("api_call")
            .with_duration_ms(duration_ms)
            .with_tag("api");
        self.log_with(
            level,
            format!("{} {} -> {} ({:.1}ms)", method, url, status, duration_ms),
            Some(fields),
            None,
            Some(extra),
        )
    }

    /// Deliver the buffered entries to every enabled transport
    ///
    /// Returns the number of entries taken from the buffer. Concurrent
    /// flushes are serialised so batches reach transports in order.
    pub fn flush(&self) -> usize {
        let core = &self.core;
        let _guard = lock(&core.flush_lock);

        let batch = std::mem::take(&mut *lock(&core.buffer));
        if batch.is_empty() {
            return 0;
        }

        let transports = lock(&core.transports).clone();
        for transport in transports.iter().filter(|t| t.is_enabled()) {
            let min_level = transport.min_level();
            let result = batch
                .iter()
                .filter(|entry| entry.level >= min_level)
                .try_for_each(|entry| transport.log(entry))
                .and_then(|()| transport.flush());

            if let Err(e) = result {
                self.report_transport_error(transport.name(), &e);
            }
        }

        let count = batch.len();
        core.stats.record_flush(count);
        core.events.emit(&LoggerEvent::Flushed { count });
        count
    }

    fn report_transport_error(&self, name: &str, error: &TransportError) {
        warn!("Log transport '{}' failed: {}", name, error);
        self.core.stats.record_transport_failure();
        self.core.events.emit(&LoggerEvent::TransportError {
            transport: name.to_string(),
            reason: error.to_string(),
        });
    }

    /// Flush, close every transport and reject further entries
    pub fn close(&self) {
        if self.core.closed.load(Ordering::SeqCst) {
            return;
        }
        self.flush();
        self.core.closed.store(true, Ordering::SeqCst);

        let transports = lock(&self.core.transports).clone();
        for transport in &transports {
            if let Err(e) = transport.close() {
                self.report_transport_error(transport.name(), &e);
            }
        }
        info!("Logger closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::filters::FnFilter;
    use crate::logging::transports::BufferedTransport;

    type Sink = Arc<Mutex<Vec<LogEntry>>>;

    fn config() -> LoggingConfig {
        LoggingConfig {
            console: false,
            level: LogLevel::Debug,
            ..LoggingConfig::default()
        }
    }

    /// Logger with one collecting transport at `min_level`
    fn logger_with_sink(config: &LoggingConfig, min_level: LogLevel) -> (Logger, Sink) {
        let logger = Logger::new(config, LogMetadata::default(), Arc::new(PipelineStats::new()));
        let sink: Sink = Arc::new(Mutex::new(Vec::new()));
        let target = Arc::clone(&sink);
        logger.add_transport(Arc::new(BufferedTransport::new(
            "memory",
            min_level,
            usize::MAX,
            move |batch| {
                target.lock().unwrap().extend(batch);
                Ok(())
            },
        )));
        (logger, sink)
    }

    #[test]
    fn test_buffer_size_triggers_flush_in_order() {
        let mut config = config();
        config.buffer_size = 100;
        let (logger, sink) = logger_with_sink(&config, LogLevel::Debug);
        let (_id, events) = logger.events().channel();

        for i in 0..150 {
            logger.info(format!("entry {}", i), None);
        }
        assert_eq!(sink.lock().unwrap().len(), 100);
        assert_eq!(logger.buffered(), 50);

        assert_eq!(logger.flush(), 50);
        assert_eq!(logger.flush(), 0);

        let flushes: Vec<usize> = events
            .try_iter()
            .filter_map(|event| match event {
                LoggerEvent::Flushed { count } => Some(count),
                _ => None,
            })
            .collect();
        assert_eq!(flushes, vec![100, 50]);

        let messages: Vec<String> = sink.lock().unwrap().iter().map(|e| e.message.clone()).collect();
        let expected: Vec<String> = (0..150).map(|i| format!("entry {}", i)).collect();
        assert_eq!(messages, expected);
    }

    #[test]
    fn test_warn_level_never_delivers_debug_or_info() {
        let mut config = config();
        config.level = LogLevel::Warn;
        let (logger, sink) = logger_with_sink(&config, LogLevel::Debug);

        assert!(logger.debug("d", None).is_none());
        assert!(logger.info("i", None).is_none());
        assert!(logger.warn("w", None).is_some());
        logger.flush();

        let levels: Vec<LogLevel> = sink.lock().unwrap().iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![LogLevel::Warn]);
        assert_eq!(logger.core.stats.snapshot().logs_filtered, 2);
    }

    #[test]
    fn test_set_level_applies_to_later_entries() {
        let (logger, _sink) = logger_with_sink(&config(), LogLevel::Debug);
        assert!(logger.info("before", None).is_some());

        logger.set_level(LogLevel::Error);
        assert_eq!(logger.level(), LogLevel::Error);
        assert!(logger.warn("dropped", None).is_none());
        assert!(logger.error("kept", None, None).is_some());

        logger.set_level(LogLevel::Debug);
        assert!(logger.debug("back", None).is_some());
        assert_eq!(logger.core.stats.snapshot().logs_filtered, 1);
    }

    #[test]
    fn test_error_flushes_within_the_call() {
        let (logger, sink) = logger_with_sink(&config(), LogLevel::Debug);

        logger.info("context", None);
        assert!(sink.lock().unwrap().is_empty());

        logger.error("boom", Some(LogError::new("TypeError", "x is undefined")), None);
        let delivered = sink.lock().unwrap();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[1].error.as_ref().unwrap().name, "TypeError");
        assert_eq!(logger.buffered(), 0);
    }

    #[test]
    fn test_transport_min_level_is_respected() {
        let (logger, errors_only) = logger_with_sink(&config(), LogLevel::Error);
        logger.info("ignored by transport", None);
        logger.fatal("down", None, None);

        let delivered = errors_only.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].level, LogLevel::Fatal);
    }

    #[test]
    fn test_child_logger_overlays_context() {
        let (logger, sink) = logger_with_sink(&config(), LogLevel::Debug);
        logger.set_context(LogMetadata {
            service: Some("web".to_string()),
            ..LogMetadata::default()
        });

        let child = logger.with_context(LogMetadata::component("checkout"));
        let grandchild = child.with_context(LogMetadata::default().with_tag("payment"));
        grandchild.info("charged", None);
        logger.info("root", None);
        logger.flush();

        let delivered = sink.lock().unwrap();
        assert_eq!(delivered[0].metadata.component.as_deref(), Some("checkout"));
        assert_eq!(delivered[0].metadata.service.as_deref(), Some("web"));
        assert_eq!(delivered[0].metadata.tags, vec!["payment".to_string()]);
        assert!(delivered[1].metadata.component.is_none());
    }

    #[test]
    fn test_user_filters_and_sampling() {
        let mut config = config();
        config.sample_rate = 0.0;
        let (logger, sink) = logger_with_sink(&config, LogLevel::Debug);
        logger.add_filter(Arc::new(FnFilter::new("drop-secrets", |entry: &LogEntry| {
            !entry.message.contains("password")
        })));

        assert!(logger.info("sampled away", None).is_none());
        assert!(logger.error("password reset failed", None, None).is_none());
        assert!(logger.error("checkout failed", None, None).is_some());

        assert_eq!(sink.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_failing_transport_does_not_affect_others() {
        let (logger, sink) = logger_with_sink(&config(), LogLevel::Debug);
        logger.add_transport(Arc::new(BufferedTransport::new(
            "broken",
            LogLevel::Debug,
            1,
            |_| Err(TransportError::DeliveryFailed("refused".to_string())),
        )));
        let (_id, events) = logger.events().channel();

        logger.error("boom", None, None);

        assert_eq!(sink.lock().unwrap().len(), 1);
        assert!(events.try_iter().any(|event| matches!(
            event,
            LoggerEvent::TransportError { ref transport, .. } if transport == "broken"
        )));
        assert_eq!(logger.core.stats.snapshot().transport_failures, 1);
    }

    #[test]
    fn test_helpers_set_levels_and_metadata() {
        let (logger, sink) = logger_with_sink(&config(), LogLevel::Debug);

        logger.log_operation("sync", Duration::from_millis(20), true, None);
        logger.log_api_call("GET", "/api/orders", 503, Duration::from_millis(120));
        logger.log_security("brute_force", ErrorSeverity::Critical, None);
        logger.log_user_action("add_to_cart", None);
        logger.log_performance("render", 250.0, "ms", Some(100.0));
        logger.flush();

        let delivered = sink.lock().unwrap();
        assert_eq!(delivered[0].level, LogLevel::Info);
        assert_eq!(delivered[0].metadata.action.as_deref(), Some("sync"));
        assert_eq!(delivered[1].level, LogLevel::Error);
        assert_eq!(delivered[1].fields["status"], json!(503));
        assert_eq!(delivered[2].level, LogLevel::Error);
        assert!(delivered[2].metadata.tags.contains(&"security".to_string()));
        assert_eq!(delivered[3].metadata.action.as_deref(), Some("add_to_cart"));
        assert_eq!(delivered[4].level, LogLevel::Warn);
    }

    #[test]
    fn test_remove_transport_and_close() {
        let (logger, sink) = logger_with_sink(&config(), LogLevel::Debug);
        assert_eq!(logger.transport_names(), vec!["memory".to_string()]);

        logger.info("before close", None);
        logger.close();
        assert!(logger.is_closed());
        assert_eq!(sink.lock().unwrap().len(), 1);
        assert!(logger.info("after close", None).is_none());

        assert!(logger.remove_transport("memory"));
        assert!(!logger.remove_transport("memory"));
    }
}
