//! Log transports: where flushed entries end up
//!
//! The logger hands each transport only the entries at or above the
//! transport's own minimum level, one at a time, then calls `flush`. Transports
//! are shared behind `Arc` and use interior mutability.

use crate::error::TransportError;
use crate::events::lock;
use crate::logging::entry::{LogEntry, LogLevel};
use crate::monitoring::PipelineStats;
use log::{debug, error, warn};
use reqwest::Client;
use std::io::Write;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// A destination for flushed log entries
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Entries below this level are never passed to `log`
    fn min_level(&self) -> LogLevel;

    fn is_enabled(&self) -> bool {
        true
    }

    fn log(&self, entry: &LogEntry) -> Result<(), TransportError>;

    fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Flush and release resources; called once when the logger closes
    fn close(&self) -> Result<(), TransportError> {
        self.flush()
    }
}

/// Writes one text line per entry
pub struct ConsoleTransport {
    min_level: LogLevel,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleTransport {
    /// Console transport writing to stderr
    pub fn new(min_level: LogLevel) -> Self {
        Self::with_writer(min_level, Box::new(std::io::stderr()))
    }

    pub fn with_writer(min_level: LogLevel, writer: Box<dyn Write + Send>) -> Self {
        Self {
            min_level,
            writer: Mutex::new(writer),
        }
    }
}

impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }

    fn log(&self, entry: &LogEntry) -> Result<(), TransportError> {
        writeln!(lock(&self.writer), "{}", entry.to_line())?;
        Ok(())
    }

    fn flush(&self) -> Result<(), TransportError> {
        lock(&self.writer).flush()?;
        Ok(())
    }
}

type BatchCallback = Box<dyn Fn(Vec<LogEntry>) -> Result<(), TransportError> + Send + Sync>;

/// Collects entries and hands them to a callback in batches
///
/// The callback runs when the batch reaches `batch_size` and on every
/// `flush`. An empty batch never invokes it.
pub struct BufferedTransport {
    name: String,
    min_level: LogLevel,
    batch_size: usize,
    batch: Mutex<Vec<LogEntry>>,
    on_flush: BatchCallback,
}

impl BufferedTransport {
    pub fn new<F>(name: impl Into<String>, min_level: LogLevel, batch_size: usize, on_flush: F) -> Self
    where
        F: Fn(Vec<LogEntry>) -> Result<(), TransportError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            min_level,
            batch_size: batch_size.max(1),
            batch: Mutex::new(Vec::new()),
            on_flush: Box::new(on_flush),
        }
    }

    /// Entries collected but not yet handed to the callback
    pub fn pending(&self) -> usize {
        lock(&self.batch).len()
    }
}

impl Transport for BufferedTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }

    fn log(&self, entry: &LogEntry) -> Result<(), TransportError> {
        let full = {
            let mut batch = lock(&self.batch);
            batch.push(entry.clone());
            batch.len() >= self.batch_size
        };
        if full {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), TransportError> {
        let batch = std::mem::take(&mut *lock(&self.batch));
        if batch.is_empty() {
            return Ok(());
        }
        (self.on_flush)(batch)
    }
}

/// POSTs batches of entries as a JSON array to an HTTP endpoint
///
/// Delivery happens on a dedicated worker thread that owns a current-thread
/// tokio runtime, so `flush` only enqueues. Delivery failures are logged and
/// counted in the pipeline stats.
pub struct HttpTransport {
    endpoint: String,
    min_level: LogLevel,
    pending: Mutex<Vec<LogEntry>>,
    sender: Mutex<Option<Sender<Vec<LogEntry>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HttpTransport {
    /// Create the transport and start its delivery thread
    ///
    /// # Errors
    ///
    /// Returns `TransportError::HttpError` if the HTTP client cannot be built
    /// and `TransportError::IoError` if the runtime or thread cannot be
    /// created.
    pub fn new(
        endpoint: impl Into<String>,
        min_level: LogLevel,
        stats: Arc<PipelineStats>,
    ) -> Result<Self, TransportError> {
        let endpoint = endpoint.into();
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (sender, receiver) = mpsc::channel::<Vec<LogEntry>>();
        let url = endpoint.clone();
        let worker = std::thread::Builder::new()
            .name("vigil-log-http".to_string())
            .spawn(move || {
                debug!("HTTP log transport thread started for {}", url);
                while let Ok(batch) = receiver.recv() {
                    let count = batch.len();
                    let result = runtime.block_on(Self::post(&client, &url, &batch));
                    match result {
                        Ok(()) => debug!("Delivered {} log entries to {}", count, url),
                        Err(e) => {
                            stats.record_transport_failure();
                            warn!("Failed to deliver {} log entries to {}: {}", count, url, e);
                        }
                    }
                }
                debug!("HTTP log transport thread stopped");
            })?;

        Ok(Self {
            endpoint,
            min_level,
            pending: Mutex::new(Vec::new()),
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(client: &Client, url: &str, batch: &[LogEntry]) -> Result<(), TransportError> {
        let response = client.post(url).json(batch).send().await?;
        if !response.status().is_success() {
            return Err(TransportError::DeliveryFailed(format!(
                "endpoint responded with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }

    fn is_enabled(&self) -> bool {
        lock(&self.sender).is_some()
    }

    fn log(&self, entry: &LogEntry) -> Result<(), TransportError> {
        if lock(&self.sender).is_none() {
            return Err(TransportError::Closed(self.endpoint.clone()));
        }
        lock(&self.pending).push(entry.clone());
        Ok(())
    }

    fn flush(&self) -> Result<(), TransportError> {
        let batch = std::mem::take(&mut *lock(&self.pending));
        if batch.is_empty() {
            return Ok(());
        }

        match lock(&self.sender).as_ref() {
            Some(sender) => sender
                .send(batch)
                .map_err(|_| TransportError::Closed(self.endpoint.clone())),
            None => Err(TransportError::Closed(self.endpoint.clone())),
        }
    }

    fn close(&self) -> Result<(), TransportError> {
        let flushed = self.flush();
        drop(lock(&self.sender).take());

        if let Some(handle) = lock(&self.worker).take() {
            if let Err(e) = handle.join() {
                error!("HTTP log transport thread failed to join: {:?}", e);
            }
        }
        flushed
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        if lock(&self.worker).is_some() {
            let _ = self.close();
        }
    }
}
