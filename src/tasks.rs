//! Periodic background tasks that stop as a unit
//!
//! Each task runs on its own named thread and waits on a shutdown channel with
//! `recv_timeout`; the timeout doubles as the tick interval.

use log::{debug, error, info};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

struct Task {
    name: String,
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// A set of periodic worker threads
#[derive(Default)]
pub struct TaskGroup {
    tasks: Vec<Task>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `tick` every `interval` on a thread named `name`
    ///
    /// The first tick happens one interval after spawning.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from `std::thread::Builder::spawn`.
    pub fn spawn_periodic<F>(
        &mut self,
        name: &str,
        interval: Duration,
        mut tick: F,
    ) -> std::io::Result<()>
    where
        F: FnMut() + Send + 'static,
    {
        let (shutdown, receiver) = mpsc::channel::<()>();
        let thread_name = name.to_string();

        let handle = std::thread::Builder::new()
            .name(format!("vigil-{}", name))
            .spawn(move || {
                debug!("Task '{}' started (every {:?})", thread_name, interval);
                loop {
                    match receiver.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => tick(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Task '{}' stopped", thread_name);
            })?;

        self.tasks.push(Task {
            name: name.to_string(),
            shutdown,
            handle,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.tasks.iter().map(|task| task.name.clone()).collect()
    }

    /// Signal every task, then wait for all of them to exit
    pub fn shutdown(&mut self) {
        if self.tasks.is_empty() {
            return;
        }

        for task in &self.tasks {
            // A task that already exited has dropped its receiver
            let _ = task.shutdown.send(());
        }

        let count = self.tasks.len();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.handle.join() {
                error!("Task '{}' failed to join: {:?}", task.name, e);
            }
        }
        info!("Stopped {} background task(s)", count);
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_periodic_task_ticks_until_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        let mut group = TaskGroup::new();
        group
            .spawn_periodic("ticker", Duration::from_millis(10), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(group.names(), vec!["ticker".to_string()]);

        std::thread::sleep(Duration::from_millis(100));
        group.shutdown();
        let after_shutdown = ticks.load(Ordering::SeqCst);
        assert!(after_shutdown >= 2);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after_shutdown);
        assert!(group.is_empty());
    }

    #[test]
    fn test_shutdown_does_not_wait_for_long_intervals() {
        let mut group = TaskGroup::new();
        for name in ["a", "b", "c"] {
            group
                .spawn_periodic(name, Duration::from_secs(3600), || {})
                .unwrap();
        }
        assert_eq!(group.len(), 3);

        let started = Instant::now();
        group.shutdown();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
