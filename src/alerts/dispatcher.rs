//! Fire-and-forget delivery of fired alerts to their actions
//!
//! In background mode every (alert, action) pair is queued to a dedicated
//! worker thread so a slow or failing sink never blocks `track_error`. Inline
//! mode delivers on the calling thread and exists for tests and for hosts that
//! already run tracking off their critical path.

use crate::alerts::actions::AlertAction;
use crate::alerts::engine::{Alert, AlertEvent};
use crate::events::{lock, EventEmitter};
use crate::monitoring::PipelineStats;
use log::{debug, error, info, warn};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Where alert actions run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// On a dedicated worker thread
    #[default]
    Background,
    /// On the thread that tracked the error
    Inline,
}

/// One unit of dispatch work
struct DispatchJob {
    alert: Alert,
    action_name: String,
    action: Arc<dyn AlertAction>,
}

/// Routes fired alerts to their actions and accounts for failures
pub struct AlertDispatcher {
    sender: Mutex<Option<Sender<DispatchJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    events: Arc<EventEmitter<AlertEvent>>,
    stats: Arc<PipelineStats>,
}

impl AlertDispatcher {
    /// Create a dispatcher in the given mode
    ///
    /// If the background worker cannot be spawned the dispatcher degrades to
    /// inline delivery.
    pub fn new(
        mode: DispatchMode,
        events: Arc<EventEmitter<AlertEvent>>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let dispatcher = Self {
            sender: Mutex::new(None),
            worker: Mutex::new(None),
            events,
            stats,
        };

        if mode == DispatchMode::Background {
            dispatcher.spawn_worker();
        }

        dispatcher
    }

    fn spawn_worker(&self) {
        let (sender, receiver) = mpsc::channel::<DispatchJob>();
        let events = Arc::clone(&self.events);
        let stats = Arc::clone(&self.stats);

        let spawned = std::thread::Builder::new()
            .name("vigil-alert-dispatch".to_string())
            .spawn(move || {
                debug!("Alert dispatch thread started");
                while let Ok(job) = receiver.recv() {
                    Self::run_job(job, &events, &stats);
                }
                debug!("Alert dispatch thread stopped");
            });

        match spawned {
            Ok(handle) => {
                *lock(&self.sender) = Some(sender);
                *lock(&self.worker) = Some(handle);
            }
            Err(e) => {
                warn!(
                    "Failed to spawn alert dispatch thread, delivering inline: {}",
                    e
                );
            }
        }
    }

    /// Deliver an alert to each named action
    ///
    /// `actions` pairs each channel name from the rule with the registered
    /// action, or `None` when nothing is registered under that name.
    pub fn dispatch(&self, alert: &Alert, actions: Vec<(String, Option<Arc<dyn AlertAction>>)>) {
        for (action_name, action) in actions {
            let Some(action) = action else {
                let reason = format!("no alert action registered under '{}'", action_name);
                self.report_failure(alert, &action_name, reason);
                continue;
            };

            let job = DispatchJob {
                alert: alert.clone(),
                action_name,
                action,
            };

            let sender = lock(&self.sender).clone();
            match sender {
                Some(sender) => {
                    if let Err(mpsc::SendError(job)) = sender.send(job) {
                        warn!("Alert dispatch thread is gone, delivering inline");
                        Self::run_job(job, &self.events, &self.stats);
                    }
                }
                None => Self::run_job(job, &self.events, &self.stats),
            }
        }
    }

    fn run_job(job: DispatchJob, events: &EventEmitter<AlertEvent>, stats: &PipelineStats) {
        match job.action.dispatch(&job.alert) {
            Ok(()) => {
                stats.record_dispatch_result(true);
                debug!(
                    "Dispatched alert {} to action '{}'",
                    job.alert.id, job.action_name
                );
            }
            Err(e) => {
                error!(
                    "Failed to dispatch alert {} to action '{}': {}",
                    job.alert.id, job.action_name, e
                );
                stats.record_dispatch_result(false);
                events.emit(&AlertEvent::DispatchFailed {
                    alert_id: job.alert.id.clone(),
                    rule_id: job.alert.rule_id.clone(),
                    action: job.action_name,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn report_failure(&self, alert: &Alert, action_name: &str, reason: String) {
        error!("Failed to dispatch alert {}: {}", alert.id, reason);
        self.stats.record_dispatch_result(false);
        self.events.emit(&AlertEvent::DispatchFailed {
            alert_id: alert.id.clone(),
            rule_id: alert.rule_id.clone(),
            action: action_name.to_string(),
            reason,
        });
    }

    /// Stop accepting work and wait for queued dispatches to finish
    pub fn shutdown(&self) {
        let sender = lock(&self.sender).take();
        drop(sender);

        if let Some(handle) = lock(&self.worker).take() {
            if let Err(e) = handle.join() {
                error!("Alert dispatch thread failed to join: {:?}", e);
            } else {
                info!("Alert dispatcher stopped");
            }
        }
    }
}

impl Drop for AlertDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
