/// Alert rule engine, actions and dispatch
pub mod actions;
pub mod dispatcher;
pub mod engine;
pub mod rules;

pub use actions::{AlertAction, LogAction, WebhookAction, WebhookFormat};
pub use dispatcher::{AlertDispatcher, DispatchMode};
pub use engine::{Alert, AlertEngine, AlertEvent};
pub use rules::{AlertCondition, AlertRule, LOG_ACTION};
