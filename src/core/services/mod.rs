pub mod forecast_service;
pub mod notification_service;
pub mod scheduler_service;

pub use forecast_service::ForecastEngine;
pub use notification_service::{EvaluationReport, NotificationEngine};
pub use scheduler_service::{RecurringScheduler, SchedulerReport};

use crate::errors::EngineError;

use super::observer::{EngineEvent, EventKind, Observer};

/// Publishes a failed write to the observer. Control flow is left to the caller.
pub(crate) fn report_failure(observer: &dyn Observer, err: &EngineError) {
    let mut event = EngineEvent::new(EventKind::PersistenceFailed).with("error", err);
    if let EngineError::Persistence { key, .. } = err {
        event = event.with("key", key);
    }
    observer.on_event(&event);
}
