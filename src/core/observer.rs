//! Out-of-band sink for engine activity and failures.

use std::{
    collections::BTreeMap,
    fmt,
    sync::Mutex,
};

use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SchedulerPassSkipped,
    TransactionMaterialized,
    RecurringCompleted,
    BudgetRecomputed,
    BudgetCarriedForward,
    NotificationRaised,
    PersistenceFailed,
    RetrySucceeded,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SchedulerPassSkipped => "scheduler_pass_skipped",
            EventKind::TransactionMaterialized => "transaction_materialized",
            EventKind::RecurringCompleted => "recurring_completed",
            EventKind::BudgetRecomputed => "budget_recomputed",
            EventKind::BudgetCarriedForward => "budget_carried_forward",
            EventKind::NotificationRaised => "notification_raised",
            EventKind::PersistenceFailed => "persistence_failed",
            EventKind::RetrySucceeded => "retry_succeeded",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, EventKind::PersistenceFailed)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub kind: EventKind,
    pub data: BTreeMap<String, String>,
}

impl EngineEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

/// Receives every event the engine publishes. Implementations must not panic; the engine
/// never changes control flow based on observer behaviour.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

/// Default observer forwarding events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&self, event: &EngineEvent) {
        match event.kind {
            EventKind::PersistenceFailed => {
                warn!(event = %event.kind, data = ?event.data, "engine write failed")
            }
            EventKind::BudgetRecomputed | EventKind::SchedulerPassSkipped => {
                debug!(event = %event.kind, data = ?event.data)
            }
            _ => info!(event = %event.kind, data = ?event.data),
        }
    }
}

/// Captures events in memory for inspection.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.lock().clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.lock().iter().filter(|event| event.kind == kind).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<EngineEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Observer for RecordingObserver {
    fn on_event(&self, event: &EngineEvent) {
        self.lock().push(event.clone());
    }
}
