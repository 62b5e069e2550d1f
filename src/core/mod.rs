pub mod clock;
pub mod engine;
pub mod observer;
pub mod services;

pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::{BudgetEngine, DailyReport, RefreshReport};
pub use observer::{EngineEvent, EventKind, Observer, RecordingObserver, TracingObserver};
