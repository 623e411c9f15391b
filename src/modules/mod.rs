//! Cross-cutting services module
//!
//! Harvest events and the metrics fed by them.

pub mod events;
pub mod metrics;

// Re-export commonly used types
pub use events::{
    AttemptEvent, EventDispatcher, EventHandler, HarvestEvent, LoggingHandler, MetricsHandler,
    PersistEvent, ProgressEvent, RotationEvent, RotationReason, RoundEvent, SessionEvent,
    WorkerDoneEvent,
};
pub use metrics::{GlobalStats, MetricsCollector, MetricsSnapshot, WorkerStats};
