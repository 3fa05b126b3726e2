//! Execution Monitoring
//!
//! Observability hooks the executor reports through while a run progresses.
//!
//! # Components
//!
//! - [`WorkflowMonitor`]: timeline and metrics contract
//! - [`TimelineMonitor`]: in-memory timeline with Gantt charts
//! - [`Notifier`]: delivery of end-of-run notifications

pub mod notification;
pub mod timeline;

use serde_json::Value;
use uuid::Uuid;

use crate::workflow::WorkflowExecution;

pub use notification::{LogNotifier, Notification, NotificationError, Notifier};
pub use timeline::{EventType, TimelineEvent, TimelineMonitor};

/// Receives every state transition of a run.
///
/// Implementations must not fail the run: errors are theirs to log.
pub trait WorkflowMonitor: Send + Sync {
    fn record_timeline_event(
        &self,
        execution_id: Uuid,
        step_id: Option<&str>,
        event_type: EventType,
        payload: Value,
    );

    /// Called once a run has finished.
    fn update_metrics(&self, execution: &WorkflowExecution);
}
