//! Event sink trait and implementations.

use super::ProvisionEvent;
use parking_lot::RwLock;
use tracing::{debug, info, warn, Level};

/// Trait for sinks that receive run lifecycle events.
///
/// Emission must never fail or block the run; sinks swallow their own
/// errors.
pub trait EventSink: Send + Sync {
    /// Receives one event.
    fn emit(&self, event: &ProvisionEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: &ProvisionEvent) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event: &ProvisionEvent) {
        let event_type = event.event_type();
        let data = serde_json::to_string(event).unwrap_or_default();

        // Failures are surfaced at warn regardless of the configured level.
        if matches!(event, ProvisionEvent::StageFailed { .. } | ProvisionEvent::RunCancelled { .. }) {
            warn!(event_type = %event_type, event_data = %data, "Event: {}", event_type);
            return;
        }

        if self.level == Level::DEBUG {
            debug!(event_type = %event_type, event_data = %data, "Event: {}", event_type);
        } else {
            info!(event_type = %event_type, event_data = %data, "Event: {}", event_type);
        }
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<ProvisionEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<ProvisionEvent> {
        self.events.read().clone()
    }

    /// Returns the event type names in emission order.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.read().iter().map(ProvisionEvent::event_type).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<ProvisionEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &ProvisionEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ReportStatus;

    fn started() -> ProvisionEvent {
        ProvisionEvent::StageStarted {
            stage: "create-project".to_string(),
        }
    }

    #[test]
    fn test_noop_and_logging_sinks_do_not_panic() {
        NoOpEventSink.emit(&started());
        LoggingEventSink::default().emit(&started());
        LoggingEventSink::debug().emit(&ProvisionEvent::StageFailed {
            stage: "create-project".to_string(),
            error_kind: crate::errors::ErrorKind::Permanent,
            message: "401".to_string(),
        });
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(&started());
        sink.emit(&ProvisionEvent::RunFinished {
            status: ReportStatus::Complete,
        });

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.event_types(), vec!["stage.started", "run.finished"]);
        assert_eq!(sink.events_of_type("stage.").len(), 1);
    }
}
