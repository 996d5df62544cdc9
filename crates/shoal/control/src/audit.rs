//! Audit stream of committed mutations.

use tokio::sync::broadcast;

use shoal_types::{EventSeverity, EventSource, ShoalEvent, ShoalEventEnvelope, UnitId};

/// Channel capacity for the audit stream
const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Broadcasts audit events to any number of subscribers. Sending with no
/// subscriber is not an error.
#[derive(Clone)]
pub struct EventAggregator {
    tx: broadcast::Sender<ShoalEventEnvelope>,
}

impl EventAggregator {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShoalEventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn emit(
        &self,
        unit: &UnitId,
        source: EventSource,
        severity: EventSeverity,
        event: ShoalEvent,
    ) {
        let envelope = ShoalEventEnvelope::new(unit.clone(), source, severity, event);
        let _ = self.tx.send(envelope);
    }

    pub fn emit_info(&self, unit: &UnitId, source: EventSource, event: ShoalEvent) {
        self.emit(unit, source, EventSeverity::Info, event);
    }

    pub fn emit_warning(&self, unit: &UnitId, source: EventSource, event: ShoalEvent) {
        self.emit(unit, source, EventSeverity::Warning, event);
    }

    pub fn emit_error(&self, unit: &UnitId, source: EventSource, event: ShoalEvent) {
        self.emit(unit, source, EventSeverity::Error, event);
    }
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let events = EventAggregator::new();
        let mut rx = events.subscribe();
        assert_eq!(events.subscriber_count(), 1);

        let unit = UnitId::new("shoal/0");
        events.emit_info(
            &unit,
            EventSource::Membership,
            ShoalEvent::MembershipConverged { version: 3 },
        );
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.unit, unit);
        assert_eq!(envelope.event, ShoalEvent::MembershipConverged { version: 3 });
    }

    #[test]
    fn test_emit_without_subscribers() {
        let events = EventAggregator::new();
        events.emit_error(
            &UnitId::new("shoal/0"),
            EventSource::Control,
            ShoalEvent::EventFailed {
                event: "start".into(),
                reason: "boom".into(),
            },
        );
    }
}
