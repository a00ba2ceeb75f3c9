//! Agent events and the listener registry they are delivered through.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Selector used when subscribing to an [`EventSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    ConnectionStateChanged,
    TrustPingReceived,
    TrustPingResponseReceived,
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventCategory::ConnectionStateChanged => "connection_state_changed",
            EventCategory::TrustPingReceived => "trust_ping_received",
            EventCategory::TrustPingResponseReceived => "trust_ping_response_received",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a connection as reported by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Invited,
    Requested,
    Responded,
    Completed,
}

/// Events emitted by an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    ConnectionStateChanged {
        connection_id: String,
        invitation_id: Option<String>,
        state: ConnectionState,
        timestamp: DateTime<Utc>,
    },
    TrustPingReceived {
        connection_id: String,
        thread_id: String,
        timestamp: DateTime<Utc>,
    },
    TrustPingResponseReceived {
        connection_id: String,
        thread_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl AgentEvent {
    pub fn connection_state_changed(
        connection_id: impl Into<String>,
        invitation_id: Option<String>,
        state: ConnectionState,
    ) -> Self {
        Self::ConnectionStateChanged {
            connection_id: connection_id.into(),
            invitation_id,
            state,
            timestamp: Utc::now(),
        }
    }

    pub fn trust_ping_received(connection_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self::TrustPingReceived {
            connection_id: connection_id.into(),
            thread_id: thread_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn trust_ping_response_received(
        connection_id: impl Into<String>,
        thread_id: impl Into<String>,
    ) -> Self {
        Self::TrustPingResponseReceived {
            connection_id: connection_id.into(),
            thread_id: thread_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            AgentEvent::ConnectionStateChanged { .. } => EventCategory::ConnectionStateChanged,
            AgentEvent::TrustPingReceived { .. } => EventCategory::TrustPingReceived,
            AgentEvent::TrustPingResponseReceived { .. } => EventCategory::TrustPingResponseReceived,
        }
    }

    pub fn connection_id(&self) -> &str {
        match self {
            AgentEvent::ConnectionStateChanged { connection_id, .. }
            | AgentEvent::TrustPingReceived { connection_id, .. }
            | AgentEvent::TrustPingResponseReceived { connection_id, .. } => connection_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AgentEvent::ConnectionStateChanged { timestamp, .. }
            | AgentEvent::TrustPingReceived { timestamp, .. }
            | AgentEvent::TrustPingResponseReceived { timestamp, .. } => *timestamp,
        }
    }
}

/// Callback invoked synchronously for every matching event
pub type Listener = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// Handle returned by [`EventSource::on`], used to detach the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Subscription side of an agent's event stream.
///
/// Listeners run on the emitting task and must not block.
pub trait EventSource: Send + Sync {
    fn on(&self, category: EventCategory, listener: Listener) -> ListenerId;

    /// Detach a listener. Returns `false` if it was not attached.
    fn off(&self, category: EventCategory, id: ListenerId) -> bool;

    fn listener_count(&self, category: EventCategory) -> usize;
}

/// In-process [`EventSource`] with synchronous fan-out
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<EventCategory, Vec<(ListenerId, Listener)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every listener of its category. Returns how many
    /// listeners were called.
    pub fn emit(&self, event: AgentEvent) -> usize {
        let category = event.category();
        // Listeners may call off() while running, so call them unlocked.
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .get(&category)
            .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        trace!(%category, listeners = snapshot.len(), "emitting agent event");
        for listener in &snapshot {
            listener(&event);
        }
        snapshot.len()
    }
}

impl EventSource for EventBus {
    fn on(&self, category: EventCategory, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().entry(category).or_default().push((id, listener));
        debug!(%category, ?id, "listener attached");
        id
    }

    fn off(&self, category: EventCategory, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(entries) = listeners.get_mut(&category) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(&category);
        }
        if removed {
            debug!(%category, ?id, "listener detached");
        }
        removed
    }

    fn listener_count(&self, category: EventCategory) -> usize {
        self.listeners.lock().get(&category).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, Listener) {
        let count = Arc::new(AtomicUsize::new(0));
        let listener: Listener = {
            let count = count.clone();
            Arc::new(move |_event: &AgentEvent| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        (count, listener)
    }

    #[test]
    fn test_emit_reaches_only_matching_category() {
        let bus = EventBus::new();
        let (pings, ping_listener) = counter();
        let (states, state_listener) = counter();
        bus.on(EventCategory::TrustPingResponseReceived, ping_listener);
        bus.on(EventCategory::ConnectionStateChanged, state_listener);

        assert_eq!(bus.emit(AgentEvent::trust_ping_response_received("c1", "t1")), 1);
        assert_eq!(pings.load(Ordering::SeqCst), 1);
        assert_eq!(states.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_off_detaches_listener() {
        let bus = EventBus::new();
        let (count, listener) = counter();
        let id = bus.on(EventCategory::TrustPingReceived, listener);
        assert_eq!(bus.listener_count(EventCategory::TrustPingReceived), 1);

        assert!(bus.off(EventCategory::TrustPingReceived, id));
        assert!(!bus.off(EventCategory::TrustPingReceived, id));
        assert_eq!(bus.listener_count(EventCategory::TrustPingReceived), 0);

        bus.emit(AgentEvent::trust_ping_received("c1", "t1"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_can_detach_itself_during_emit() {
        let bus = Arc::new(EventBus::new());
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let listener: Listener = {
            let bus = bus.clone();
            let slot = slot.clone();
            Arc::new(move |event: &AgentEvent| {
                if let Some(id) = *slot.lock() {
                    bus.off(event.category(), id);
                }
            })
        };
        let id = bus.on(EventCategory::ConnectionStateChanged, listener);
        *slot.lock() = Some(id);

        bus.emit(AgentEvent::connection_state_changed("c1", None, ConnectionState::Completed));
        assert_eq!(bus.listener_count(EventCategory::ConnectionStateChanged), 0);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = AgentEvent::connection_state_changed("c1", Some("inv".into()), ConnectionState::Completed);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "connection_state_changed");
        assert_eq!(value["state"], "completed");
        assert_eq!(event.connection_id(), "c1");
    }
}
