//! In-process stand-in for a real agent.
//!
//! Keeps connection records in memory and, after a short delay, emits the
//! events a remote peer would cause: connection progress up to `completed`
//! and trust ping responses. There is no networking and no cryptography.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::events::{AgentEvent, ConnectionState, EventBus, EventSource};
use super::{Agent, AgentConfig, AgentError, ConnectionRecord, invitation_id};

pub const DEFAULT_PEER_DELAY: Duration = Duration::from_millis(25);

type Connections = Arc<Mutex<HashMap<String, ConnectionRecord>>>;

pub struct LoopbackAgent {
    config: AgentConfig,
    bus: Arc<EventBus>,
    connections: Connections,
    initialized: AtomicBool,
    peer_delay: Duration,
}

impl LoopbackAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            bus: Arc::new(EventBus::new()),
            connections: Arc::new(Mutex::new(HashMap::new())),
            initialized: AtomicBool::new(false),
            peer_delay: DEFAULT_PEER_DELAY,
        }
    }

    /// How long the simulated peer takes to react
    pub fn with_peer_delay(mut self, delay: Duration) -> Self {
        self.peer_delay = delay;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    fn ensure_initialized(&self) -> Result<(), AgentError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(AgentError::NotInitialized)
        }
    }

    fn progress_connection(&self, connection_id: String) {
        let bus = self.bus.clone();
        let connections = self.connections.clone();
        let delay = self.peer_delay;
        tokio::spawn(async move {
            for state in [ConnectionState::Responded, ConnectionState::Completed] {
                tokio::time::sleep(delay).await;
                let invitation_id = {
                    let mut connections = connections.lock();
                    let Some(record) = connections.get_mut(&connection_id) else {
                        return;
                    };
                    record.state = state;
                    record.invitation_id.clone()
                };
                debug!(%connection_id, ?state, "loopback connection progressed");
                bus.emit(AgentEvent::connection_state_changed(
                    connection_id.clone(),
                    invitation_id,
                    state,
                ));
            }
        });
    }
}

#[async_trait]
impl Agent for LoopbackAgent {
    fn events(&self) -> Arc<dyn EventSource> {
        self.bus.clone()
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        self.initialized.store(true, Ordering::Release);
        info!(
            label = %self.config.label,
            endpoint = ?self.config.endpoint,
            mediation_url = ?self.config.mediation_url,
            "loopback agent initialized"
        );
        Ok(())
    }

    async fn send_ping(&self, connection_id: &str) -> Result<String, AgentError> {
        self.ensure_initialized()?;
        let state = self
            .connections
            .lock()
            .get(connection_id)
            .map(|record| record.state)
            .ok_or_else(|| AgentError::UnknownConnection(connection_id.to_string()))?;
        if state != ConnectionState::Completed {
            return Err(AgentError::Operation(format!(
                "connection {connection_id} is not ready ({state:?})"
            )));
        }

        let thread_id = Uuid::new_v4().to_string();
        let bus = self.bus.clone();
        let delay = self.peer_delay;
        let (connection_id, reply_thread) = (connection_id.to_string(), thread_id.clone());
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            bus.emit(AgentEvent::trust_ping_response_received(connection_id, reply_thread));
        });
        Ok(thread_id)
    }

    async fn receive_invitation(&self, invitation: &Value) -> Result<ConnectionRecord, AgentError> {
        self.ensure_initialized()?;
        let invitation_id = invitation_id(invitation)?;
        let record = ConnectionRecord {
            id: Uuid::new_v4().to_string(),
            invitation_id: Some(invitation_id),
            state: ConnectionState::Requested,
            their_label: invitation.get("label").and_then(Value::as_str).map(str::to_string),
            created_at: Utc::now(),
        };
        self.connections.lock().insert(record.id.clone(), record.clone());
        debug!(connection_id = %record.id, "loopback accepted invitation");
        self.progress_connection(record.id.clone());
        Ok(record)
    }

    async fn connection(&self, connection_id: &str) -> Result<ConnectionRecord, AgentError> {
        self.connections
            .lock()
            .get(connection_id)
            .cloned()
            .ok_or_else(|| AgentError::UnknownConnection(connection_id.to_string()))
    }
}
