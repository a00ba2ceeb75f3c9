//! The agent collaborator.
//!
//! An agent exposes asynchronous operations and an event stream. Completing an
//! operation does not mean the observable state transition has happened yet;
//! that is only visible on the stream returned by [`Agent::events`].

pub mod events;
pub mod loopback;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use events::{AgentEvent, ConnectionState, EventBus, EventCategory, EventSource, Listener, ListenerId};
pub use loopback::LoopbackAgent;

pub const DEFAULT_AGENT_LABEL: &str = "backchannel-agent";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent not initialized")]
    NotInitialized,

    #[error("agent operation failed: {0}")]
    Operation(String),

    #[error("unknown connection: {0}")]
    UnknownConnection(String),

    #[error("invalid invitation: {0}")]
    InvalidInvitation(String),
}

/// Settings an agent is built from, as received by `initialize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_label")]
    pub label: String,
    /// Public endpoint advertised in invitations
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub mediation_url: Option<String>,
    /// Inbound transport bind address
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_label() -> String {
    DEFAULT_AGENT_LABEL.to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            endpoint: None,
            mediation_url: None,
            host: None,
            port: None,
        }
    }
}

/// A connection as tracked by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: String,
    pub invitation_id: Option<String>,
    pub state: ConnectionState,
    pub their_label: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait Agent: Send + Sync {
    /// Event stream used by condition waits
    fn events(&self) -> Arc<dyn EventSource>;

    async fn initialize(&self) -> Result<(), AgentError>;

    /// Send a trust ping on a connection. Returns the ping's thread id.
    async fn send_ping(&self, connection_id: &str) -> Result<String, AgentError>;

    /// Accept an out-of-band invitation. The returned record is usually not
    /// yet `completed`.
    async fn receive_invitation(&self, invitation: &Value) -> Result<ConnectionRecord, AgentError>;

    async fn connection(&self, connection_id: &str) -> Result<ConnectionRecord, AgentError>;
}

/// Builds agents for `initialize`
pub trait AgentFactory: Send + Sync {
    fn create(&self, config: AgentConfig) -> Result<Arc<dyn Agent>, AgentError>;
}

impl<F> AgentFactory for F
where
    F: Fn(AgentConfig) -> Result<Arc<dyn Agent>, AgentError> + Send + Sync,
{
    fn create(&self, config: AgentConfig) -> Result<Arc<dyn Agent>, AgentError> {
        self(config)
    }
}

/// Factory producing [`LoopbackAgent`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackFactory;

impl AgentFactory for LoopbackFactory {
    fn create(&self, config: AgentConfig) -> Result<Arc<dyn Agent>, AgentError> {
        Ok(Arc::new(LoopbackAgent::new(config)))
    }
}

/// Read the `@id` of an out-of-band invitation.
pub fn invitation_id(invitation: &Value) -> Result<String, AgentError> {
    invitation
        .get("@id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AgentError::InvalidInvitation("missing \"@id\"".to_string()))
}
