//! State shared by the business handlers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;

use crate::agent::{Agent, AgentError, AgentEvent, AgentFactory, EventCategory};
use crate::condition::{ConditionConfig, DEFAULT_WAIT_TIMEOUT};

/// Handed to every handler when it is registered.
///
/// Holds the live agent (absent until `initialize` succeeds), the factory
/// used to build it and the default condition-wait timeout.
pub struct ServerContext {
    agent: RwLock<Option<Arc<dyn Agent>>>,
    factory: Arc<dyn AgentFactory>,
    wait_timeout: Duration,
}

impl ServerContext {
    pub fn new(factory: Arc<dyn AgentFactory>) -> Self {
        Self {
            agent: RwLock::new(None),
            factory,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    pub fn factory(&self) -> &dyn AgentFactory {
        self.factory.as_ref()
    }

    /// The live agent, or [`AgentError::NotInitialized`].
    pub fn agent(&self) -> Result<Arc<dyn Agent>, AgentError> {
        self.agent.read().clone().ok_or(AgentError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.agent.read().is_some()
    }

    /// Install (or replace) the live agent.
    pub fn install_agent(&self, agent: Arc<dyn Agent>) {
        if self.agent.write().replace(agent).is_some() {
            info!("replaced running agent");
        }
    }

    /// Condition wait against `agent`'s events using the context timeout.
    pub fn condition<T, P, F, Fut>(
        &self,
        agent: &Arc<dyn Agent>,
        category: EventCategory,
        predicate: P,
        trigger: F,
    ) -> ConditionConfig<T>
    where
        P: Fn(&AgentEvent) -> bool + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, AgentError>> + Send + 'static,
    {
        ConditionConfig::new(agent.events(), category, predicate, trigger).with_timeout(self.wait_timeout)
    }
}
