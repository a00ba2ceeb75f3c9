use std::sync::Arc;

use async_trait::async_trait;
use backchannel_json_rpc_server::{
    HandlerResult, JsonRpcError, JsonRpcHandler, ParamsSchema, ParamsSchemaError, ParamsViolation,
    RequestParams,
};
use serde_json::json;
use tracing::debug;

use crate::agent::{AgentEvent, ConnectionState, EventCategory, invitation_id};
use crate::condition::await_condition;
use crate::context::ServerContext;

/// `receiveInvitation`: accept an out-of-band invitation and wait until the
/// resulting connection is `completed`.
pub struct ReceiveInvitationHandler {
    context: Arc<ServerContext>,
    schema: ParamsSchema,
}

impl ReceiveInvitationHandler {
    pub const METHOD: &'static str = "receiveInvitation";

    pub fn new(context: Arc<ServerContext>) -> Result<Self, ParamsSchemaError> {
        let schema = ParamsSchema::new(json!({
            "type": "object",
            "properties": {
                "invitation": {
                    "type": "object",
                    "properties": {"@id": {"type": "string", "minLength": 1}},
                    "required": ["@id"]
                }
            },
            "required": ["invitation"]
        }))?;
        Ok(Self { context, schema })
    }
}

#[async_trait]
impl JsonRpcHandler for ReceiveInvitationHandler {
    fn validate(&self, params: Option<&RequestParams>) -> Result<(), Vec<ParamsViolation>> {
        self.schema.validate(params)
    }

    async fn handle(&self, _method: &str, params: Option<RequestParams>) -> HandlerResult {
        let invitation = params
            .as_ref()
            .and_then(|p| p.get("invitation"))
            .cloned()
            .ok_or_else(|| JsonRpcError::invalid_params(None, Some(json!("missing invitation"))))?;
        let invitation_id = invitation_id(&invitation).map_err(JsonRpcError::from)?;
        let agent = self.context.agent().map_err(JsonRpcError::from)?;

        // The invitation id is known up front, so the predicate can match on
        // it before the connection id exists.
        let wanted = invitation_id.clone();
        let trigger_agent = agent.clone();
        let observed = await_condition(self.context.condition(
            &agent,
            EventCategory::ConnectionStateChanged,
            move |event: &AgentEvent| match event {
                AgentEvent::ConnectionStateChanged {
                    invitation_id: Some(id),
                    state: ConnectionState::Completed,
                    ..
                } => *id == wanted,
                _ => false,
            },
            move || {
                let agent = trigger_agent.clone();
                let invitation = invitation.clone();
                async move { agent.receive_invitation(&invitation).await }
            },
        ))
        .await
        .map_err(JsonRpcError::from)?;

        let record = agent
            .connection(observed.event.connection_id())
            .await
            .map_err(JsonRpcError::from)?;
        debug!(%invitation_id, connection_id = %record.id, "invitation accepted");
        Ok(serde_json::to_value(record)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentConfig, AgentError, LoopbackAgent, LoopbackFactory};
    use backchannel_json_rpc_server::JsonRpcErrorCode;
    use std::time::Duration;

    async fn initialized(timeout: Duration) -> (Arc<ServerContext>, ReceiveInvitationHandler) {
        let context = Arc::new(ServerContext::new(Arc::new(LoopbackFactory)).with_wait_timeout(timeout));
        let agent = context.factory().create(AgentConfig::default()).unwrap();
        agent.initialize().await.unwrap();
        context.install_agent(agent);
        let handler = ReceiveInvitationHandler::new(context.clone()).unwrap();
        (context, handler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_completed_connection() {
        let (context, handler) = initialized(Duration::from_secs(5)).await;
        let params = RequestParams::from_value(json!({
            "invitation": {"@id": "inv-7", "label": "faber"}
        }));
        assert!(handler.validate(params.as_ref()).is_ok());

        let result = handler.handle(ReceiveInvitationHandler::METHOD, params).await.unwrap();
        assert_eq!(result["state"], "completed");
        assert_eq!(result["invitation_id"], "inv-7");
        assert_eq!(result["their_label"], "faber");

        let events = context.agent().unwrap().events();
        assert_eq!(events.listener_count(EventCategory::ConnectionStateChanged), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_peer_is_slow() {
        let context = Arc::new(
            ServerContext::new(Arc::new(|config: AgentConfig| -> Result<Arc<dyn Agent>, AgentError> {
                Ok(Arc::new(
                    LoopbackAgent::new(config).with_peer_delay(Duration::from_secs(60)),
                ))
            }))
            .with_wait_timeout(Duration::from_millis(50)),
        );
        let agent = context.factory().create(AgentConfig::default()).unwrap();
        agent.initialize().await.unwrap();
        context.install_agent(agent.clone());
        let handler = ReceiveInvitationHandler::new(context).unwrap();

        let params = RequestParams::from_value(json!({"invitation": {"@id": "slow"}}));
        let error = handler
            .handle(ReceiveInvitationHandler::METHOD, params)
            .await
            .unwrap_err()
            .downcast::<JsonRpcError>()
            .unwrap();
        assert_eq!(error.kind, JsonRpcErrorCode::Application(-32002));
        assert_eq!(agent.events().listener_count(EventCategory::ConnectionStateChanged), 0);
    }

    #[test]
    fn test_schema_requires_invitation_id() {
        let context = Arc::new(ServerContext::new(Arc::new(LoopbackFactory)));
        let handler = ReceiveInvitationHandler::new(context).unwrap();
        let params = RequestParams::from_value(json!({"invitation": {"label": "x"}}));
        let violations = handler.validate(params.as_ref()).unwrap_err();
        assert_eq!(violations[0].path, "/invitation");
        assert!(handler.validate(None).is_err());
    }
}
