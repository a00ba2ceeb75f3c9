use std::sync::Arc;

use async_trait::async_trait;
use backchannel_json_rpc_server::{
    HandlerResult, JsonRpcError, JsonRpcHandler, ParamsSchema, ParamsSchemaError, ParamsViolation,
    RequestParams,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::agent::{AgentEvent, EventCategory};
use crate::condition::await_condition;
use crate::context::ServerContext;

#[derive(Debug, Deserialize)]
struct SendPingParams {
    connection_id: String,
}

/// `sendPing`: send a trust ping and wait for the peer's response.
pub struct SendPingHandler {
    context: Arc<ServerContext>,
    schema: ParamsSchema,
}

impl SendPingHandler {
    pub const METHOD: &'static str = "sendPing";

    pub fn new(context: Arc<ServerContext>) -> Result<Self, ParamsSchemaError> {
        let schema = ParamsSchema::new(json!({
            "type": "object",
            "properties": {
                "connection_id": {"type": "string", "minLength": 1}
            },
            "required": ["connection_id"]
        }))?;
        Ok(Self { context, schema })
    }
}

#[async_trait]
impl JsonRpcHandler for SendPingHandler {
    fn validate(&self, params: Option<&RequestParams>) -> Result<(), Vec<ParamsViolation>> {
        self.schema.validate(params)
    }

    async fn handle(&self, _method: &str, params: Option<RequestParams>) -> HandlerResult {
        let SendPingParams { connection_id } = params
            .map(RequestParams::parse::<SendPingParams>)
            .transpose()
            .map_err(|e| JsonRpcError::invalid_params(None, Some(Value::String(e.to_string()))))?
            .ok_or_else(|| JsonRpcError::invalid_params(None, None))?;
        let agent = self.context.agent().map_err(JsonRpcError::from)?;

        let wanted = connection_id.clone();
        let trigger_agent = agent.clone();
        let trigger_connection = connection_id.clone();
        // Several pings may be in flight on one connection; only the response
        // on this ping's thread counts.
        let condition = self
            .context
            .condition(
                &agent,
                EventCategory::TrustPingResponseReceived,
                move |event: &AgentEvent| event.connection_id() == wanted,
                move || {
                    let agent = trigger_agent.clone();
                    let connection_id = trigger_connection.clone();
                    async move { agent.send_ping(&connection_id).await }
                },
            )
            .with_correlation(|sent_thread: &String, event: &AgentEvent| {
                matches!(
                    event,
                    AgentEvent::TrustPingResponseReceived { thread_id, .. } if thread_id == sent_thread
                )
            });
        let observed = await_condition(condition).await.map_err(JsonRpcError::from)?;

        debug!(%connection_id, thread_id = %observed.output, "trust ping answered");
        Ok(json!({
            "connection_id": connection_id,
            "thread_id": observed.output,
        }))
    }
}
