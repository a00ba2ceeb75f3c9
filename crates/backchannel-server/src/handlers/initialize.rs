use std::sync::Arc;

use async_trait::async_trait;
use backchannel_json_rpc_server::{
    HandlerResult, JsonRpcError, JsonRpcHandler, ParamsSchema, ParamsSchemaError, ParamsViolation,
    RequestParams,
};
use serde_json::{Value, json};
use tracing::info;

use crate::agent::AgentConfig;
use crate::context::ServerContext;

/// `initialize`: build, start and install the agent.
pub struct InitializeHandler {
    context: Arc<ServerContext>,
    schema: ParamsSchema,
}

impl InitializeHandler {
    pub const METHOD: &'static str = "initialize";

    pub fn new(context: Arc<ServerContext>) -> Result<Self, ParamsSchemaError> {
        let schema = ParamsSchema::new(json!({
            "type": ["object", "null"],
            "properties": {
                "label": {"type": "string", "minLength": 1},
                "endpoint": {"type": "string"},
                "mediation_url": {"type": "string"},
                "host": {"type": "string"},
                "port": {"type": "integer", "minimum": 0, "maximum": 65535}
            },
            "additionalProperties": false
        }))?;
        Ok(Self { context, schema })
    }
}

#[async_trait]
impl JsonRpcHandler for InitializeHandler {
    fn validate(&self, params: Option<&RequestParams>) -> Result<(), Vec<ParamsViolation>> {
        self.schema.validate(params)
    }

    async fn handle(&self, _method: &str, params: Option<RequestParams>) -> HandlerResult {
        let config = match params {
            Some(params) => params
                .parse::<AgentConfig>()
                .map_err(|e| JsonRpcError::invalid_params(None, Some(Value::String(e.to_string()))))?,
            None => AgentConfig::default(),
        };
        let label = config.label.clone();

        let agent = self.context.factory().create(config).map_err(JsonRpcError::from)?;
        agent.initialize().await.map_err(JsonRpcError::from)?;
        self.context.install_agent(agent);

        info!(%label, "agent initialized");
        Ok(json!({}))
    }
}
