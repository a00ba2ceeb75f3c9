//! Business method handlers and their error codes.

pub mod initialize;
pub mod invitation;
pub mod ping;

use std::sync::Arc;

use backchannel_json_rpc_server::{JsonRpcDispatcher, JsonRpcError, ParamsSchemaError};
use serde_json::{Value, json};

use crate::agent::AgentError;
use crate::condition::WaitError;
use crate::context::ServerContext;

pub use initialize::InitializeHandler;
pub use invitation::ReceiveInvitationHandler;
pub use ping::SendPingHandler;

/// Handler-defined JSON-RPC error codes, all inside the server error range
/// (`SERVER_ERROR_START..=SERVER_ERROR_END`).
pub mod codes {
    pub const AGENT_NOT_INITIALIZED: i64 = -32001;
    pub const CONDITION_TIMEOUT: i64 = -32002;
    pub const AGENT_OPERATION_FAILED: i64 = -32003;
}

/// Register `initialize`, `sendPing` and `receiveInvitation`.
pub fn register_default_handlers(
    dispatcher: &JsonRpcDispatcher,
    context: Arc<ServerContext>,
) -> Result<(), ParamsSchemaError> {
    dispatcher.register_method(InitializeHandler::METHOD, InitializeHandler::new(context.clone())?);
    dispatcher.register_method(SendPingHandler::METHOD, SendPingHandler::new(context.clone())?);
    dispatcher.register_method(
        ReceiveInvitationHandler::METHOD,
        ReceiveInvitationHandler::new(context)?,
    );
    Ok(())
}

impl From<AgentError> for JsonRpcError {
    fn from(error: AgentError) -> Self {
        match error {
            AgentError::NotInitialized => {
                JsonRpcError::application(codes::AGENT_NOT_INITIALIZED, "Agent not initialized", None)
            }
            other => JsonRpcError::application(
                codes::AGENT_OPERATION_FAILED,
                "Agent operation failed",
                Some(Value::String(other.to_string())),
            ),
        }
    }
}

impl From<WaitError> for JsonRpcError {
    fn from(error: WaitError) -> Self {
        match error {
            WaitError::Timeout { after } => JsonRpcError::application(
                codes::CONDITION_TIMEOUT,
                "Condition wait timed out",
                Some(json!({"timeout_ms": after.as_millis() as u64})),
            ),
            WaitError::Trigger(agent_error) => agent_error.into(),
            other @ WaitError::AlreadyWaiting => {
                JsonRpcError::internal_error(None, Some(Value::String(other.to_string())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backchannel_json_rpc_server::JsonRpcErrorCode;
    use std::time::Duration;

    #[test]
    fn test_agent_errors_map_to_business_codes() {
        let error = JsonRpcError::from(AgentError::NotInitialized);
        assert_eq!(error.code(), codes::AGENT_NOT_INITIALIZED);
        assert!(error.data.is_none());

        let error = JsonRpcError::from(AgentError::UnknownConnection("c9".into()));
        assert_eq!(error.code(), codes::AGENT_OPERATION_FAILED);
        assert_eq!(error.data, Some(json!("unknown connection: c9")));
    }

    #[test]
    fn test_wait_errors_map_to_business_codes() {
        let error = JsonRpcError::from(WaitError::Timeout {
            after: Duration::from_millis(50),
        });
        assert_eq!(error.code(), codes::CONDITION_TIMEOUT);
        assert_eq!(error.data, Some(json!({"timeout_ms": 50})));

        let error = JsonRpcError::from(WaitError::Trigger(AgentError::NotInitialized));
        assert_eq!(error.code(), codes::AGENT_NOT_INITIALIZED);
    }

    #[test]
    fn test_business_codes_are_server_errors() {
        for code in [
            codes::AGENT_NOT_INITIALIZED,
            codes::CONDITION_TIMEOUT,
            codes::AGENT_OPERATION_FAILED,
        ] {
            assert!(JsonRpcErrorCode::from_code(code).is_server_error(), "{code}");
        }
    }
}
