//! MCP server implementation.
//!
//! The server handles the MCP protocol lifecycle:
//! 1. Initialize - exchange capabilities
//! 2. Handle tool calls - execute tools against configured instances
//! 3. Shutdown - acknowledge, then stop after a grace delay
//!
//! Records are handled strictly one at a time in arrival order, and every
//! record is appended to the operation log exactly once.

use std::sync::Arc;
use std::time::Duration;

use prflow_core::Result;
use prflow_storage::{OperationLog, OperationLogEntry};
use serde::Serialize;
use serde_json::{json, Value};

use crate::handlers::ToolHandler;
use crate::protocol::{
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ServerCapabilities, ServerInfo, ToolCallParams, ToolsListResult, MCP_VERSION,
};
use crate::transport::{IncomingMessage, StdioTransport};

type RpcResult = std::result::Result<Value, JsonRpcError>;

/// Delay between acknowledging `shutdown` and stopping.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Method families answered with empty placeholder results.
const STUB_PREFIXES: [&str; 4] = ["prompts/", "resources/", "logging/", "roots/"];

/// Lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Terminated,
}

/// MCP server for prflow.
pub struct McpServer {
    handler: ToolHandler,
    oplog: Arc<OperationLog>,
    state: SessionState,
    shutdown_grace: Duration,
    /// Set once termination was requested
    exit_delay: Option<Duration>,
}

impl McpServer {
    /// Create a new MCP server.
    pub fn new(handler: ToolHandler) -> Self {
        let oplog = handler.oplog().clone();
        Self {
            handler,
            oplog,
            state: SessionState::Uninitialized,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            exit_delay: None,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the MCP server on stdin/stdout.
    pub async fn run(&mut self) -> Result<()> {
        self.serve(StdioTransport::stdio()).await
    }

    /// Serve one session until end of input, `shutdown` or `notifications/exit`.
    pub async fn serve(&mut self, mut transport: StdioTransport) -> Result<()> {
        tracing::info!(
            "Starting MCP server with {} tools",
            self.handler.available_tools().len()
        );

        loop {
            match transport.read_message().await {
                Ok(Some(msg)) => {
                    if let Some(resp) = self.handle_message(msg).await {
                        if let Err(e) = transport.write_response(&resp).await {
                            tracing::error!("Failed to write response: {}", e);
                            break;
                        }
                    }
                    if self.state == SessionState::Terminated {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!("EOF received, shutting down");
                    break;
                }
                Err(e) => {
                    tracing::error!("Transport error: {}", e);
                    break;
                }
            }
        }

        if let Some(delay) = self.exit_delay.take() {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        self.state = SessionState::Terminated;

        tracing::info!("MCP server stopped");
        Ok(())
    }

    /// Handle one incoming record, returning the response to send if any.
    pub async fn handle_message(&mut self, msg: IncomingMessage) -> Option<JsonRpcResponse> {
        match msg {
            IncomingMessage::Request(req) => {
                let resp = self.handle_request(&req).await;
                self.record(&req.method, req.params.as_ref(), Some(&resp));
                Some(resp)
            }
            IncomingMessage::Notification(notif) => {
                self.handle_notification(&notif.method);
                self.record(&notif.method, notif.params.as_ref(), None);
                None
            }
            IncomingMessage::Malformed { id, method, error } => {
                let resp = JsonRpcResponse::error(id, error);
                self.record(method.as_deref().unwrap_or("<invalid>"), None, Some(&resp));
                Some(resp)
            }
        }
    }

    fn record(&self, method: &str, params: Option<&Value>, resp: Option<&JsonRpcResponse>) {
        let result = resp.and_then(|r| r.result.as_ref());
        let error = resp
            .and_then(|r| r.error.as_ref())
            .and_then(|e| serde_json::to_value(e).ok());
        self.oplog
            .append(OperationLogEntry::new(method, params, result, error.as_ref()));
    }

    /// Handle a JSON-RPC request.
    async fn handle_request(&mut self, req: &JsonRpcRequest) -> JsonRpcResponse {
        tracing::debug!("Handling request: {} (id: {:?})", req.method, req.id);

        if self.state == SessionState::Uninitialized && req.method != "initialize" {
            tracing::debug!("Request '{}' before initialize", req.method);
        }

        match self.dispatch(req).await {
            Ok(result) => JsonRpcResponse::success(req.id.clone(), result),
            Err(error) => JsonRpcResponse::error(req.id.clone(), error),
        }
    }

    async fn dispatch(&mut self, req: &JsonRpcRequest) -> RpcResult {
        match req.method.as_str() {
            "initialize" => self.handle_initialize(req.params.clone()),
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(req.params.clone()).await,
            "ping" => Ok(json!({})),
            "shutdown" => {
                tracing::info!("Shutdown requested");
                self.terminate(self.shutdown_grace);
                Ok(json!({}))
            }
            method if is_stub(method) => Ok(stub_result(method)),
            method => {
                tracing::warn!("Unknown method: {}", method);
                Err(JsonRpcError::method_not_found(method))
            }
        }
    }

    /// Handle notifications (no response, even on failure).
    fn handle_notification(&mut self, method: &str) {
        match method {
            "notifications/initialized" | "initialized" => {
                tracing::info!("Client initialized");
            }
            "notifications/exit" => {
                tracing::info!("Exit notification received");
                self.terminate(Duration::ZERO);
            }
            "notifications/cancelled" => {
                tracing::debug!("Request cancelled by client");
            }
            _ => {
                tracing::debug!("Ignoring notification: {}", method);
            }
        }
    }

    fn terminate(&mut self, delay: Duration) {
        self.state = SessionState::Terminated;
        self.exit_delay = Some(delay);
    }

    /// Handle initialize request.
    fn handle_initialize(&mut self, params: Option<Value>) -> RpcResult {
        if self.state != SessionState::Uninitialized {
            return Err(JsonRpcError::invalid_request("Server already initialized"));
        }

        let params = match params {
            Some(params) => {
                serde_json::from_value::<InitializeParams>(params).unwrap_or_else(|e| {
                    tracing::warn!("Failed to parse initialize params: {}", e);
                    InitializeParams::default()
                })
            }
            None => InitializeParams::default(),
        };

        if let Some(client) = &params.client_info {
            tracing::info!(
                "Client: {} v{} (protocol: {})",
                client.name,
                client.version,
                params.protocol_version.as_deref().unwrap_or("unknown")
            );
        }

        self.state = SessionState::Initialized;

        to_value(InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: ServerCapabilities::negotiate(&params.capabilities),
            server_info: ServerInfo {
                name: "prflow".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        })
    }

    /// Handle tools/list request.
    fn handle_tools_list(&self) -> RpcResult {
        to_value(ToolsListResult {
            tools: self.handler.available_tools(),
            instances: self.handler.instance_info(),
        })
    }

    /// Handle tools/call request.
    async fn handle_tools_call(&self, params: Option<Value>) -> RpcResult {
        let params: ToolCallParams = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("Missing params")),
        };

        tracing::info!("Calling tool: {}", params.name);

        match self.handler.execute(&params.name, params.arguments).await {
            Ok(result) => to_value(result),
            Err(e) => {
                tracing::warn!("Tool {} failed: {}", params.name, e);
                Err(JsonRpcError::from(&e))
            }
        }
    }
}

fn to_value<T: Serialize>(value: T) -> RpcResult {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
}

fn is_stub(method: &str) -> bool {
    STUB_PREFIXES.iter().any(|prefix| method.starts_with(prefix))
}

fn stub_result(method: &str) -> Value {
    match method {
        "prompts/list" => json!({ "prompts": [] }),
        "resources/list" => json!({ "resources": [] }),
        "resources/templates/list" => json!({ "resourceTemplates": [] }),
        "roots/list" => json!({ "roots": [] }),
        _ => json!({}),
    }
}
