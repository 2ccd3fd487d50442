//! Tool handlers for MCP server.
//!
//! This module implements the actual tool execution logic: resolving the
//! target instance and calling the workflow, the token cache or the
//! operation log.

use std::sync::Arc;

use prflow_core::{Error, Instance, InstanceRegistry, Result, Upstream};
use prflow_storage::{OperationLog, TokenCache};
use prflow_workflow::{coerce_draft, Workflow};
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use crate::protocol::{InstanceInfo, ToolCallResult, ToolDefinition};
use crate::tools::{ToolKind, ToolRegistry, DEFAULT_LOGS_LIMIT, MAX_LOGS_LIMIT};

/// Tool handler that executes tools against configured instances.
pub struct ToolHandler {
    instances: InstanceRegistry,
    tools: ToolRegistry,
    workflow: Workflow,
    tokens: Arc<TokenCache>,
    oplog: Arc<OperationLog>,
}

impl ToolHandler {
    /// Create a handler.
    ///
    /// `set_log_dir` is offered only if `oplog` has no log directory yet.
    pub fn new(
        instances: InstanceRegistry,
        upstream: Arc<dyn Upstream>,
        tokens: Arc<TokenCache>,
        oplog: Arc<OperationLog>,
    ) -> Result<Self> {
        let tools = ToolRegistry::new(&instances, oplog.log_dir().is_some())?;
        Ok(Self {
            instances,
            tools,
            workflow: Workflow::new(upstream, tokens.clone()),
            tokens,
            oplog,
        })
    }

    /// Get available tool definitions.
    pub fn available_tools(&self) -> Vec<ToolDefinition> {
        self.tools.definitions().to_vec()
    }

    /// Configured instances, active one first.
    pub fn instance_info(&self) -> Vec<InstanceInfo> {
        self.instances.iter().map(InstanceInfo::from).collect()
    }

    pub fn oplog(&self) -> &Arc<OperationLog> {
        &self.oplog
    }

    /// Execute a tool by name with arguments.
    ///
    /// Errors become JSON-RPC error envelopes; a failed pull request creation
    /// is a successful call with an error result.
    pub async fn execute(&self, name: &str, arguments: Option<Value>) -> Result<ToolCallResult> {
        let kind = self.tools.resolve(name)?;
        let args = match arguments {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(args)) => args,
            Some(_) => {
                return Err(Error::Validation(
                    "arguments must be an object".to_string(),
                ))
            }
        };

        // An unknown `repo` fails every tool before it touches any state.
        let instance = self.target(&args)?;
        tracing::debug!(tool = kind.base_name(), instance = %instance.key, "Executing tool");

        match kind {
            ToolKind::Pr => self.handle_pr(instance, &args).await,
            ToolKind::Token => self.handle_token(instance).await,
            ToolKind::Logs => self.handle_logs(&args),
            ToolKind::SetLogDir => self.handle_set_log_dir(&args),
        }
    }

    /// Target instance: `repo` when given, otherwise the active one.
    fn target(&self, args: &Map<String, Value>) -> Result<&Instance> {
        match args.get("repo") {
            None | Some(Value::Null) => Ok(self.instances.default_instance()),
            Some(Value::String(key)) => self.instances.resolve(key),
            Some(_) => Err(Error::Validation("repo must be a string".to_string())),
        }
    }

    async fn handle_pr(
        &self,
        instance: &Instance,
        args: &Map<String, Value>,
    ) -> Result<ToolCallResult> {
        let title = optional_str(args, "title")?;
        let body = optional_str(args, "body")?;
        let draft = coerce_draft(args.get("draft"));

        let outcome = self.workflow.run_pr(instance, title, body, draft).await?;
        let payload = outcome.to_value();
        if outcome.is_failure() {
            Ok(ToolCallResult::error(payload.to_string()))
        } else {
            Ok(ToolCallResult::json(&payload))
        }
    }

    async fn handle_token(&self, instance: &Instance) -> Result<ToolCallResult> {
        let cached = self.tokens.get(instance).await?;

        Ok(ToolCallResult::json(&json!({
            "instance": instance.key,
            "access_token": cached.token,
            "expires_in": cached.remaining(Instant::now()).as_secs(),
        })))
    }

    fn handle_logs(&self, args: &Map<String, Value>) -> Result<ToolCallResult> {
        let limit = bounded_integer(args, "limit", DEFAULT_LOGS_LIMIT, 1, MAX_LOGS_LIMIT)?;
        let offset = bounded_integer(args, "offset", 0, 0, usize::MAX)?;

        let entries = self.oplog.list(limit, offset);
        Ok(ToolCallResult::json(&json!({
            "total": self.oplog.len(),
            "limit": limit,
            "offset": offset,
            "entries": entries,
        })))
    }

    fn handle_set_log_dir(&self, args: &Map<String, Value>) -> Result<ToolCallResult> {
        let path = optional_str(args, "path")?
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .ok_or_else(|| Error::Validation("path is required".to_string()))?;

        let file = self.oplog.set_log_dir(path)?;
        Ok(ToolCallResult::json(&json!({
            "log_dir": path,
            "file": file.display().to_string(),
        })))
    }
}

fn optional_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.as_str())),
        Some(_) => Err(Error::Validation(format!("{} must be a string", key))),
    }
}

fn bounded_integer(
    args: &Map<String, Value>,
    key: &str,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize> {
    let value = match args.get(key) {
        None | Some(Value::Null) => return Ok(default),
        Some(value) => value,
    };

    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| (min..=max).contains(n))
        .ok_or_else(|| {
            if max == usize::MAX {
                Error::Validation(format!("{} must be an integer >= {}", key, min))
            } else {
                Error::Validation(format!(
                    "{} must be an integer between {} and {}",
                    key, min, max
                ))
            }
        })
}
