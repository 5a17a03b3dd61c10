pub mod cursor_stdio;
pub mod dispatch;
pub mod http;
pub mod normalize;
pub mod prompts;
pub mod registry;
pub mod resources;
pub mod runtime;
pub mod subscriptions;
pub mod tools;

use async_trait::async_trait;
use mcp_rust_sdk::error::{Error, ErrorCode};
use mcp_rust_sdk::server::ServerHandler;
use mcp_rust_sdk::types::{ClientCapabilities, Implementation, ServerCapabilities};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

use crate::mcp::dispatch::Dispatcher;
use crate::mcp::prompts::{get_prompt_result, list_prompts_result};
use crate::mcp::registry::Registry;
use crate::mcp::subscriptions::SubscriptionBus;
use crate::mcp::tools::{OdooClientPool, call_tool, is_legacy_op_type};
use crate::odoo::pool::Pool;

/// Top-level MCP method handler: holds the structured tool catalog's `Dispatcher`
/// (session/rate-limit/cache/domain/security-backed), the bare `Pool` the resource
/// layer reads through directly, the legacy multi-instance passthrough pool (only
/// reachable when `ENABLE_LEGACY_TOOLS` tools are enabled via guards), and the
/// declarative tool/prompt/server registry.
#[derive(Clone)]
pub struct McpOdooHandler {
    dispatcher: Arc<Dispatcher>,
    pool: Arc<Pool>,
    legacy_pool: OdooClientPool,
    registry: Arc<Registry>,
    subscriptions: Arc<SubscriptionBus>,
}

impl McpOdooHandler {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        pool: Arc<Pool>,
        legacy_pool: OdooClientPool,
        registry: Arc<Registry>,
        subscriptions: Arc<SubscriptionBus>,
    ) -> Self {
        Self {
            dispatcher,
            pool,
            legacy_pool,
            registry,
            subscriptions,
        }
    }

    pub async fn server_name(&self) -> String {
        self.registry.server_name().await
    }

    pub async fn instructions(&self) -> String {
        self.registry.instructions().await
    }

    pub async fn protocol_version_default(&self) -> String {
        self.registry.protocol_version_default().await
    }

    /// Retained for the HTTP transport's `initialize` response, which advertises the
    /// legacy multi-instance capability even though the gateway's structured catalog now
    /// talks to a single configured backend.
    pub fn instance_names(&self) -> Vec<String> {
        self.legacy_pool.instance_names()
    }

    pub async fn pool_stats(&self) -> crate::odoo::pool::PoolStats {
        self.pool.stats().await
    }

    pub async fn session_count(&self) -> usize {
        self.dispatcher.sessions.len().await
    }

    /// Exposes the subscription bus so a transport can forward published resource-update
    /// notifications onto its own per-connection push channel (SSE, chunked stream, ...).
    pub fn subscriptions(&self) -> Arc<SubscriptionBus> {
        self.subscriptions.clone()
    }
}

fn protocol_err(message: impl Into<String>) -> Error {
    Error::protocol(ErrorCode::InvalidRequest, message)
}

/// Renders a dispatch failure as a tool-call error, carrying the `GatewayError`'s
/// JSON-RPC code and `data.kind` tag through to the client instead of flattening every
/// failure to a bare string.
fn tool_error_response(tool: &str, err: &crate::error::GatewayError) -> Value {
    json!({
        "content": [{
            "type": "text",
            "text": serde_json::to_string_pretty(&json!({
                "error": err.to_string(),
                "tool": tool,
                "code": err.to_jsonrpc_code(),
                "data": { "kind": err.kind_tag() },
            })).unwrap_or_else(|_| "{\"error\":\"unknown\"}".to_string())
        }],
        "isError": true
    })
}

/// Validates `args` against `schema` before a structured tool dispatches. Rejecting a
/// malformed call here, ahead of session/rate-limit/domain work, is cheaper than letting
/// it fail partway through the dispatcher's state machine.
fn validate_args_against_schema(schema: &Value, args: &Value) -> Result<(), String> {
    let validator = jsonschema::validator_for(schema).map_err(|e| e.to_string())?;
    if let Err(err) = validator.validate(args) {
        return Err(err.to_string());
    }
    Ok(())
}

#[async_trait]
impl ServerHandler for McpOdooHandler {
    async fn initialize(
        &self,
        _implementation: Implementation,
        _capabilities: ClientCapabilities,
    ) -> Result<ServerCapabilities, Error> {
        // mcp_rust_sdk ServerCapabilities is currently "custom" only, so we advertise tools/prompts/resources in custom.
        let mut custom = HashMap::new();
        custom.insert("tools".to_string(), json!({}));
        custom.insert("prompts".to_string(), json!({}));
        custom.insert("resources".to_string(), json!({}));
        Ok(ServerCapabilities {
            custom: Some(custom),
        })
    }

    async fn shutdown(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn handle_method(&self, method: &str, params: Option<Value>) -> Result<Value, Error> {
        match method {
            "tools/list" => {
                // Fully declarative: tools are served from tools.json (registry).
                let tools = self.registry.list_tools().await;
                Ok(json!({ "tools": tools }))
            }
            "tools/call" => {
                let params = params.ok_or_else(|| protocol_err("Missing params for tools/call"))?;
                let name = params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| protocol_err("tools/call missing 'name'"))?;
                let args = params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));

                let Some(tool) = self.registry.get_tool(name).await else {
                    return Ok(tool_error_response(
                        name,
                        &crate::error::GatewayError::Tool("Unknown or disabled tool".to_string()),
                    ));
                };

                if let Err(e) = validate_args_against_schema(&tool.input_schema, &args) {
                    return Ok(tool_error_response(
                        name,
                        &crate::error::GatewayError::validation(
                            crate::error::ValidationKind::Schema,
                            format!("Invalid arguments: {e}"),
                        ),
                    ));
                }

                if is_legacy_op_type(&tool.op.op_type) {
                    return Ok(match call_tool(&self.legacy_pool, &tool, args).await {
                        Ok(v) => v,
                        Err(e) => tool_error_response(name, &crate::error::GatewayError::from(e)),
                    });
                }

                Ok(
                    match self.dispatcher.dispatch(&tool, args, "stdio").await {
                        Ok(v) => v,
                        Err(e) => tool_error_response(name, &e),
                    },
                )
            }
            "prompts/list" => {
                let prompts = self.registry.list_prompts().await;
                Ok(list_prompts_result(&prompts))
            }
            "prompts/get" => {
                let params =
                    params.ok_or_else(|| protocol_err("Missing params for prompts/get"))?;
                let name = params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| protocol_err("prompts/get missing 'name'"))?;
                let p = self
                    .registry
                    .get_prompt(name)
                    .await
                    .ok_or_else(|| protocol_err(format!("Unknown prompt: {name}")))?;
                Ok(get_prompt_result(&p))
            }
            "resources/list" => resources::list_resources(&self.pool).await,
            "resources/read" => {
                let params =
                    params.ok_or_else(|| protocol_err("Missing params for resources/read"))?;
                let uri = params
                    .get("uri")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| protocol_err("resources/read missing 'uri'"))?;
                resources::read_resource(&self.pool, uri).await
            }
            "resources/subscribe" => {
                let params =
                    params.ok_or_else(|| protocol_err("Missing params for resources/subscribe"))?;
                let uri = params
                    .get("uri")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| protocol_err("resources/subscribe missing 'uri'"))?;
                // Registers the URI on the bus; the stdio transport has no push channel of
                // its own, so the subscription only becomes observable over HTTP/SSE, which
                // drains the same bus (see mcp/http.rs).
                let _ = self.subscriptions.subscribe(uri).await;
                Ok(json!({ "subscribed": uri }))
            }
            "resources/unsubscribe" => {
                let params = params
                    .ok_or_else(|| protocol_err("Missing params for resources/unsubscribe"))?;
                let uri = params
                    .get("uri")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| protocol_err("resources/unsubscribe missing 'uri'"))?;
                self.subscriptions.unsubscribe(uri).await;
                Ok(json!({ "unsubscribed": uri }))
            }
            "ping" => Ok(json!({})),
            _ => Err(protocol_err(format!("Unknown method: {method}"))),
        }
    }
}
