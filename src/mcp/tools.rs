//! Legacy passthrough tool execution: the `odoo_execute_kw`/`odoo_call_method`/
//! `odoo_search_read`/`odoo_read`/`odoo_create`/`odoo_write`/`odoo_unlink` tool family,
//! callable only when `ENABLE_LEGACY_TOOLS` is set (see the tool guards in
//! `config-defaults/tools.json`). These speak multi-instance `OdooClientPool`/op-map
//! dispatch directly against raw Odoo RPC verbs, unlike the structured `odoo.*` catalog
//! in `mcp/mod.rs` which goes through session/rate-limit/domain/security/cache first.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tokio::sync::Mutex;

use crate::mcp::normalize;
use crate::mcp::registry::{OpSpec, ToolDef};
use crate::odoo::config::{OdooEnvConfig, load_odoo_env};
use crate::odoo::types::OdooError;
use crate::odoo::unified_client::OdooClient;

const DEFAULT_INSTANCE: &str = "default";

/// Shared state: parsed env + instantiated clients per instance.
#[derive(Clone)]
pub struct OdooClientPool {
    env: Arc<OdooEnvConfig>,
    clients: Arc<Mutex<HashMap<String, OdooClient>>>,
}

impl OdooClientPool {
    pub fn from_env() -> anyhow::Result<Self> {
        let env = load_odoo_env()?;
        Ok(Self {
            env: Arc::new(env),
            clients: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub async fn get(&self, instance: &str) -> anyhow::Result<OdooClient> {
        {
            let guard = self.clients.lock().await;
            if let Some(c) = guard.get(instance) {
                return Ok(c.clone());
            }
        }

        let cfg = self.env.instances.get(instance).ok_or_else(|| {
            let available = self
                .env
                .instances
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            anyhow::anyhow!("Unknown Odoo instance '{instance}'. Available: {available}")
        })?;

        let client = OdooClient::new(cfg)?;
        let mut guard = self.clients.lock().await;
        guard.insert(instance.to_string(), client.clone());
        Ok(client)
    }

    pub fn instance_names(&self) -> Vec<String> {
        self.env.instances.keys().cloned().collect()
    }
}

pub async fn call_tool(
    pool: &OdooClientPool,
    tool: &ToolDef,
    args: Value,
) -> Result<Value, OdooError> {
    execute_op(pool, &tool.op, args).await
}

/// Op types this legacy passthrough module handles. Anything else in `tools.json` is a
/// structured catalog entry routed to `mcp::dispatch::Dispatcher` instead.
pub fn is_legacy_op_type(op_type: &str) -> bool {
    matches!(
        op_type,
        "search_read" | "read" | "create" | "write" | "unlink" | "workflow_action" | "execute"
    )
}

pub async fn execute_op(
    pool: &OdooClientPool,
    op: &OpSpec,
    args: Value,
) -> Result<Value, OdooError> {
    match op.op_type.as_str() {
        "search_read" => op_search_read(pool, op, args).await,
        "read" => op_read(pool, op, args).await,
        "create" => op_create(pool, op, args).await,
        "write" => op_write(pool, op, args).await,
        "unlink" => op_unlink(pool, op, args).await,
        "workflow_action" => op_workflow_action(pool, op, args).await,
        "execute" => op_execute(pool, op, args).await,
        other => Err(OdooError::InvalidResponse(format!(
            "Unknown op.type: {other}"
        ))),
    }
}

fn ptr<'a>(args: &'a Value, op: &'a OpSpec, key: &str) -> Option<&'a Value> {
    op.map.get(key).and_then(|p| args.pointer(p))
}

fn req_str(args: &Value, op: &OpSpec, key: &str) -> Result<String, OdooError> {
    let v = ptr(args, op, key).ok_or_else(|| {
        OdooError::InvalidResponse(format!("Missing required argument '{key}' (map)"))
    })?;
    v.as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| OdooError::InvalidResponse(format!("Argument '{key}' must be string")))
}

fn opt_str(args: &Value, op: &OpSpec, key: &str) -> Result<Option<String>, OdooError> {
    match ptr(args, op, key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| OdooError::InvalidResponse(format!("Argument '{key}' must be string"))),
    }
}

fn opt_i64(args: &Value, op: &OpSpec, key: &str) -> Result<Option<i64>, OdooError> {
    match ptr(args, op, key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| OdooError::InvalidResponse(format!("Argument '{key}' must be integer"))),
    }
}

fn opt_value(args: &Value, op: &OpSpec, key: &str) -> Option<Value> {
    ptr(args, op, key).cloned().filter(|v| !v.is_null())
}

fn req_value(args: &Value, op: &OpSpec, key: &str) -> Result<Value, OdooError> {
    ptr(args, op, key).cloned().ok_or_else(|| {
        OdooError::InvalidResponse(format!("Missing required argument '{key}' (map)"))
    })
}

fn opt_vec_string(args: &Value, op: &OpSpec, key: &str) -> Result<Option<Vec<String>>, OdooError> {
    let Some(v) = ptr(args, op, key) else {
        return Ok(None);
    };
    if v.is_null() {
        return Ok(None);
    }
    let arr = v
        .as_array()
        .ok_or_else(|| OdooError::InvalidResponse(format!("Argument '{key}' must be array")))?;
    let mut out = Vec::new();
    for x in arr {
        let s = x.as_str().ok_or_else(|| {
            OdooError::InvalidResponse(format!("Argument '{key}' items must be string"))
        })?;
        out.push(s.to_string());
    }
    Ok(Some(out))
}

fn req_vec_i64(args: &Value, op: &OpSpec, key: &str) -> Result<Vec<i64>, OdooError> {
    let v = ptr(args, op, key).ok_or_else(|| {
        OdooError::InvalidResponse(format!("Missing required argument '{key}' (map)"))
    })?;
    let arr = v
        .as_array()
        .ok_or_else(|| OdooError::InvalidResponse(format!("Argument '{key}' must be array")))?;
    let mut out = Vec::new();
    for x in arr {
        let n = x.as_i64().ok_or_else(|| {
            OdooError::InvalidResponse(format!("Argument '{key}' items must be integer"))
        })?;
        out.push(n);
    }
    Ok(out)
}

fn ok_text(payload: Value) -> Value {
    json!({
        "content": [{
            "type": "text",
            "text": serde_json::to_string_pretty(&payload).unwrap_or_else(|_| "{}".to_string())
        }]
    })
}

/// Resolves the `instance` argument, falling back to the single configured `default`
/// instance for callers that omit it (legacy tools no longer expose multi-instance
/// selection in their input schema).
fn resolve_instance(args: &Value, op: &OpSpec) -> Result<String, OdooError> {
    Ok(opt_str(args, op, "instance")?.unwrap_or_else(|| DEFAULT_INSTANCE.to_string()))
}

async fn client_for(pool: &OdooClientPool, instance: &str) -> Result<OdooClient, OdooError> {
    pool.get(instance)
        .await
        .map_err(|e| OdooError::InvalidResponse(e.to_string()))
}

async fn op_search_read(
    pool: &OdooClientPool,
    op: &OpSpec,
    args: Value,
) -> Result<Value, OdooError> {
    let instance = resolve_instance(&args, op)?;
    let model = req_str(&args, op, "model")?;
    let client = client_for(pool, &instance).await?;

    let domain = opt_value(&args, op, "domain");
    let fields = opt_vec_string(&args, op, "fields")?;
    let limit = opt_i64(&args, op, "limit")?;
    let offset = opt_i64(&args, op, "offset")?;
    let order = opt_str(&args, op, "order")?;
    let context = opt_value(&args, op, "context");

    let records = client
        .search_read(&model, domain, fields, limit, offset, order, context)
        .await?;
    let count = records.as_array().map(|a| a.len()).unwrap_or(0);
    Ok(ok_text(json!({ "records": records, "count": count })))
}

async fn op_read(pool: &OdooClientPool, op: &OpSpec, args: Value) -> Result<Value, OdooError> {
    let instance = resolve_instance(&args, op)?;
    let model = req_str(&args, op, "model")?;
    let ids = req_vec_i64(&args, op, "ids")?;
    let fields = opt_vec_string(&args, op, "fields")?;
    let context = opt_value(&args, op, "context");

    let client = client_for(pool, &instance).await?;
    let records = client.read(&model, ids, fields, context).await?;
    Ok(ok_text(json!({ "records": records })))
}

async fn op_create(pool: &OdooClientPool, op: &OpSpec, args: Value) -> Result<Value, OdooError> {
    let instance = resolve_instance(&args, op)?;
    let model = req_str(&args, op, "model")?;
    let values = req_value(&args, op, "values")?;
    let context = opt_value(&args, op, "context");

    let client = client_for(pool, &instance).await?;
    let id = client.create(&model, values, context).await?;
    Ok(ok_text(json!({ "id": id, "success": true })))
}

async fn op_write(pool: &OdooClientPool, op: &OpSpec, args: Value) -> Result<Value, OdooError> {
    let instance = resolve_instance(&args, op)?;
    let model = req_str(&args, op, "model")?;
    let ids = req_vec_i64(&args, op, "ids")?;
    let values = req_value(&args, op, "values")?;
    let context = opt_value(&args, op, "context");

    let client = client_for(pool, &instance).await?;
    let ok = client.write(&model, ids.clone(), values, context).await?;
    Ok(ok_text(
        json!({ "success": ok, "updated_count": ids.len() }),
    ))
}

async fn op_unlink(pool: &OdooClientPool, op: &OpSpec, args: Value) -> Result<Value, OdooError> {
    let instance = resolve_instance(&args, op)?;
    let model = req_str(&args, op, "model")?;
    let ids = req_vec_i64(&args, op, "ids")?;
    let context = opt_value(&args, op, "context");

    let client = client_for(pool, &instance).await?;
    let ok = client.unlink(&model, ids.clone(), context).await?;
    Ok(ok_text(
        json!({ "success": ok, "deleted_count": ids.len() }),
    ))
}

async fn op_workflow_action(
    pool: &OdooClientPool,
    op: &OpSpec,
    args: Value,
) -> Result<Value, OdooError> {
    let instance = resolve_instance(&args, op)?;
    let model = req_str(&args, op, "model")?;
    let ids = req_vec_i64(&args, op, "ids")?;
    let method = req_str(&args, op, "method")?;
    let context = opt_value(&args, op, "context");

    let client = client_for(pool, &instance).await?;
    let params = Map::new();
    let result = client
        .call_named(&model, &method, Some(ids.clone()), params, context)
        .await?;
    Ok(ok_text(json!({ "result": result, "executed_on": ids })))
}

/// `execute_kw` passthrough: branches on `method` so the argument-extraction rules
/// (positional-vs-named collapsing, non-list domain coercion) apply per method family
/// instead of one generic heuristic trying to cover all of them. Methods the gateway
/// doesn't recognize still fall through to a raw `call_named`.
async fn op_execute(pool: &OdooClientPool, op: &OpSpec, args: Value) -> Result<Value, OdooError> {
    let instance = resolve_instance(&args, op)?;
    let model = req_str(&args, op, "model")?;
    let method = req_str(&args, op, "method")?;
    let args_val = ptr(&args, op, "args").cloned().unwrap_or(Value::Null);
    let kwargs_val = ptr(&args, op, "kwargs").cloned().unwrap_or(Value::Null);
    let context = opt_value(&args, op, "context");

    let client = client_for(pool, &instance).await?;

    match method.as_str() {
        "create" => {
            let envelope = json!({ "args": args_val.clone(), "kwargs": kwargs_val.clone() });
            let values = normalize::extract_create_values(&envelope)
                .ok_or_else(|| OdooError::InvalidResponse("create requires 'values'".to_string()))?;
            let id = client.create(&model, values, context).await?;
            Ok(ok_text(json!({ "id": id, "success": true })))
        }
        "read" => {
            let (ids, fields) = normalize::extract_read_params(&args_val)
                .map_err(OdooError::InvalidResponse)?;
            let records = client.read(&model, ids, fields, context).await?;
            Ok(ok_text(json!({ "records": records })))
        }
        "search" => {
            let p = normalize::extract_search_params(&args_val, &kwargs_val);
            let ids = client
                .search(&model, Some(p.domain), p.limit, p.offset, p.order, context)
                .await?;
            Ok(ok_text(json!({ "ids": ids })))
        }
        "search_read" => {
            let p = normalize::extract_search_params(&args_val, &kwargs_val);
            let records = client
                .search_read(&model, Some(p.domain), p.fields, p.limit, p.offset, p.order, context)
                .await?;
            let count = records.as_array().map(|a| a.len()).unwrap_or(0);
            Ok(ok_text(json!({ "records": records, "count": count })))
        }
        "search_count" => {
            let p = normalize::extract_search_params(&args_val, &kwargs_val);
            let count = client.search_count(&model, Some(p.domain), context).await?;
            Ok(ok_text(json!({ "count": count })))
        }
        "read_group" => {
            let p = normalize::extract_read_group_params(&args_val, &kwargs_val);
            let result = client
                .read_group(
                    &model,
                    Some(p.domain),
                    p.fields,
                    p.groupby,
                    p.offset,
                    p.limit,
                    p.orderby,
                    p.lazy,
                    context,
                )
                .await?;
            Ok(ok_text(json!({ "groups": result })))
        }
        "write" => {
            let (ids, values) =
                normalize::extract_write_params(&args_val).map_err(OdooError::InvalidResponse)?;
            let ok = client.write(&model, ids.clone(), values, context).await?;
            Ok(ok_text(json!({ "success": ok, "updated_count": ids.len() })))
        }
        "unlink" => {
            let ids =
                normalize::extract_unlink_params(&args_val).map_err(OdooError::InvalidResponse)?;
            let ok = client.unlink(&model, ids.clone(), context).await?;
            Ok(ok_text(json!({ "success": ok, "deleted_count": ids.len() })))
        }
        _ => {
            let mut params = Map::new();
            let mut ids: Option<Vec<i64>> = None;

            if !args_val.is_null() {
                match args_val {
                    Value::Array(arr) => {
                        if arr.len() == 1 {
                            if let Some(Value::Array(inner)) = arr.first() {
                                let maybe_ids: Option<Vec<i64>> =
                                    inner.iter().map(|x| x.as_i64()).collect::<Option<Vec<_>>>();
                                if maybe_ids.is_some() {
                                    ids = maybe_ids;
                                } else {
                                    params.insert("args".to_string(), Value::Array(arr));
                                }
                            } else {
                                params.insert("args".to_string(), Value::Array(arr));
                            }
                        } else {
                            params.insert("args".to_string(), Value::Array(arr));
                        }
                    }
                    Value::Object(map) => {
                        for (k, v) in map {
                            params.insert(k, v);
                        }
                    }
                    other => {
                        params.insert("arg".to_string(), other);
                    }
                }
            }

            if let Value::Object(map) = kwargs_val {
                for (k, v) in map {
                    params.insert(k, v);
                }
            } else if !kwargs_val.is_null() {
                params.insert("kwargs".to_string(), kwargs_val);
            }

            let result = client
                .call_named(&model, &method, ids, params, context)
                .await?;
            Ok(ok_text(json!({ "result": result })))
        }
    }
}
