//! The structured `odoo.*`/session/schema/domain tool catalog.
//!
//! Each call walks Received -> Validated -> Authorized -> RateChecked -> Executing ->
//! Responded against the single configured backend's pooled connection, with session
//! resolution, rate limiting, domain compilation, implicit scoping, PII masking, the TTL
//! cache, and the audit log wired in on the way through. The multi-instance
//! `odoo_execute_kw`/`odoo_call_method`/... family (`mcp::tools::execute_op`) remains the
//! escape hatch for raw RPC verbs, gated behind `ENABLE_LEGACY_TOOLS`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value, json};

use crate::cache::{CacheKey, SchemaVersionTracker, TtlCache, is_cacheable_method};
use crate::config::GatewayConfig;
use crate::domain::{NullResolver, compile_domain_with_resolver, enforce_payload_size};
use crate::error::{GatewayError, NotFoundKind, ValidationKind};
use crate::mcp::registry::{OpSpec, ToolDef};
use crate::mcp::subscriptions::SubscriptionBus;
use crate::odoo::pool::Pool;
use crate::rate_limit::{RateLimiter, rate_limit_key};
use crate::security::{self, SecurityConfig};
use crate::session::{IdempotencyStore, SessionStore};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// `odoo.search_read`'s own result-size ceiling, independent of (and never looser than)
/// the gateway-wide `max_records_limit`.
const SEARCH_READ_MAX_LIMIT: usize = 200;

const PICKLISTS_DEFAULT_LIMIT: i64 = 100;

/// Holds every shared service a dispatch needs: pool, sessions, rate limiter, cache,
/// schema version tracker and the security layer's feature flags all exist as standalone
/// modules already — this just threads them through the tool catalog.
pub struct Dispatcher {
    pub cfg: Arc<GatewayConfig>,
    pub pool: Arc<Pool>,
    pub sessions: Arc<SessionStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cache: Arc<TtlCache>,
    pub schema_versions: Arc<SchemaVersionTracker>,
    pub idempotency: Arc<IdempotencyStore>,
    pub subscriptions: Arc<SubscriptionBus>,
    pub security: SecurityConfig,
}

/// Op types that accept an optional `operation_id` for replay.
const IDEMPOTENT_OP_TYPES: &[&str] =
    &["odoo.create", "odoo.write", "odoo.unlink", "odoo.actions.call"];

impl Dispatcher {
    pub fn new(
        cfg: Arc<GatewayConfig>,
        pool: Arc<Pool>,
        sessions: Arc<SessionStore>,
        rate_limiter: Arc<RateLimiter>,
        cache: Arc<TtlCache>,
        schema_versions: Arc<SchemaVersionTracker>,
        subscriptions: Arc<SubscriptionBus>,
    ) -> Self {
        let security = SecurityConfig {
            pii_masking: cfg.pii_masking,
            audit_logging: cfg.audit_logging,
            implicit_domains: cfg.implicit_domains,
        };
        let idempotency = IdempotencyStore::new(cfg.operation_id_ttl);
        Self {
            cfg,
            pool,
            sessions,
            rate_limiter,
            cache,
            schema_versions,
            idempotency,
            subscriptions,
            security,
        }
    }

    /// Publishes `notifications/resources/updated` for the record and list URIs of
    /// `model`/`ids`: every successful internal write announces the affected resources
    /// to current subscribers before the tool's own response goes out.
    async fn publish_resource_updates(&self, model: &str, ids: &[i64]) {
        for id in ids {
            let uri = format!("odoo://{model}/{id}");
            self.subscriptions
                .publish(&uri, notification_payload(&uri))
                .await;
        }
        let list_uri = format!("odoo://{model}/list");
        self.subscriptions
            .publish(&list_uri, notification_payload(&list_uri))
            .await;
    }

    /// Dispatches one structured tool call. `client_identity` is whatever the transport
    /// layer knows about the caller (remote addr, stdio pid, bearer subject...) and is
    /// used only for rate limiting/audit attribution when no `session_id` is present.
    pub async fn dispatch(
        &self,
        tool: &ToolDef,
        args: Value,
        client_identity: &str,
    ) -> Result<Value, GatewayError> {
        let started = Instant::now();

        // RateChecked: session id (if any) takes priority over the transport identity.
        let session_id = args.get("session_id").and_then(|v| v.as_str());
        let key = rate_limit_key(session_id, Some(client_identity));
        let decision = self.rate_limiter.allow_or_wait(&key).await;
        if !decision.ok {
            return Err(GatewayError::RateLimit {
                retry_after_secs: decision.retry_after_secs,
            });
        }

        // Authorized: resolve the effective uid this call runs as, for implicit scoping.
        let effective_uid = match session_id {
            Some(sid) => self.sessions.resolve(sid).await?,
            None => 0,
        };

        let result = self
            .dispatch_op(&tool.op, args.clone(), effective_uid)
            .await;

        if self.security.audit_logging {
            let (model, method, summary) = match &result {
                Ok(_) => (None, None, "ok".to_string()),
                Err(e) => (None, None, format!("error: {e}")),
            };
            security::audit_log(
                client_identity,
                &tool.name,
                model,
                method,
                &args,
                &summary,
                started.elapsed(),
            );
        }

        result
    }

    async fn dispatch_op(
        &self,
        op: &OpSpec,
        args: Value,
        effective_uid: i64,
    ) -> Result<Value, GatewayError> {
        if IDEMPOTENT_OP_TYPES.contains(&op.op_type.as_str())
            && let Some(operation_id) = str_arg(&args, "operation_id")
        {
            if let Some(replayed) = self.idempotency.get(&operation_id).await {
                return Ok(replayed);
            }
            let result = self.dispatch_write_op(&op.op_type, args).await?;
            self.idempotency.record(operation_id, result.clone()).await;
            return Ok(result);
        }

        match op.op_type.as_str() {
            "echo" => op_echo(args),
            "session.create" => self.op_session_create(args).await,
            "session.destroy" => self.op_session_destroy(args).await,
            "schema.version" => self.op_schema_version().await,
            "schema.models" => self.op_schema_models(args).await,
            "schema.fields" => self.op_schema_fields(args).await,
            "domain.validate" => op_domain_validate(args),
            "odoo.search_read" => self.op_search_read(args, effective_uid).await,
            "odoo.read" => self.op_read(args, effective_uid).await,
            "odoo.create" => self.op_create(args).await,
            "odoo.write" => self.op_write(args).await,
            "odoo.unlink" => self.op_unlink(args).await,
            "odoo.name_search" => self.op_name_search(args, effective_uid).await,
            "odoo.picklists" => self.op_picklists(args).await,
            "odoo.actions.next_steps" => self.op_actions_next_steps(args).await,
            "odoo.actions.call" => self.op_actions_call(args).await,
            other => Err(GatewayError::Tool(format!("Unknown op.type: {other}"))),
        }
    }

    /// Dispatches one of `IDEMPOTENT_OP_TYPES`. Split out of `dispatch_op` so the
    /// replay-cache wrapper above only needs to name the write ops once.
    async fn dispatch_write_op(&self, op_type: &str, args: Value) -> Result<Value, GatewayError> {
        match op_type {
            "odoo.create" => self.op_create(args).await,
            "odoo.write" => self.op_write(args).await,
            "odoo.unlink" => self.op_unlink(args).await,
            "odoo.actions.call" => self.op_actions_call(args).await,
            other => Err(GatewayError::Tool(format!("Unknown op.type: {other}"))),
        }
    }

    fn db(&self) -> &str {
        self.cfg.odoo.db.as_deref().unwrap_or("")
    }

    async fn acquire(&self) -> Result<crate::odoo::pool::PooledClient, GatewayError> {
        self.pool.acquire(ACQUIRE_TIMEOUT).await.map_err(|e| {
            GatewayError::Pool {
                kind: crate::error::PoolErrorKind::Timeout,
                message: e.to_string(),
            }
        })
    }

    async fn op_session_create(&self, args: Value) -> Result<Value, GatewayError> {
        let username = require_str(&args, "username")?;
        let secret = require_str(&args, "api_key")?;

        let client = self.acquire().await?;
        let uid = client
            .authenticate(&username, &secret)
            .await
            .map_err(|e| GatewayError::Auth(e.to_string()))?;
        drop(client);

        let session_id = self.sessions.create(uid).await;
        Ok(ok_text(json!({ "session_id": session_id, "uid": uid })))
    }

    async fn op_session_destroy(&self, args: Value) -> Result<Value, GatewayError> {
        let session_id = str_arg(&args, "session_id")
            .ok_or_else(|| GatewayError::validation(ValidationKind::Field, "missing 'session_id'"))?;
        self.sessions.destroy(&session_id).await;
        Ok(ok_text(json!({ "destroyed": true })))
    }

    async fn op_schema_version(&self) -> Result<Value, GatewayError> {
        let client = self.acquire().await?;
        let version = self.schema_versions.current(self.db()).await;
        Ok(ok_text(json!({
            "db": self.cfg.odoo.db,
            "schema_version": version,
            "is_legacy": client.is_legacy(),
        })))
    }

    async fn op_schema_models(&self, args: Value) -> Result<Value, GatewayError> {
        let filter = str_arg(&args, "filter");
        let client = self.acquire().await?;
        let domain = match &filter {
            Some(f) => json!([
                "|",
                ["model", "ilike", f],
                ["name", "ilike", f],
            ]),
            None => json!([]),
        };
        let records = client
            .search_read(
                "ir.model",
                Some(domain),
                Some(vec!["model".to_string(), "name".to_string()]),
                Some(self.cfg.max_records_limit as i64),
                None,
                Some("model asc".to_string()),
                None,
            )
            .await
            .map_err(GatewayError::from)?;
        Ok(ok_text(json!({ "models": records })))
    }

    async fn op_schema_fields(&self, args: Value) -> Result<Value, GatewayError> {
        let model = require_str(&args, "model")?;
        let client = self.acquire().await?;
        let fields = client
            .fields_get(&model, None)
            .await
            .map_err(GatewayError::from)?;

        if let Some(version) = self.odoo_version(&client).await {
            if let Some(old) = self.schema_versions.update(self.db(), version).await
                && old != version
            {
                self.cache.invalidate_prefix(self.db(), &model).await;
            }
        }

        let attrs = args.get("attributes").and_then(|v| v.as_array());
        let fields = match attrs {
            Some(attrs) => filter_field_attributes(fields, attrs),
            None => fields,
        };
        Ok(ok_text(json!({ "model": model, "fields": fields })))
    }

    /// No cheap `/version` call exists on every variant; schema version tracking is
    /// driven by a monotonic counter bumped whenever `fields_get` runs, rather than by
    /// the server's actual module-install generation (see DESIGN.md's Open Questions).
    async fn odoo_version(&self, _client: &crate::odoo::unified_client::OdooClient) -> Option<u64> {
        Some(self.schema_versions.current(self.db()).await + 1)
    }

    async fn op_search_read(&self, args: Value, effective_uid: i64) -> Result<Value, GatewayError> {
        let model = require_str(&args, "model")?;
        let domain = self
            .compile_scoped_domain(&model, args.get("domain_json"), effective_uid)
            .await?;
        let fields = vec_string_arg(&args, "fields");
        let limit = clamp_limit(i64_arg(&args, "limit"), self.cfg.max_records_limit.min(SEARCH_READ_MAX_LIMIT));
        let offset = i64_arg(&args, "offset");
        let order = str_arg(&args, "order");

        let cache_key = CacheKey::new(
            self.db(),
            effective_uid,
            &model,
            "search_read",
            &json!({ "domain": domain, "fields": fields, "limit": limit, "offset": offset, "order": order }),
            self.schema_versions.current(self.db()).await,
        );
        if let Some(cached) = self.cache.get(&cache_key).await {
            let count = cached.as_array().map(|a| a.len()).unwrap_or(0);
            return Ok(ok_text(
                json!({ "records": self.mask(cached), "count": count, "domain": domain }),
            ));
        }

        let client = self.acquire().await?;
        let records = client
            .search_read(&model, Some(domain.clone()), fields, limit, offset, order, None)
            .await
            .map_err(GatewayError::from)?;

        if is_cacheable_method("search_read") {
            self.cache
                .insert_with_ttl(cache_key, records.clone(), self.cfg.cache_ttl)
                .await;
        }

        let count = records.as_array().map(|a| a.len()).unwrap_or(0);
        Ok(ok_text(
            json!({ "records": self.mask(records), "count": count, "domain": domain }),
        ))
    }

    async fn op_read(&self, args: Value, effective_uid: i64) -> Result<Value, GatewayError> {
        let model = require_str(&args, "model")?;
        let ids = require_i64_vec(&args, "record_ids")?;
        let fields = vec_string_arg(&args, "fields");

        let client = self.acquire().await?;
        let records = client
            .read(&model, ids, fields, None)
            .await
            .map_err(GatewayError::from)?;
        let _ = effective_uid;
        Ok(ok_text(json!({ "records": self.mask(records) })))
    }

    async fn op_create(&self, args: Value) -> Result<Value, GatewayError> {
        let model = require_str(&args, "model")?;
        let values = crate::mcp::normalize::extract_create_values(&args)
            .ok_or_else(|| GatewayError::validation(ValidationKind::Field, "missing 'values'"))?;

        let client = self.acquire().await?;
        let id = client
            .create(&model, values, None)
            .await
            .map_err(GatewayError::from)?;
        self.cache.invalidate_prefix(self.db(), &model).await;
        self.publish_resource_updates(&model, &[id]).await;
        Ok(ok_text(json!({ "id": id })))
    }

    async fn op_write(&self, args: Value) -> Result<Value, GatewayError> {
        let model = require_str(&args, "model")?;
        let ids = require_i64_vec(&args, "record_ids")?;
        let values = args
            .get("values")
            .cloned()
            .ok_or_else(|| GatewayError::validation(ValidationKind::Field, "missing 'values'"))?;

        let client = self.acquire().await?;
        client
            .write(&model, ids.clone(), values, None)
            .await
            .map_err(GatewayError::from)?;
        self.cache.invalidate_prefix(self.db(), &model).await;
        self.publish_resource_updates(&model, &ids).await;
        Ok(ok_text(json!({ "updated": ids.len() })))
    }

    async fn op_unlink(&self, args: Value) -> Result<Value, GatewayError> {
        let model = require_str(&args, "model")?;
        let ids = require_i64_vec(&args, "record_ids")?;

        let client = self.acquire().await?;
        client
            .unlink(&model, ids.clone(), None)
            .await
            .map_err(GatewayError::from)?;
        self.cache.invalidate_prefix(self.db(), &model).await;
        self.publish_resource_updates(&model, &ids).await;
        Ok(ok_text(json!({ "deleted": ids.len() })))
    }

    async fn op_name_search(&self, args: Value, effective_uid: i64) -> Result<Value, GatewayError> {
        let model = require_str(&args, "model")?;
        let name = str_arg(&args, "name");
        let operator = str_arg(&args, "operator");
        let limit = clamp_limit(i64_arg(&args, "limit"), self.cfg.max_records_limit);
        let domain = match args.get("domain") {
            Some(d) if !d.is_null() => {
                Some(self.compile_scoped_domain(&model, Some(d), effective_uid).await?)
            }
            _ => None,
        };

        let client = self.acquire().await?;
        let result = client
            .name_search(&model, name, domain, operator, limit, None)
            .await
            .map_err(GatewayError::from)?;
        Ok(ok_text(self.mask(result)))
    }

    async fn op_picklists(&self, args: Value) -> Result<Value, GatewayError> {
        let model = require_str(&args, "model")?;
        let field = require_str(&args, "field")?;
        let requested = i64_arg(&args, "limit").unwrap_or(PICKLISTS_DEFAULT_LIMIT);
        let limit = clamp_limit(Some(requested), self.cfg.max_records_limit).unwrap_or(PICKLISTS_DEFAULT_LIMIT);

        let client = self.acquire().await?;
        let fields = client
            .fields_get(&model, None)
            .await
            .map_err(GatewayError::from)?;

        let selection = fields
            .get(&field)
            .and_then(|f| f.get("selection"))
            .and_then(|s| s.as_array())
            .cloned()
            .ok_or_else(|| {
                GatewayError::not_found(
                    NotFoundKind::Record,
                    format!("field '{field}' on '{model}' has no selection list"),
                )
            })?;

        let values: Vec<Value> = selection
            .into_iter()
            .take(limit.max(0) as usize)
            .filter_map(|pair| {
                let pair = pair.as_array()?;
                let id = pair.first()?.clone();
                let label = pair.get(1)?.clone();
                Some(json!({ "id": id, "label": label }))
            })
            .collect();
        Ok(ok_text(json!({ "values": values })))
    }

    async fn op_actions_next_steps(&self, args: Value) -> Result<Value, GatewayError> {
        let model = require_str(&args, "model")?;
        let id = args
            .get("record_id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| GatewayError::validation(ValidationKind::Field, "missing 'record_id'"))?;

        let client = self.acquire().await?;
        let records = client
            .read(&model, vec![id], Some(vec!["state".to_string()]), None)
            .await
            .map_err(GatewayError::from)?;
        let state = records
            .as_array()
            .and_then(|a| a.first())
            .and_then(|r| r.get("state"))
            .cloned()
            .unwrap_or(Value::Null);

        // The state -> next-action mapping is model-specific business logic Odoo keeps
        // server-side (via `ir.actions.server`/state machine workflows); the gateway
        // doesn't encode it, so this lists the generic verbs ubiquitous across models
        // under the common `state` convention and leaves per-model specifics to
        // `odoo.actions.call`.
        let available: Vec<&str> = match state.as_str() {
            Some("draft") => vec!["action_confirm"],
            Some("confirmed") | Some("sent") => vec!["action_cancel", "action_done"],
            Some("done") => vec![],
            Some("cancel") => vec!["action_draft"],
            _ => vec![],
        };
        // Of the available actions, the first is the one that advances the record
        // through its normal lifecycle; the rest (cancel, revert) are alternatives.
        let suggested: Vec<&str> = available.iter().take(1).copied().collect();
        let hints: Vec<String> = if available.is_empty() {
            vec![format!("no known transitions from state '{}'", state.as_str().unwrap_or("unknown"))]
        } else {
            vec![]
        };
        Ok(ok_text(json!({
            "current_state": state,
            "available_actions": available,
            "suggested_actions": suggested,
            "hints": hints,
        })))
    }

    async fn op_actions_call(&self, args: Value) -> Result<Value, GatewayError> {
        let model = require_str(&args, "model")?;
        let id = args
            .get("record_id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| GatewayError::validation(ValidationKind::Field, "missing 'record_id'"))?;
        let method = require_str(&args, "method")?;
        let parameters = args.get("parameters").and_then(|v| v.as_object()).cloned();

        let client = self.acquire().await?;
        let params = parameters.unwrap_or_default();
        let raw = client
            .call_named(&model, &method, Some(vec![id]), params, None)
            .await
            .map_err(GatewayError::from)?;
        self.cache.invalidate_prefix(self.db(), &model).await;
        self.publish_resource_updates(&model, &[id]).await;

        // A scalar (bool/number) return is the common "did it work" convention; an
        // object/array return usually carries a follow-up action (e.g. a wizard) and
        // is surfaced separately as `data` rather than folded into `result`.
        let (result, data) = match raw {
            Value::Object(_) | Value::Array(_) => (Value::Bool(true), Some(raw)),
            other => (other, None),
        };
        let mut payload = Map::new();
        payload.insert("result".to_string(), result);
        if let Some(data) = data {
            payload.insert("data".to_string(), data);
        }
        Ok(ok_text(Value::Object(payload)))
    }

    /// Compiles the caller-supplied domain, then ANDs in the implicit company/user
    /// scoping clauses when `implicit_domains` is enabled, discovering the model's
    /// scoping fields via the same `fields_get` every schema/cache path already uses.
    async fn compile_scoped_domain(
        &self,
        model: &str,
        raw: Option<&Value>,
        effective_uid: i64,
    ) -> Result<Value, GatewayError> {
        let input = raw.cloned().unwrap_or_else(|| json!([]));
        let compiled = compile_domain_with_resolver(&input, &NullResolver)?;
        enforce_payload_size(&compiled, self.cfg.max_payload_size)?;

        if !self.security.implicit_domains {
            return Ok(compiled);
        }

        let client = self.acquire().await?;
        let fields = client.fields_get(model, None).await.map_err(GatewayError::from)?;
        Ok(security::inject_implicit_domain(compiled, &fields, &[], effective_uid))
    }

    fn mask(&self, value: Value) -> Value {
        if self.security.pii_masking {
            security::mask_pii(value)
        } else {
            value
        }
    }
}

/// Shapes the `notifications/resources/updated` JSON-RPC notification body for `uri`.
fn notification_payload(uri: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "notifications/resources/updated",
        "params": { "uri": uri }
    })
}

fn op_echo(args: Value) -> Result<Value, GatewayError> {
    let message = str_arg(&args, "message").unwrap_or_default();
    Ok(ok_text(json!({ "message": message })))
}

/// Reports validity rather than erroring out: a failed compile is itself the answer a
/// validate tool exists to give, so it comes back as `ok:false` with the error text in
/// `errors`, not as a dispatch failure.
fn op_domain_validate(args: Value) -> Result<Value, GatewayError> {
    require_str(&args, "model")?;
    let domain = args
        .get("domain_json")
        .cloned()
        .ok_or_else(|| GatewayError::validation(ValidationKind::Field, "missing 'domain_json'"))?;

    match compile_domain_with_resolver(&domain, &NullResolver) {
        Ok(compiled) => Ok(ok_text(json!({
            "ok": true,
            "compiled": compiled,
            "errors": Vec::<String>::new(),
            "hints": Vec::<String>::new(),
        }))),
        Err(e) => Ok(ok_text(json!({
            "ok": false,
            "compiled": Value::Null,
            "errors": [e.to_string()],
            "hints": ["domain must compile to an array of triples/logical prefixes; see the array, object-form, or stringified-JSON input shapes"],
        }))),
    }
}

fn ok_text(payload: Value) -> Value {
    json!({
        "content": [{
            "type": "text",
            "text": serde_json::to_string_pretty(&payload).unwrap_or_else(|_| "{}".to_string())
        }]
    })
}

fn str_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn require_str(args: &Value, key: &str) -> Result<String, GatewayError> {
    str_arg(args, key)
        .ok_or_else(|| GatewayError::validation(ValidationKind::Field, format!("missing '{key}'")))
}

fn i64_arg(args: &Value, key: &str) -> Option<i64> {
    args.get(key).and_then(|v| v.as_i64())
}

fn vec_string_arg(args: &Value, key: &str) -> Option<Vec<String>> {
    args.get(key)?.as_array().map(|arr| {
        arr.iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    })
}

fn require_i64_vec(args: &Value, key: &str) -> Result<Vec<i64>, GatewayError> {
    let arr = args
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| GatewayError::validation(ValidationKind::Field, format!("missing '{key}'")))?;
    arr.iter()
        .map(|v| {
            v.as_i64()
                .ok_or_else(|| GatewayError::validation(ValidationKind::Field, format!("'{key}' items must be integers")))
        })
        .collect()
}

fn clamp_limit(limit: Option<i64>, max_records_limit: usize) -> Option<i64> {
    let max = max_records_limit as i64;
    match limit {
        Some(l) if l > max => Some(max),
        Some(l) => Some(l),
        None => Some(max),
    }
}

fn filter_field_attributes(fields: Value, attrs: &[Value]) -> Value {
    let wanted: Vec<&str> = attrs.iter().filter_map(|v| v.as_str()).collect();
    let Some(obj) = fields.as_object() else {
        return fields;
    };
    let mut out = Map::new();
    for (field_name, descriptor) in obj {
        let Some(desc) = descriptor.as_object() else {
            continue;
        };
        let mut filtered = Map::new();
        for (k, v) in desc {
            if wanted.contains(&k.as_str()) {
                filtered.insert(k.clone(), v.clone());
            }
        }
        out.insert(field_name.clone(), Value::Object(filtered));
    }
    Value::Object(out)
}
