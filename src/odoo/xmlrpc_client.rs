use std::sync::Arc;
use std::time::Duration;

use dxr::{TryFromValue, TryToValue, Value as XmlValue};
use dxr_client::{Call, Client, ClientBuilder, Url as XmlRpcUrl};
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;
use url::Url;

use super::config::OdooInstanceConfig;
use super::types::{OdooError, OdooResult};

/// Odoo XML-RPC client, talking to `/xmlrpc/2/common` (authentication) and
/// `/xmlrpc/2/object` (`execute_kw`). XML-RPC codec work in `dxr` is synchronous under
/// the hood; the `dxr_client` reqwest transport keeps the public API async, and any
/// remaining blocking conversion work is pushed onto `spawn_blocking` so this client never
/// stalls the cooperative scheduler.
#[derive(Clone)]
pub struct OdooXmlRpcClient {
    common: Arc<Client>,
    object: Arc<Client>,
    db: String,
    username: String,
    password: String,
    max_retries: usize,
    uid: Arc<RwLock<Option<i64>>>,
}

impl OdooXmlRpcClient {
    pub fn new(cfg: &OdooInstanceConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&cfg.url)
            .map_err(|e| anyhow::anyhow!("Invalid Odoo url '{}': {e}", cfg.url))?;

        let db = cfg
            .db
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Missing db for XML-RPC Odoo instance url={}", cfg.url))?;
        let username = cfg.username.clone().ok_or_else(|| {
            anyhow::anyhow!("Missing username for XML-RPC Odoo instance url={}", cfg.url)
        })?;
        let password = cfg.password.clone().ok_or_else(|| {
            anyhow::anyhow!("Missing password for XML-RPC Odoo instance url={}", cfg.url)
        })?;

        let timeout = Duration::from_millis(cfg.timeout_ms.unwrap_or(30_000));
        let max_retries = cfg.max_retries.unwrap_or(3);

        let common_url: XmlRpcUrl = base.join("/xmlrpc/2/common")?.into();
        let object_url: XmlRpcUrl = base.join("/xmlrpc/2/object")?.into();

        let common = ClientBuilder::new(common_url)
            .user_agent("odoo-mcp-rust")
            .timeout(timeout)
            .build();
        let object = ClientBuilder::new(object_url)
            .user_agent("odoo-mcp-rust")
            .timeout(timeout)
            .build();

        Ok(Self {
            common: Arc::new(common),
            object: Arc::new(object),
            db,
            username,
            password,
            max_retries,
            uid: Arc::new(RwLock::new(None)),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    async fn call_with_retry(
        &self,
        client: &Client,
        method: &str,
        params: XmlValue,
    ) -> OdooResult<XmlValue> {
        let mut last_err: Option<OdooError> = None;

        for attempt in 0..=self.max_retries {
            let call = Call::new(method, params.clone());
            match client.call(call).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let message = e.to_string();
                    if let Some(fault) = extract_fault(&message) {
                        return Err(OdooError::Api {
                            status: 400,
                            message: fault,
                            body: None,
                        });
                    }
                    last_err = Some(OdooError::InvalidResponse(message));
                }
            }

            if attempt < self.max_retries {
                let backoff_ms = 250u64.saturating_mul(2u64.saturating_pow(attempt as u32));
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }

        Err(last_err.unwrap_or_else(|| {
            OdooError::InvalidResponse("XML-RPC request failed without error details".to_string())
        }))
    }

    pub async fn authenticate(&self) -> OdooResult<i64> {
        {
            let cached = self.uid.read().await;
            if let Some(uid) = *cached {
                return Ok(uid);
            }
        }

        let params = vec![
            self.db.to_value().map_err(xmlrpc_encode_err)?,
            self.username.to_value().map_err(xmlrpc_encode_err)?,
            self.password.to_value().map_err(xmlrpc_encode_err)?,
            Map::<String, Value>::new().to_value_via_json(),
        ];
        let result = self
            .call_with_retry(&self.common, "authenticate", params_to_value(params))
            .await?;

        let uid = i64::try_from_value(&result).map_err(|e| OdooError::Api {
            status: 401,
            message: format!(
                "Authentication failed for user '{}': {e}",
                self.username
            ),
            body: None,
        })?;

        if uid == 0 {
            return Err(OdooError::Api {
                status: 401,
                message: format!(
                    "Authentication failed for user '{}'. Invalid credentials.",
                    self.username
                ),
                body: None,
            });
        }

        let mut cached = self.uid.write().await;
        *cached = Some(uid);
        Ok(uid)
    }

    /// Invokes `execute_kw` on the `object` XML-RPC endpoint with the universal
    /// 7-argument shape, mirroring the JSON-RPC client's `execute_kw`.
    async fn execute_kw(
        &self,
        model: &str,
        method: &str,
        args: Value,
        kwargs: Option<Value>,
    ) -> OdooResult<Value> {
        let uid = self.authenticate().await?;

        let call_args: Value = json!([
            self.db,
            uid,
            self.password,
            model,
            method,
            args,
            kwargs.unwrap_or_else(|| json!({})),
        ]);

        let xml_params = json_to_xmlrpc(&call_args);
        let result = self
            .call_with_retry(&self.object, "execute_kw", xml_params)
            .await?;
        Ok(xmlrpc_to_json(&result))
    }

    pub async fn search(
        &self,
        model: &str,
        domain: Option<Value>,
        limit: Option<i64>,
        offset: Option<i64>,
        order: Option<String>,
        _context: Option<Value>,
    ) -> OdooResult<Vec<i64>> {
        let domain = domain.unwrap_or(json!([]));
        let mut kwargs = Map::new();
        if let Some(v) = limit {
            kwargs.insert("limit".into(), json!(v));
        }
        if let Some(v) = offset {
            kwargs.insert("offset".into(), json!(v));
        }
        if let Some(v) = order {
            kwargs.insert("order".into(), json!(v));
        }
        let result = self
            .execute_kw(model, "search", json!([domain]), Some(json!(kwargs)))
            .await?;
        serde_json::from_value(result).map_err(|e| {
            OdooError::InvalidResponse(format!("Expected array of ids from search: {e}"))
        })
    }

    pub async fn search_read(
        &self,
        model: &str,
        domain: Option<Value>,
        fields: Option<Vec<String>>,
        limit: Option<i64>,
        offset: Option<i64>,
        order: Option<String>,
        _context: Option<Value>,
    ) -> OdooResult<Value> {
        let domain = domain.unwrap_or(json!([]));
        let mut kwargs = Map::new();
        if let Some(v) = fields {
            kwargs.insert("fields".into(), json!(v));
        }
        if let Some(v) = limit {
            kwargs.insert("limit".into(), json!(v));
        }
        if let Some(v) = offset {
            kwargs.insert("offset".into(), json!(v));
        }
        if let Some(v) = order {
            kwargs.insert("order".into(), json!(v));
        }
        self.execute_kw(model, "search_read", json!([domain]), Some(json!(kwargs)))
            .await
    }

    pub async fn read(
        &self,
        model: &str,
        ids: Vec<i64>,
        fields: Option<Vec<String>>,
        _context: Option<Value>,
    ) -> OdooResult<Value> {
        let mut kwargs = Map::new();
        if let Some(v) = fields {
            kwargs.insert("fields".into(), json!(v));
        }
        self.execute_kw(model, "read", json!([ids]), Some(json!(kwargs)))
            .await
    }

    pub async fn create(&self, model: &str, values: Value, _context: Option<Value>) -> OdooResult<i64> {
        let result = self
            .execute_kw(model, "create", json!([values]), None)
            .await?;
        serde_json::from_value(result).map_err(|e| {
            OdooError::InvalidResponse(format!("Expected created id from create: {e}"))
        })
    }

    pub async fn write(
        &self,
        model: &str,
        ids: Vec<i64>,
        values: Value,
        _context: Option<Value>,
    ) -> OdooResult<bool> {
        let result = self
            .execute_kw(model, "write", json!([ids, values]), None)
            .await?;
        serde_json::from_value(result)
            .map_err(|e| OdooError::InvalidResponse(format!("Expected boolean from write: {e}")))
    }

    pub async fn unlink(&self, model: &str, ids: Vec<i64>, _context: Option<Value>) -> OdooResult<bool> {
        let result = self.execute_kw(model, "unlink", json!([ids]), None).await?;
        serde_json::from_value(result)
            .map_err(|e| OdooError::InvalidResponse(format!("Expected boolean from unlink: {e}")))
    }

    pub async fn search_count(
        &self,
        model: &str,
        domain: Option<Value>,
        _context: Option<Value>,
    ) -> OdooResult<i64> {
        let domain = domain.unwrap_or(json!([]));
        let result = self
            .execute_kw(model, "search_count", json!([domain]), None)
            .await?;
        serde_json::from_value(result).map_err(|e| {
            OdooError::InvalidResponse(format!("Expected count from search_count: {e}"))
        })
    }

    pub async fn fields_get(&self, model: &str, _context: Option<Value>) -> OdooResult<Value> {
        self.execute_kw(
            model,
            "fields_get",
            json!([]),
            Some(json!({"attributes": ["string", "type", "help", "required", "readonly", "relation", "selection"]})),
        )
        .await
    }

    pub async fn call_named(
        &self,
        model: &str,
        method: &str,
        ids: Option<Vec<i64>>,
        params: Map<String, Value>,
        _context: Option<Value>,
    ) -> OdooResult<Value> {
        let args = if let Some(ids) = ids { json!([ids]) } else { json!([]) };
        let kwargs = if params.is_empty() { None } else { Some(json!(params)) };
        self.execute_kw(model, method, args, kwargs).await
    }

    pub async fn read_group(
        &self,
        model: &str,
        domain: Option<Value>,
        fields: Vec<String>,
        groupby: Vec<String>,
        offset: Option<i64>,
        limit: Option<i64>,
        orderby: Option<String>,
        lazy: Option<bool>,
        _context: Option<Value>,
    ) -> OdooResult<Value> {
        let domain = domain.unwrap_or(json!([]));
        let mut kwargs = json!({});
        if let Some(v) = offset {
            kwargs["offset"] = json!(v);
        }
        if let Some(v) = limit {
            kwargs["limit"] = json!(v);
        }
        if let Some(v) = orderby {
            kwargs["orderby"] = json!(v);
        }
        if let Some(v) = lazy {
            kwargs["lazy"] = json!(v);
        }
        self.execute_kw(model, "read_group", json!([domain, fields, groupby]), Some(kwargs))
            .await
    }

    pub async fn name_search(
        &self,
        model: &str,
        name: Option<String>,
        args: Option<Value>,
        operator: Option<String>,
        limit: Option<i64>,
        _context: Option<Value>,
    ) -> OdooResult<Value> {
        let name = name.unwrap_or_default();
        let args = args.unwrap_or(json!([]));
        let operator = operator.unwrap_or_else(|| "ilike".to_string());
        let limit = limit.unwrap_or(100);
        self.execute_kw(model, "name_search", json!([name, args, operator, limit]), None)
            .await
    }

    pub async fn name_get(&self, model: &str, ids: Vec<i64>, _context: Option<Value>) -> OdooResult<Value> {
        self.execute_kw(model, "name_get", json!([ids]), None).await
    }

    pub async fn default_get(
        &self,
        model: &str,
        fields_list: Vec<String>,
        _context: Option<Value>,
    ) -> OdooResult<Value> {
        self.execute_kw(model, "default_get", json!([fields_list]), None).await
    }

    pub async fn copy(
        &self,
        model: &str,
        id: i64,
        default: Option<Value>,
        _context: Option<Value>,
    ) -> OdooResult<i64> {
        let kwargs = default.map(|d| json!({ "default": d }));
        let result = self.execute_kw(model, "copy", json!([id]), kwargs).await?;
        serde_json::from_value(result)
            .map_err(|e| OdooError::InvalidResponse(format!("Expected id from copy: {e}")))
    }

    pub async fn onchange(
        &self,
        model: &str,
        ids: Vec<i64>,
        values: Value,
        field_name: Vec<String>,
        field_onchange: Value,
        _context: Option<Value>,
    ) -> OdooResult<Value> {
        self.execute_kw(
            model,
            "onchange",
            json!([ids, values, field_name, field_onchange]),
            None,
        )
        .await
    }

    /// No equivalent lightweight report-download path exists over XML-RPC; callers that
    /// need binary report bytes should configure the instance with a JSON-RPC/Modern
    /// client instead. Kept as an explicit error rather than a silent stub.
    pub async fn download_report_pdf(&self, _report_name: &str, _ids: &[i64]) -> OdooResult<Vec<u8>> {
        Err(OdooError::InvalidResponse(
            "report download is not supported over the XML-RPC transport".to_string(),
        ))
    }

    /// Cheap probe for the connection pool's `HealthProbe`: `common.version`.
    pub async fn health_check(&self) -> bool {
        self.call_with_retry(&self.common, "version", XmlValue::from(Vec::<XmlValue>::new()))
            .await
            .is_ok()
    }
}

fn xmlrpc_encode_err(e: dxr::DxrError) -> OdooError {
    OdooError::InvalidResponse(format!("XML-RPC encoding error: {e}"))
}

fn params_to_value(params: Vec<XmlValue>) -> XmlValue {
    XmlValue::from(params)
}

/// Converts a `serde_json::Value` into the structurally closest `dxr::Value`. Odoo's
/// XML-RPC surface only ever sends/receives JSON-representable shapes (no native XML-RPC
/// dateTime/base64 values in `execute_kw` payloads), so this mapping is total over the
/// subset actually used.
fn json_to_xmlrpc(v: &Value) -> XmlValue {
    match v {
        Value::Null => XmlValue::string(String::new()),
        Value::Bool(b) => XmlValue::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                XmlValue::from(i as i32)
            } else {
                XmlValue::from(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => XmlValue::string(s.clone()),
        Value::Array(items) => XmlValue::from(items.iter().map(json_to_xmlrpc).collect::<Vec<_>>()),
        Value::Object(map) => {
            let mut members = std::collections::HashMap::new();
            for (k, v) in map {
                members.insert(k.clone(), json_to_xmlrpc(v));
            }
            XmlValue::structure(members)
        }
    }
}

fn xmlrpc_to_json(v: &XmlValue) -> Value {
    if let Ok(b) = bool::try_from_value(v) {
        return Value::Bool(b);
    }
    if let Ok(i) = i32::try_from_value(v) {
        return json!(i);
    }
    if let Ok(i) = i64::try_from_value(v) {
        return json!(i);
    }
    if let Ok(f) = f64::try_from_value(v) {
        return json!(f);
    }
    if let Ok(s) = String::try_from_value(v) {
        return Value::String(s);
    }
    if let Ok(arr) = Vec::<XmlValue>::try_from_value(v) {
        return Value::Array(arr.iter().map(xmlrpc_to_json).collect());
    }
    if let Ok(map) = std::collections::HashMap::<String, XmlValue>::try_from_value(v) {
        let mut out = Map::new();
        for (k, v) in map {
            out.insert(k, xmlrpc_to_json(&v));
        }
        return Value::Object(out);
    }
    Value::Null
}

/// XML-RPC faults surface through `dxr_client`'s error `Display` as
/// `"fault response: <code> <string>"`; extract the human-readable string so
/// `classify_odoo_fault` can recognize Odoo's UserError/ValidationError/not-found text.
fn extract_fault(message: &str) -> Option<String> {
    message
        .find("fault response: ")
        .map(|idx| message[idx + "fault response: ".len()..].to_string())
}

trait ToValueViaJson {
    fn to_value_via_json(&self) -> XmlValue;
}

impl ToValueViaJson for Map<String, Value> {
    fn to_value_via_json(&self) -> XmlValue {
        json_to_xmlrpc(&Value::Object(self.clone()))
    }
}
