//! Security layer: implicit domain injection, PII masking, and the structured audit log.
//!
//! Grounded in the existing `fields_get` RPC call (reused rather than reinvented, to
//! discover whether a model carries `company_id`/`user_id`) and the `tracing` usage already
//! established throughout `mcp/registry.rs`/`main.rs` for the audit record.

use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Fields whose values are rewritten in responses when PII masking is enabled, matched by
/// name (case-insensitive substring) rather than content sniffing, since Odoo field names
/// are a far more reliable PII signal than regexing arbitrary string values.
const PII_FIELD_MARKERS: &[&str] = &[
    "email", "phone", "mobile", "fax", "vat", "iban", "ssn", "passport", "national_id",
];

fn card_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{12,19}$").unwrap())
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub pii_masking: bool,
    pub audit_logging: bool,
    pub implicit_domains: bool,
}

/// Discovers whether `model` carries a `company_id` and/or `user_id` field via the fields
/// dictionary already returned by `fields_get`, then ANDs the compiled domain with the
/// matching implicit clauses.
pub fn inject_implicit_domain(
    domain: Value,
    fields: &Value,
    allowed_company_ids: &[i64],
    effective_uid: i64,
) -> Value {
    let has_field = |name: &str| {
        fields
            .as_object()
            .map(|m| m.contains_key(name))
            .unwrap_or(false)
    };

    let mut clauses: Vec<Value> = Vec::new();
    if has_field("company_id") && !allowed_company_ids.is_empty() {
        clauses.push(Value::Array(vec![
            Value::String("company_id".to_string()),
            Value::String("in".to_string()),
            Value::Array(allowed_company_ids.iter().map(|id| Value::from(*id)).collect()),
        ]));
    }
    if has_field("user_id") {
        clauses.push(Value::Array(vec![
            Value::String("user_id".to_string()),
            Value::String("=".to_string()),
            Value::from(effective_uid),
        ]));
    }

    if clauses.is_empty() {
        return domain;
    }

    let base = domain.as_array().cloned().unwrap_or_default();
    let mut out = Vec::new();
    let total = clauses.len() + if base.is_empty() { 0 } else { 1 };
    for _ in 1..total.max(1) {
        out.push(Value::String("&".to_string()));
    }
    if !base.is_empty() {
        out.extend(base);
    }
    out.extend(clauses);
    Value::Array(out)
}

/// Rewrites values of likely-PII fields in a response payload (a record, list of records,
/// or nested structure) using a deterministic partial mask. Idempotent: masking an already
/// masked value is a no-op since masked values no longer look like the original.
pub fn mask_pii(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(mask_pii).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                if is_pii_field(&k) {
                    out.insert(k, mask_value(v));
                } else {
                    out.insert(k, mask_pii(v));
                }
            }
            Value::Object(out)
        }
        other => other,
    }
}

fn is_pii_field(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    PII_FIELD_MARKERS.iter().any(|m| lower.contains(m))
}

/// Deterministic partial mask: keeps a short prefix/suffix, replaces the middle with `*`.
/// Card-like digit strings are masked to their last 4 digits, matching the common
/// "ends in 1234" convention instead of a generic partial mask.
fn mask_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(mask_string(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(mask_value).collect()),
        other => other,
    }
}

fn mask_string(s: &str) -> String {
    if s.is_empty() {
        return s.to_string();
    }
    if card_number_re().is_match(s) {
        let tail = &s[s.len().saturating_sub(4)..];
        return format!("{}{}", "*".repeat(s.len() - tail.len()), tail);
    }
    if let Some((local, domain)) = s.split_once('@') {
        let visible = local.chars().take(1).collect::<String>();
        return format!("{visible}{}@{domain}", "*".repeat(local.len().saturating_sub(1).max(1)));
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let head = &chars[..2];
    let tail = &chars[chars.len() - 2..];
    format!(
        "{}{}{}",
        head.iter().collect::<String>(),
        "*".repeat(chars.len() - 4),
        tail.iter().collect::<String>()
    )
}

/// Stable, non-reversible digest of an args payload for the audit log — logging the
/// argument shape without leaking argument values.
pub fn arg_digest(args: &Value) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    args.to_string().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Emits the structured audit record for a successful dispatch:
/// `{ts, client, tool, model, method, arg_digest, result_summary, duration}`. `ts` is
/// implicit in the tracing event timestamp; callers don't pass a clock reading in.
#[allow(clippy::too_many_arguments)]
pub fn audit_log(
    client: &str,
    tool: &str,
    model: Option<&str>,
    method: Option<&str>,
    args: &Value,
    result_summary: &str,
    duration: Duration,
) {
    tracing::info!(
        target: "audit",
        client,
        tool,
        model,
        method,
        arg_digest = %arg_digest(args),
        result_summary,
        duration_ms = duration.as_millis() as u64,
        "dispatch completed"
    );
}
