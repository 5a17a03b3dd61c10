//! Domain DSL validator/compiler: turns one of three accepted input shapes into a
//! canonical Odoo prefix-notation domain array, validating operators, field names, and
//! payload size along the way.
//!
//! The known-operator set is grounded in `mcp/prompts.rs`'s `odoo_domain_filters` prompt,
//! which documents the exact operator vocabulary this repo already tells MCP clients to
//! use; this validator enforces the same set server-side instead of trusting it blindly.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{GatewayError, ValidationKind};

const KNOWN_OPERATORS: &[&str] = &[
    "=", "!=", "<", "<=", ">", ">=", "like", "ilike", "not like", "not ilike", "=like",
    "=ilike", "in", "not in", "child_of", "parent_of",
];

const LOGICAL_PREFIXES: &[&str] = &["&", "|", "!"];

fn field_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_.]*$").unwrap())
}

/// Fixed placeholder-token resolver table. Real deployments would source these from the
/// effective session/context (company ids, calendar boundaries); callers substitute a
/// concrete resolver via [`compile_domain_with_resolver`] in anything beyond tests.
pub trait PlaceholderResolver {
    fn resolve(&self, token: &str) -> Option<Value>;
}

/// No-op resolver: placeholder tokens are left as literal strings. Used by
/// [`compile_domain`] when the caller has no session context to substitute from.
pub struct NullResolver;

impl PlaceholderResolver for NullResolver {
    fn resolve(&self, _token: &str) -> Option<Value> {
        None
    }
}

pub fn compile_domain(input: &Value) -> Result<Value, GatewayError> {
    compile_domain_with_resolver(input, &NullResolver)
}

/// Compiles `input` (raw array, object form, or stringified JSON of either) into a
/// canonical Odoo prefix-notation array, substituting placeholder tokens via `resolver`
/// along the way.
pub fn compile_domain_with_resolver(
    input: &Value,
    resolver: &dyn PlaceholderResolver,
) -> Result<Value, GatewayError> {
    let parsed = parse_input_form(input)?;
    let canonical = to_prefix_form(&parsed)?;
    let substituted = substitute_placeholders(&canonical, resolver);
    validate_prefix_domain(&substituted)?;
    Ok(substituted)
}

/// Parses the three accepted input forms down to a single JSON shape: either a raw prefix
/// array, or an object-form tree (`{"and":[...]}` / `{"or":[...]}` / `{"not": ...}`).
fn parse_input_form(input: &Value) -> Result<Value, GatewayError> {
    match input {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(Value::Array(Vec::new()));
            }
            let parsed: Value = serde_json::from_str(trimmed).map_err(|e| {
                GatewayError::validation(
                    ValidationKind::Domain,
                    format!("domain string is not valid JSON: {e}"),
                )
            })?;
            parse_input_form(&parsed)
        }
        Value::Null => Ok(Value::Array(Vec::new())),
        Value::Bool(_) => {
            // Per spec: boolean values parse to [] with a recorded warning.
            tracing::warn!(value = %input, "boolean domain input coerced to empty domain");
            Ok(Value::Array(Vec::new()))
        }
        Value::Array(_) | Value::Object(_) => Ok(input.clone()),
        other => Err(GatewayError::validation(
            ValidationKind::Domain,
            format!("unsupported domain input shape: {other}"),
        )),
    }
}

/// Converts object form (`{"and":[...]}`, `{"or":[...]}`, `{"not": ...}`) to the
/// equivalent Odoo prefix array. Raw arrays pass through unchanged (leaves still get
/// checked by [`validate_prefix_domain`]).
fn to_prefix_form(value: &Value) -> Result<Value, GatewayError> {
    match value {
        Value::Array(_) => Ok(value.clone()),
        Value::Object(map) => {
            if map.len() != 1 {
                return Err(GatewayError::validation(
                    ValidationKind::Domain,
                    "object-form domain node must have exactly one of and/or/not",
                ));
            }
            let (key, val) = map.iter().next().unwrap();
            match key.as_str() {
                "and" | "or" => {
                    let items = val.as_array().ok_or_else(|| {
                        GatewayError::validation(
                            ValidationKind::Domain,
                            format!("'{key}' expects an array of domain nodes"),
                        )
                    })?;
                    let mut compiled: Vec<Value> = Vec::new();
                    let prefix = if key == "and" { "&" } else { "|" };
                    for _ in 1..items.len() {
                        compiled.push(Value::String(prefix.to_string()));
                    }
                    for item in items {
                        let node = to_prefix_form(item)?;
                        flatten_into(&mut compiled, node);
                    }
                    Ok(Value::Array(compiled))
                }
                "not" => {
                    let inner = to_prefix_form(val)?;
                    let mut compiled = vec![Value::String("!".to_string())];
                    flatten_into(&mut compiled, inner);
                    Ok(Value::Array(compiled))
                }
                other => Err(GatewayError::validation(
                    ValidationKind::Domain,
                    format!("unknown object-form domain key '{other}'"),
                )),
            }
        }
        other => Err(GatewayError::validation(
            ValidationKind::Domain,
            format!("domain node must be an array, object, or leaf triple, got {other}"),
        )),
    }
}

fn flatten_into(out: &mut Vec<Value>, node: Value) {
    match node {
        Value::Array(items) => {
            // A leaf triple [field, op, value] stays a single element; a compiled
            // sub-expression (itself an array of prefix tokens/triples) gets spliced in.
            if is_leaf_triple(&items) {
                out.push(Value::Array(items));
            } else {
                out.extend(items);
            }
        }
        other => out.push(other),
    }
}

fn is_leaf_triple(items: &[Value]) -> bool {
    items.len() == 3 && matches!(items[0], Value::String(_))
        && !LOGICAL_PREFIXES.contains(&items[0].as_str().unwrap_or(""))
}

fn substitute_placeholders(value: &Value, resolver: &dyn PlaceholderResolver) -> Value {
    match value {
        Value::String(s) if s.starts_with("__") && s.ends_with("__") => {
            resolver.resolve(s).unwrap_or_else(|| value.clone())
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| substitute_placeholders(v, resolver))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Validates a canonical prefix-form domain array: known operators, well-formed field
/// names, and (by the caller, via `max_payload_size`) bounded value sizes.
fn validate_prefix_domain(domain: &Value) -> Result<(), GatewayError> {
    let items = domain.as_array().ok_or_else(|| {
        GatewayError::validation(ValidationKind::Domain, "compiled domain is not an array")
    })?;

    let mut errors = Vec::new();
    for item in items {
        match item {
            Value::String(s) if LOGICAL_PREFIXES.contains(&s.as_str()) => {}
            Value::Array(triple) if triple.len() == 3 => {
                let field = triple[0].as_str().unwrap_or("");
                let op = triple[1].as_str().unwrap_or("");
                if !field_name_re().is_match(field) {
                    errors.push(format!("invalid field name '{field}'"));
                }
                if !KNOWN_OPERATORS.contains(&op) {
                    errors.push(format!("unknown operator '{op}'"));
                }
            }
            other => errors.push(format!("malformed domain node: {other}")),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(GatewayError::validation(
            ValidationKind::Domain,
            errors.join("; "),
        ))
    }
}

/// Enforces `max_payload_size` (in bytes, measured on the serialized domain) from config.
pub fn enforce_payload_size(domain: &Value, max_payload_size: usize) -> Result<(), GatewayError> {
    let size = domain.to_string().len();
    if size > max_payload_size {
        return Err(GatewayError::validation(
            ValidationKind::Domain,
            format!("domain payload of {size} bytes exceeds max_payload_size {max_payload_size}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_string_parses_to_empty_array() {
        assert_eq!(compile_domain(&json!("")).unwrap(), json!([]));
    }

    #[test]
    fn null_parses_to_empty_array() {
        assert_eq!(compile_domain(&json!(null)).unwrap(), json!([]));
    }

    #[test]
    fn bool_parses_to_empty_array() {
        assert_eq!(compile_domain(&json!(true)).unwrap(), json!([]));
    }

    #[test]
    fn raw_array_passes_through_when_valid() {
        let input = json!([["name", "=", "John"]]);
        assert_eq!(compile_domain(&input).unwrap(), input);
    }

    #[test]
    fn raw_array_with_logical_operator() {
        let input = json!(["&", ["name", "=", "John"], ["age", ">", 18]]);
        assert_eq!(compile_domain(&input).unwrap(), input);
    }

    #[test]
    fn object_form_and_compiles_to_prefix() {
        let input = json!({"and": [["name", "=", "John"], ["age", ">", 18]]});
        let compiled = compile_domain(&input).unwrap();
        assert_eq!(compiled, json!(["&", ["name", "=", "John"], ["age", ">", 18]]));
    }

    #[test]
    fn object_form_or_compiles_to_prefix() {
        let input = json!({"or": [["name", "=", "John"], ["name", "=", "Jane"]]});
        let compiled = compile_domain(&input).unwrap();
        assert_eq!(
            compiled,
            json!(["|", ["name", "=", "John"], ["name", "=", "Jane"]])
        );
    }

    #[test]
    fn object_form_not_compiles_to_prefix() {
        let input = json!({"not": ["state", "=", "cancel"]});
        let compiled = compile_domain(&input).unwrap();
        assert_eq!(compiled, json!(["!", ["state", "=", "cancel"]]));
    }

    #[test]
    fn stringified_json_is_parsed_then_compiled() {
        let input = json!(r#"{"and":[["name","=","John"],["age",">",18]]}"#);
        let compiled = compile_domain(&input).unwrap();
        assert_eq!(compiled, json!(["&", ["name", "=", "John"], ["age", ">", 18]]));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let input = json!([["name", "~=", "John"]]);
        let err = compile_domain(&input).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Validation {
                kind: ValidationKind::Domain,
                ..
            }
        ));
    }

    #[test]
    fn invalid_field_name_is_rejected() {
        let input = json!([["1bad-field", "=", "x"]]);
        assert!(compile_domain(&input).is_err());
    }

    #[test]
    fn placeholder_token_is_substituted() {
        struct FixedResolver;
        impl PlaceholderResolver for FixedResolver {
            fn resolve(&self, token: &str) -> Option<Value> {
                match token {
                    "__current_company_ids__" => Some(json!([1, 2])),
                    _ => None,
                }
            }
        }
        let input = json!([["company_id", "in", "__current_company_ids__"]]);
        let compiled = compile_domain_with_resolver(&input, &FixedResolver).unwrap();
        assert_eq!(compiled, json!([["company_id", "in", [1, 2]]]));
    }

    #[test]
    fn idempotent_recompile_is_stable() {
        let input = json!(["&", ["name", "=", "John"], ["age", ">", 18]]);
        let once = compile_domain(&input).unwrap();
        let twice = compile_domain(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn payload_size_enforced() {
        let domain = json!([["name", "=", "x".repeat(1000)]]);
        assert!(enforce_payload_size(&domain, 10).is_err());
        assert!(enforce_payload_size(&domain, 10_000).is_ok());
    }
}
