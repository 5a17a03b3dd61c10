//! Argument normalizer for `execute_kw`-style method dispatch.
//!
//! Odoo's RPC convention splits arguments across a positional `args` array and a named
//! `kwargs` object, and several methods accept the same value through either channel
//! (`read`'s `fields`, `search_read`'s `limit`/`offset`/`order`, ...). This module applies
//! one extraction rule per method family so callers stop guessing which channel a given
//! client used. Grounded in `domain.rs`'s existing tolerance for loose domain input
//! (stringified JSON, boolean coercion), generalized here to whole argument sets.

use serde_json::Value;

fn as_string_vec(v: &Value) -> Vec<String> {
    v.as_array()
        .map(|a| a.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Coerces a non-array domain (`true`/`false`/`null` from looser clients) to an empty
/// domain, same tolerance as `domain::parse_input_form`, applied here to the `execute_kw`
/// positional slot rather than a single domain value.
fn coerce_domain(v: Value) -> Value {
    match v {
        Value::Array(_) => v,
        other => {
            tracing::warn!(value = %other, "non-list domain argument coerced to empty domain");
            Value::Array(Vec::new())
        }
    }
}

/// `create` extraction rule: first of `arguments.values`; `args[0]` if it's an object;
/// `kwargs.values`; or `kwargs` itself used wholesale.
pub fn extract_create_values(args: &Value) -> Option<Value> {
    if let Some(v) = args.get("values") {
        return Some(v.clone());
    }
    if let Some(first) = args
        .get("args")
        .and_then(|a| a.as_array())
        .and_then(|a| a.first())
        && first.is_object()
    {
        return Some(first.clone());
    }
    if let Some(kwargs) = args.get("kwargs") {
        if let Some(v) = kwargs.get("values") {
            return Some(v.clone());
        }
        if kwargs.is_object() {
            return Some(kwargs.clone());
        }
    }
    None
}

/// `read` extraction rule: `ids = args[0]`, `fields = args[1]` (default `["id","name"]`).
/// Named args stay out of `fields` entirely — passing it through both channels is what
/// trips Odoo's duplicate-argument fault.
pub fn extract_read_params(args_val: &Value) -> Result<(Vec<i64>, Option<Vec<String>>), String> {
    let arr = args_val.as_array().cloned().unwrap_or_default();
    let ids: Vec<i64> = arr
        .first()
        .and_then(|v| v.as_array())
        .ok_or_else(|| "read requires ids as the first positional argument".to_string())?
        .iter()
        .map(|v| v.as_i64().ok_or_else(|| "id values must be integers".to_string()))
        .collect::<Result<_, _>>()?;
    let fields = match arr.get(1) {
        Some(v) => Some(as_string_vec(v)),
        None => Some(vec!["id".to_string(), "name".to_string()]),
    };
    Ok((ids, fields))
}

pub struct SearchParams {
    pub domain: Value,
    pub fields: Option<Vec<String>>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
    pub order: Option<String>,
}

/// `search`/`search_read`/`search_count` extraction rule: domain compiled from `args[0]`
/// (coerced to `[]` when not a list), remaining positionals map to
/// `fields, offset, limit, order` by Odoo's own arity, with `kwargs` of the same keys
/// passed through on top.
pub fn extract_search_params(args_val: &Value, kwargs_val: &Value) -> SearchParams {
    let arr = args_val.as_array().cloned().unwrap_or_default();
    let domain = coerce_domain(arr.first().cloned().unwrap_or(Value::Null));
    let fields = arr.get(1).map(as_string_vec).filter(|v| !v.is_empty());
    let offset = arr.get(2).and_then(|v| v.as_i64());
    let limit = arr.get(3).and_then(|v| v.as_i64());
    let order = arr.get(4).and_then(|v| v.as_str()).map(str::to_string);

    let kwargs = kwargs_val.as_object();
    let fields = kwargs.and_then(|k| k.get("fields")).map(as_string_vec).or(fields);
    let offset = kwargs.and_then(|k| k.get("offset")).and_then(|v| v.as_i64()).or(offset);
    let limit = kwargs.and_then(|k| k.get("limit")).and_then(|v| v.as_i64()).or(limit);
    let order = kwargs
        .and_then(|k| k.get("order"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or(order);

    SearchParams { domain, fields, offset, limit, order }
}

pub struct ReadGroupParams {
    pub domain: Value,
    pub fields: Vec<String>,
    pub groupby: Vec<String>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
    pub orderby: Option<String>,
    pub lazy: Option<bool>,
}

/// `read_group` extraction rule: accepts either three separate positionals
/// `(domain, fields, groupby)` or a single-object positional
/// `{domain, fields, groupby, kwargs}` — both collapse to the same fields here. Named
/// args are filtered to `limit, offset, orderby, lazy`.
pub fn extract_read_group_params(args_val: &Value, kwargs_val: &Value) -> ReadGroupParams {
    let arr = args_val.as_array().cloned().unwrap_or_default();
    let (domain_raw, fields_raw, groupby_raw, object_kwargs) = if arr.len() == 1 && arr[0].is_object() {
        let obj = arr[0].as_object().expect("checked is_object above");
        (
            obj.get("domain").cloned().unwrap_or(Value::Null),
            obj.get("fields").cloned().unwrap_or(Value::Null),
            obj.get("groupby").cloned().unwrap_or(Value::Null),
            obj.get("kwargs").and_then(|v| v.as_object()).cloned(),
        )
    } else {
        (
            arr.first().cloned().unwrap_or(Value::Null),
            arr.get(1).cloned().unwrap_or(Value::Null),
            arr.get(2).cloned().unwrap_or(Value::Null),
            None,
        )
    };

    let domain = coerce_domain(domain_raw);
    let fields = as_string_vec(&fields_raw);
    let groupby = as_string_vec(&groupby_raw);

    let named = kwargs_val.as_object();
    let lookup_i64 = |key: &str| {
        named
            .and_then(|k| k.get(key))
            .or_else(|| object_kwargs.as_ref().and_then(|k| k.get(key)))
            .and_then(|v| v.as_i64())
    };
    let limit = lookup_i64("limit");
    let offset = lookup_i64("offset");
    let orderby = named
        .and_then(|k| k.get("orderby"))
        .or_else(|| object_kwargs.as_ref().and_then(|k| k.get("orderby")))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let lazy = named
        .and_then(|k| k.get("lazy"))
        .or_else(|| object_kwargs.as_ref().and_then(|k| k.get("lazy")))
        .and_then(|v| v.as_bool());

    ReadGroupParams { domain, fields, groupby, offset, limit, orderby, lazy }
}

/// `write` extraction rule: `(ids, values)` positionals, no named arguments.
pub fn extract_write_params(args_val: &Value) -> Result<(Vec<i64>, Value), String> {
    let arr = args_val
        .as_array()
        .ok_or_else(|| "write requires [ids, values] positional arguments".to_string())?;
    let ids: Vec<i64> = arr
        .first()
        .and_then(|v| v.as_array())
        .ok_or_else(|| "write requires ids as the first positional argument".to_string())?
        .iter()
        .map(|v| v.as_i64().ok_or_else(|| "id values must be integers".to_string()))
        .collect::<Result<_, _>>()?;
    let values = arr
        .get(1)
        .cloned()
        .ok_or_else(|| "write requires values as the second positional argument".to_string())?;
    Ok((ids, values))
}

/// `unlink` extraction rule: `(ids,)` positional.
pub fn extract_unlink_params(args_val: &Value) -> Result<Vec<i64>, String> {
    let arr = args_val
        .as_array()
        .ok_or_else(|| "unlink requires [ids] positional arguments".to_string())?;
    arr.first()
        .and_then(|v| v.as_array())
        .ok_or_else(|| "unlink requires ids as the first positional argument".to_string())?
        .iter()
        .map(|v| v.as_i64().ok_or_else(|| "id values must be integers".to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_values_prefers_top_level_values() {
        let args = json!({ "values": {"name": "A"}, "kwargs": {"values": {"name": "B"}} });
        assert_eq!(extract_create_values(&args), Some(json!({"name": "A"})));
    }

    #[test]
    fn create_values_falls_back_to_positional_object() {
        let args = json!({ "args": [{"name": "A"}] });
        assert_eq!(extract_create_values(&args), Some(json!({"name": "A"})));
    }

    #[test]
    fn create_values_extracted_from_nested_kwargs_values() {
        let args = json!({ "kwargs": { "values": {"name": "X"} } });
        assert_eq!(extract_create_values(&args), Some(json!({"name": "X"})));
    }

    #[test]
    fn create_values_falls_back_to_bare_kwargs() {
        let args = json!({ "kwargs": {"name": "C"} });
        assert_eq!(extract_create_values(&args), Some(json!({"name": "C"})));
    }

    #[test]
    fn create_values_missing_everywhere_is_none() {
        assert_eq!(extract_create_values(&json!({})), None);
    }

    #[test]
    fn read_params_defaults_fields_to_id_name() {
        let (ids, fields) = extract_read_params(&json!([[1, 2]])).unwrap();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(fields, Some(vec!["id".to_string(), "name".to_string()]));
    }

    #[test]
    fn read_params_reads_explicit_fields() {
        let (ids, fields) = extract_read_params(&json!([[1], ["name", "email"]])).unwrap();
        assert_eq!(ids, vec![1]);
        assert_eq!(fields, Some(vec!["name".to_string(), "email".to_string()]));
    }

    #[test]
    fn search_count_boolean_domain_coerces_to_empty() {
        let params = extract_search_params(&json!([true]), &Value::Null);
        assert_eq!(params.domain, json!([]));
    }

    #[test]
    fn search_params_kwargs_override_positional_limit() {
        let params = extract_search_params(&json!([[], null, 0, 10]), &json!({"limit": 50}));
        assert_eq!(params.limit, Some(50));
    }

    #[test]
    fn read_group_collapses_single_object_positional() {
        let params = extract_read_group_params(
            &json!([{ "domain": [], "fields": ["amount_total:month"], "groupby": ["partner_id"] }]),
            &Value::Null,
        );
        assert_eq!(params.domain, json!([]));
        assert_eq!(params.fields, vec!["amount_total:month".to_string()]);
        assert_eq!(params.groupby, vec!["partner_id".to_string()]);
    }

    #[test]
    fn read_group_accepts_separate_positionals() {
        let params = extract_read_group_params(
            &json!([[], ["amount_total"], ["partner_id"]]),
            &json!({"limit": 5, "lazy": false}),
        );
        assert_eq!(params.fields, vec!["amount_total".to_string()]);
        assert_eq!(params.limit, Some(5));
        assert_eq!(params.lazy, Some(false));
    }

    #[test]
    fn write_params_splits_ids_and_values() {
        let (ids, values) = extract_write_params(&json!([[1, 2], {"name": "A"}])).unwrap();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(values, json!({"name": "A"}));
    }

    #[test]
    fn unlink_params_reads_ids() {
        let ids = extract_unlink_params(&json!([[3, 4]])).unwrap();
        assert_eq!(ids, vec![3, 4]);
    }
}
