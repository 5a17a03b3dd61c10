//! MCP Resource URI scheme: model-scoped, not instance-scoped.
//!
//! Supported forms:
//! - `odoo://{model}/list` - most recent records of `model` (id + display_name)
//! - `odoo://{model}/{id}` - a single record by id, with its full field set
//! - `odoo://{model}/binary/{field}/{id}` - a binary field's base64 content on one record
//!
//! This gateway talks to a single configured Odoo backend, so resources are addressed
//! by model rather than by instance.

use std::time::Duration;

use mcp_rust_sdk::error::{Error, ErrorCode};
use serde_json::{Value, json};

use crate::odoo::pool::Pool;

fn resource_err(message: impl Into<String>) -> Error {
    Error::protocol(ErrorCode::InvalidRequest, message)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUri {
    List { model: String },
    Record { model: String, id: i64 },
    Binary { model: String, field: String, id: i64 },
}

impl ResourceUri {
    pub fn parse(uri: &str) -> Result<Self, String> {
        let path = uri
            .strip_prefix("odoo://")
            .ok_or_else(|| format!("Invalid URI scheme: expected 'odoo://', got '{uri}'"))?;

        let parts: Vec<&str> = path.split('/').collect();
        match parts.as_slice() {
            [model, "list"] if !model.is_empty() => Ok(ResourceUri::List {
                model: model.to_string(),
            }),
            [model, "binary", field, id] if !model.is_empty() && !field.is_empty() => {
                let id: i64 = id
                    .parse()
                    .map_err(|_| format!("Invalid record id in binary URI: {uri}"))?;
                Ok(ResourceUri::Binary {
                    model: model.to_string(),
                    field: field.to_string(),
                    id,
                })
            }
            [model, id] if !model.is_empty() => {
                let id: i64 = id
                    .parse()
                    .map_err(|_| format!("Invalid resource URI: {uri}"))?;
                Ok(ResourceUri::Record {
                    model: model.to_string(),
                    id,
                })
            }
            _ => Err(format!("Invalid resource URI: {uri}")),
        }
    }

    pub fn to_uri(&self) -> String {
        match self {
            ResourceUri::List { model } => format!("odoo://{model}/list"),
            ResourceUri::Record { model, id } => format!("odoo://{model}/{id}"),
            ResourceUri::Binary { model, field, id } => {
                format!("odoo://{model}/binary/{field}/{id}")
            }
        }
    }
}

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Lists resource templates rather than concrete resources: the model catalog is open
/// ended (any installed Odoo model is addressable), so listing advertises the URI shapes
/// a client should construct rather than enumerating every model/record up front.
pub async fn list_resources(_pool: &Pool) -> Result<Value, Error> {
    Ok(json!({
        "resourceTemplates": [
            {
                "uriTemplate": "odoo://{model}/list",
                "name": "Model record list",
                "description": "Most recent records of a model (id + display_name)",
                "mimeType": "application/json"
            },
            {
                "uriTemplate": "odoo://{model}/{id}",
                "name": "Model record",
                "description": "A single record of a model, with its full field set",
                "mimeType": "application/json"
            },
            {
                "uriTemplate": "odoo://{model}/binary/{field}/{id}",
                "name": "Binary field content",
                "description": "Base64 content of a binary field on one record",
                "mimeType": "application/json"
            }
        ]
    }))
}

pub async fn read_resource(pool: &Pool, uri: &str) -> Result<Value, Error> {
    let resource = ResourceUri::parse(uri).map_err(resource_err)?;
    let client = pool
        .acquire(ACQUIRE_TIMEOUT)
        .await
        .map_err(|e| resource_err(e.to_string()))?;

    match resource {
        ResourceUri::List { model } => read_list(&client, &model).await,
        ResourceUri::Record { model, id } => read_record(&client, &model, id).await,
        ResourceUri::Binary { model, field, id } => {
            read_binary(&client, &model, &field, id).await
        }
    }
}

async fn read_list(
    client: &crate::odoo::unified_client::OdooClient,
    model: &str,
) -> Result<Value, Error> {
    let records = client
        .search_read(
            model,
            Some(json!([])),
            Some(vec!["display_name".to_string()]),
            Some(100),
            None,
            Some("id desc".to_string()),
            None,
        )
        .await
        .map_err(|e| resource_err(e.to_string()))?;

    let uri = format!("odoo://{model}/list");
    Ok(json!({
        "contents": [{
            "uri": uri,
            "mimeType": "application/json",
            "text": serde_json::to_string_pretty(&records).unwrap_or_else(|_| "[]".to_string())
        }]
    }))
}

async fn read_record(
    client: &crate::odoo::unified_client::OdooClient,
    model: &str,
    id: i64,
) -> Result<Value, Error> {
    let records = client
        .read(model, vec![id], None, None)
        .await
        .map_err(|e| resource_err(e.to_string()))?;

    let record = records
        .as_array()
        .and_then(|a| a.first())
        .cloned()
        .ok_or_else(|| resource_err(format!("record {model}:{id} not found")))?;

    let uri = format!("odoo://{model}/{id}");
    Ok(json!({
        "contents": [{
            "uri": uri,
            "mimeType": "application/json",
            "text": serde_json::to_string_pretty(&record).unwrap_or_else(|_| "{}".to_string())
        }]
    }))
}

async fn read_binary(
    client: &crate::odoo::unified_client::OdooClient,
    model: &str,
    field: &str,
    id: i64,
) -> Result<Value, Error> {
    let records = client
        .read(model, vec![id], Some(vec![field.to_string()]), None)
        .await
        .map_err(|e| resource_err(e.to_string()))?;

    let value = records
        .as_array()
        .and_then(|a| a.first())
        .and_then(|r| r.get(field))
        .cloned()
        .ok_or_else(|| resource_err(format!("field '{field}' not found on {model}:{id}")))?;

    let uri = format!("odoo://{model}/binary/{field}/{id}");
    Ok(json!({
        "contents": [{
            "uri": uri,
            "mimeType": "application/octet-stream",
            "blob": value
        }]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_uri() {
        assert_eq!(
            ResourceUri::parse("odoo://res.partner/list").unwrap(),
            ResourceUri::List {
                model: "res.partner".to_string()
            }
        );
    }

    #[test]
    fn parses_record_uri() {
        assert_eq!(
            ResourceUri::parse("odoo://res.partner/42").unwrap(),
            ResourceUri::Record {
                model: "res.partner".to_string(),
                id: 42
            }
        );
    }

    #[test]
    fn parses_binary_uri() {
        assert_eq!(
            ResourceUri::parse("odoo://ir.attachment/binary/datas/7").unwrap(),
            ResourceUri::Binary {
                model: "ir.attachment".to_string(),
                field: "datas".to_string(),
                id: 7
            }
        );
    }

    #[test]
    fn rejects_invalid_scheme() {
        assert!(ResourceUri::parse("http://example.com").is_err());
    }

    #[test]
    fn rejects_non_numeric_record_id() {
        assert!(ResourceUri::parse("odoo://res.partner/abc").is_err());
    }

    #[test]
    fn rejects_bare_model_with_no_suffix() {
        assert!(ResourceUri::parse("odoo://res.partner").is_err());
    }

    #[test]
    fn roundtrips_all_variants() {
        for uri in [
            "odoo://res.partner/list",
            "odoo://res.partner/42",
            "odoo://ir.attachment/binary/datas/7",
        ] {
            let parsed = ResourceUri::parse(uri).unwrap();
            assert_eq!(parsed.to_uri(), uri);
        }
    }
}
