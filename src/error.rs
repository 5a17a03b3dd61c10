//! Gateway-wide error taxonomy.
//!
//! `OdooError` (in `odoo::types`) covers RPC transport failures; `GatewayError` is the
//! wider set of kinds the dispatcher can surface to an MCP client, each carrying its own
//! JSON-RPC error code per the gateway's reserved code range.

use crate::odoo::types::OdooError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Domain,
    Field,
    Schema,
    Aggregation,
    Generic,
}

impl ValidationKind {
    fn as_str(&self) -> &'static str {
        match self {
            ValidationKind::Domain => "domain",
            ValidationKind::Field => "field",
            ValidationKind::Schema => "schema",
            ValidationKind::Aggregation => "aggregation",
            ValidationKind::Generic => "generic",
        }
    }
}

impl std::fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Record,
    Method,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    Timeout,
    ConnectionFailed,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("pool error: {kind:?}: {message}")]
    Pool { kind: PoolErrorKind, message: String },

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimit { retry_after_secs: u64 },

    #[error("validation error ({kind}): {message}")]
    Validation {
        kind: ValidationKind,
        message: String,
    },

    #[error("not found ({kind:?}): {message}")]
    NotFound {
        kind: NotFoundKind,
        message: String,
    },

    #[error("tool error: {0}")]
    Tool(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn validation(kind: ValidationKind, message: impl Into<String>) -> Self {
        GatewayError::Validation {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(kind: NotFoundKind, message: impl Into<String>) -> Self {
        GatewayError::NotFound {
            kind,
            message: message.into(),
        }
    }

    /// JSON-RPC error code in the gateway-reserved range.
    pub fn to_jsonrpc_code(&self) -> i64 {
        match self {
            GatewayError::Config(_) => -32004,
            GatewayError::Network(_) => -32002,
            GatewayError::Protocol(_) => -32003,
            GatewayError::Auth(_) => -32001,
            GatewayError::Session(_) => -32006,
            GatewayError::Pool {
                kind: PoolErrorKind::Timeout,
                ..
            } => -32005,
            GatewayError::Pool {
                kind: PoolErrorKind::ConnectionFailed,
                ..
            } => -32005,
            GatewayError::RateLimit { .. } => -32010,
            GatewayError::Validation {
                kind: ValidationKind::Aggregation,
                ..
            } => -32007,
            GatewayError::Validation { .. } => -32007,
            GatewayError::NotFound {
                kind: NotFoundKind::Record,
                ..
            } => -32008,
            GatewayError::NotFound {
                kind: NotFoundKind::Method,
                ..
            } => -32009,
            GatewayError::Tool(_) => -32012,
            GatewayError::Resource(_) => -32011,
            GatewayError::Internal(_) => -32603,
        }
    }

    /// Lowercase kind tag for the `data.kind` field of the error envelope.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "config",
            GatewayError::Network(_) => "network",
            GatewayError::Protocol(_) => "protocol",
            GatewayError::Auth(_) => "auth",
            GatewayError::Session(_) => "session",
            GatewayError::Pool { .. } => "pool",
            GatewayError::RateLimit { .. } => "rate_limit",
            GatewayError::Validation { .. } => "validation",
            GatewayError::NotFound { .. } => "not_found",
            GatewayError::Tool(_) => "tool",
            GatewayError::Resource(_) => "resource",
            GatewayError::Internal(_) => "internal",
        }
    }
}

/// Classifies a raw Odoo fault message into a [`GatewayError`], per the wire-fault
/// mapping rules: method-not-found, UserError/ValidationError/aggregation, record-does-not
/// exist, and auth faults all get their own kind rather than falling through to `Internal`.
pub fn classify_odoo_fault(message: &str) -> GatewayError {
    if let Some(rest) = message.find("does not exist on the model").map(|_| message) {
        if let Some((method, model)) = parse_method_not_found(rest) {
            return GatewayError::not_found(
                NotFoundKind::Method,
                format!("method '{method}' does not exist on model '{model}'"),
            );
        }
    }
    if message.contains("record") && message.contains("does not exist") {
        return GatewayError::not_found(NotFoundKind::Record, message.to_string());
    }
    if message.contains("Funzione di aggregazione") && message.contains("non valida") {
        return GatewayError::validation(ValidationKind::Aggregation, message.to_string());
    }
    if message.contains("UserError") || message.contains("ValidationError") {
        return GatewayError::validation(ValidationKind::Generic, message.to_string());
    }
    if message.contains("AccessDenied")
        || message.contains("authenticate")
        || message.contains("Authentication")
    {
        return GatewayError::Auth(message.to_string());
    }
    GatewayError::Internal(message.to_string())
}

fn parse_method_not_found(message: &str) -> Option<(String, String)> {
    // "The method 'foo' does not exist on the model 'res.partner'"
    let method_start = message.find("method '")? + "method '".len();
    let method_end = message[method_start..].find('\'')? + method_start;
    let method = message[method_start..method_end].to_string();

    let model_start = message[method_end..].find("model '")? + method_end + "model '".len();
    let model_end = message[model_start..].find('\'')? + model_start;
    let model = message[model_start..model_end].to_string();

    Some((method, model))
}

impl From<OdooError> for GatewayError {
    fn from(err: OdooError) -> Self {
        match err {
            OdooError::Http(e) => GatewayError::Network(e.to_string()),
            OdooError::Api { message, .. } => classify_odoo_fault(&message),
            OdooError::InvalidResponse(msg) => GatewayError::Protocol(msg),
        }
    }
}
