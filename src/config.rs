//! Gateway-wide configuration, loaded from the environment once at startup.
//!
//! Generalizes the previous `OdooEnvConfig`/`OdooInstanceConfig`-only env loading
//! (`odoo::config::load_odoo_env`) to the full set of gateway knobs: pool sizing, session
//! TTL, rate limiting, caching, payload limits, the security layer's feature flags, CORS,
//! TLS material paths, and transport selection. The single `OdooInstanceConfig` the
//! gateway talks to is still built from env vars (optionally `ODOO_INSTANCES` JSON for a
//! named instance); `GatewayConfig` wraps it with everything else the gateway needs.

use std::path::PathBuf;
use std::time::Duration;

use crate::odoo::config::OdooInstanceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http,
    StreamableHttp,
    Sse,
}

impl TransportKind {
    fn from_env_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "http" => TransportKind::Http,
            "streamable_http" | "streamable-http" | "streamable" => TransportKind::StreamableHttp,
            "sse" => TransportKind::Sse,
            _ => TransportKind::Stdio,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub streamable: bool,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub handlers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub odoo: OdooInstanceConfig,
    pub connection_type: String,

    pub pool_size: usize,
    pub timeout: Duration,

    pub session_timeout: Duration,

    pub operation_id_ttl: Duration,

    pub requests_per_minute: i64,
    pub rate_limit_max_wait: Duration,

    pub cache_ttl: Duration,
    pub schema_cache_ttl: Duration,
    pub cache_max_entries: usize,

    pub max_payload_size: usize,
    pub max_fields_limit: usize,
    pub max_records_limit: usize,

    pub pii_masking: bool,
    pub audit_logging: bool,
    pub implicit_domains: bool,

    pub allowed_origins: Vec<String>,
    pub tls_version: Option<String>,
    pub ca_cert_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,

    pub sse_queue_maxsize: usize,

    pub transport: TransportKind,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_num<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.split(',').map(|s| s.trim().to_string()).collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl GatewayConfig {
    /// Loads every knob from the environment. The single Odoo backend this gateway talks
    /// to is built via `odoo::config::load_odoo_env()` and its first (or `default`/only)
    /// instance is adopted as the gateway's backend.
    pub fn from_env() -> anyhow::Result<Self> {
        let env = crate::odoo::config::load_odoo_env()?;
        let odoo = env
            .instances
            .get("default")
            .or_else(|| env.instances.values().next())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no Odoo instance configured"))?;

        let transport = TransportKind::from_env_str(&env_str("MCP_TRANSPORT", "stdio"));
        let http_port: u16 = env_num("MCP_HTTP_PORT", 8787);

        Ok(Self {
            odoo,
            connection_type: env_str("ODOO_CONNECTION_TYPE", "jsonrpc"),

            pool_size: env_num("ODOO_POOL_SIZE", 5usize),
            timeout: Duration::from_secs(env_num("ODOO_TIMEOUT_SECS", 30u64)),

            session_timeout: Duration::from_secs(
                env_num::<u64>("SESSION_TIMEOUT_MINUTES", 30) * 60,
            ),

            operation_id_ttl: Duration::from_secs(env_num("OPERATION_ID_TTL_SECONDS", 86_400u64)),

            requests_per_minute: env_num("REQUESTS_PER_MINUTE", 120i64),
            rate_limit_max_wait: Duration::from_secs(env_num("RATE_LIMIT_MAX_WAIT_SECONDS", 0u64)),

            cache_ttl: Duration::from_secs(env_num("CACHE_TTL_SECONDS", 60u64)),
            schema_cache_ttl: Duration::from_secs(env_num("SCHEMA_CACHE_TTL_SECONDS", 300u64)),
            cache_max_entries: env_num("CACHE_MAX_ENTRIES", 10_000usize),

            max_payload_size: env_num("MAX_PAYLOAD_SIZE", 1_048_576usize),
            max_fields_limit: env_num("MAX_FIELDS_LIMIT", 200usize),
            max_records_limit: env_num("MAX_RECORDS_LIMIT", 1000usize),

            pii_masking: env_bool("PII_MASKING", true),
            audit_logging: env_bool("AUDIT_LOGGING", true),
            implicit_domains: env_bool("IMPLICIT_DOMAINS", false),

            allowed_origins: env_list("ALLOWED_ORIGINS", &["*"]),
            tls_version: env_opt_str("TLS_VERSION"),
            ca_cert_path: env_opt_str("CA_CERT_PATH").map(PathBuf::from),
            client_cert_path: env_opt_str("CLIENT_CERT_PATH").map(PathBuf::from),
            client_key_path: env_opt_str("CLIENT_KEY_PATH").map(PathBuf::from),

            sse_queue_maxsize: env_num("SSE_QUEUE_MAXSIZE", 256usize),

            transport,
            http: HttpConfig {
                host: env_str("MCP_HTTP_HOST", "127.0.0.1"),
                port: http_port,
                streamable: env_bool("MCP_HTTP_STREAMABLE", true),
            },
            logging: LoggingConfig {
                level: env_str("LOG_LEVEL", "info"),
                format: env_str("LOG_FORMAT", "text"),
                handlers: env_list("LOG_HANDLERS", &["stderr"]),
            },
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }
}
