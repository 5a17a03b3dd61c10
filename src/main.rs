use std::sync::Arc;

use clap::Parser;
use tracing::info;

use odoo_mcp_gateway::cache::{SchemaVersionTracker, TtlCache};
use odoo_mcp_gateway::config::{GatewayConfig, TransportKind};
use odoo_mcp_gateway::mcp::McpOdooHandler;
use odoo_mcp_gateway::mcp::cursor_stdio::CursorStdioTransport;
use odoo_mcp_gateway::mcp::dispatch::Dispatcher;
use odoo_mcp_gateway::mcp::http as mcp_http;
use odoo_mcp_gateway::mcp::registry::Registry;
use odoo_mcp_gateway::mcp::runtime::ServerCompat;
use odoo_mcp_gateway::mcp::subscriptions::SubscriptionBus;
use odoo_mcp_gateway::mcp::tools::OdooClientPool;
use odoo_mcp_gateway::odoo::pool::Pool;
use odoo_mcp_gateway::rate_limit::RateLimiter;
use odoo_mcp_gateway::session::SessionStore;

#[derive(Debug, Parser)]
#[command(name = "odoo-mcp-gateway", version, about = "MCP protocol gateway for Odoo ERP backends")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Parser)]
enum Command {
    /// Validate the configured Odoo backend without starting the server
    #[command(about = "Validate Odoo configuration")]
    ValidateConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = GatewayConfig::from_env()?;

    // stdio transport must keep stdout clear for JSON-RPC frames; everything else logs
    // to stdout.
    match cfg.transport {
        TransportKind::Stdio => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .init();
        }
    }

    if let Some(Command::ValidateConfig) = cli.command {
        return validate_config(&cfg).await;
    }

    let cfg = Arc::new(cfg);

    let registry = Arc::new(Registry::from_env());
    registry.initial_load().await?;
    registry.start_watchers();

    let pool = Pool::new(cfg.odoo.clone(), cfg.pool_size);
    pool.spawn_health_probe(std::time::Duration::from_secs(60));

    let sessions = SessionStore::new(cfg.session_timeout);
    sessions.spawn_sweeper(std::time::Duration::from_secs(60));

    let rate_limiter = RateLimiter::new(
        cfg.requests_per_minute,
        cfg.rate_limit_max_wait,
        cfg.session_timeout,
    );
    rate_limiter.spawn_evictor(std::time::Duration::from_secs(300));

    let cache = TtlCache::new(cfg.cache_max_entries, cfg.cache_ttl);
    let schema_versions = SchemaVersionTracker::new();
    let subscriptions = SubscriptionBus::new(cfg.sse_queue_maxsize);

    let dispatcher = Arc::new(Dispatcher::new(
        cfg.clone(),
        pool.clone(),
        sessions,
        rate_limiter,
        cache,
        schema_versions,
        subscriptions.clone(),
    ));
    dispatcher
        .idempotency
        .spawn_sweeper(std::time::Duration::from_secs(300));

    // `ENABLE_LEGACY_TOOLS`-gated passthrough tools keep their own multi-instance pool,
    // distinct from the structured catalog's single-backend `Pool`.
    let legacy_pool = OdooClientPool::from_env()?;

    let handler = Arc::new(McpOdooHandler::new(
        dispatcher,
        pool,
        legacy_pool,
        registry,
        subscriptions,
    ));

    match cfg.transport {
        TransportKind::Stdio => run_stdio(handler).await?,
        TransportKind::Http | TransportKind::StreamableHttp | TransportKind::Sse => {
            run_http(handler, &cfg).await?
        }
    }

    Ok(())
}

async fn validate_config(cfg: &GatewayConfig) -> anyhow::Result<()> {
    print!("• {} ({}): ", cfg.odoo.db.as_deref().unwrap_or("<no db>"), cfg.odoo.url);

    let client = odoo_mcp_gateway::odoo::unified_client::OdooClient::new(&cfg.odoo)?;
    match tokio::time::timeout(std::time::Duration::from_secs(10), client.health_check()).await {
        Ok(true) => {
            println!("OK");
            Ok(())
        }
        Ok(false) => {
            println!("FAIL - health check failed");
            Err(anyhow::anyhow!("Validation failed"))
        }
        Err(_) => {
            println!("FAIL - timeout");
            Err(anyhow::anyhow!("Validation timed out"))
        }
    }
}

async fn run_stdio(handler: Arc<McpOdooHandler>) -> anyhow::Result<()> {
    let (transport, _sender) = CursorStdioTransport::new();
    let server = ServerCompat::new(Arc::new(transport), handler);

    info!("MCP server starting (stdio)");
    server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}

async fn run_http(handler: Arc<McpOdooHandler>, cfg: &GatewayConfig) -> anyhow::Result<()> {
    let listen = cfg.listen_addr();
    info!("MCP server listening (http) on {}", listen);
    mcp_http::serve(handler, &listen, &cfg.allowed_origins).await
}
