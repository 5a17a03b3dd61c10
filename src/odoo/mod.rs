pub mod client;
pub mod config;
pub mod legacy_client;
pub mod pool;
pub mod types;
pub mod unified_client;
pub mod xmlrpc_client;

pub use config::{OdooAuthMode, OdooEnvConfig, OdooInstanceConfig, OdooProtocol, load_odoo_env};
pub use pool::{Pool, PoolStats, PooledClient};
pub use unified_client::{OdooClient, OdooClientTrait};
