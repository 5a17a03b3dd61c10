// Allow clippy warnings that are acceptable for this codebase
#![allow(clippy::too_many_arguments)]
#![allow(clippy::result_large_err)]

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod mcp;
pub mod odoo;
pub mod rate_limit;
pub mod security;
pub mod session;
