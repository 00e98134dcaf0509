//! MySQL Gateway Library
//!
//! A read-only query gateway that lets AI agents inspect and query one
//! MySQL server through MCP tools. Every statement is classified before it
//! reaches the database; results come back as a uniform JSON document.

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::{DbError, ErrorKind, ErrorReport};
pub use gateway::Gateway;
pub use mcp::GatewayService;
