//! Self-Healing MCP Library
//!
//! Serves the self-healing control loop over MCP: error reports are
//! classified and matched against recovery rules, and self-modification
//! tasks are queued, executed, verified and rolled back on failure.
//!
//! # Usage as Library
//!
//! ```rust,ignore
//! use self_healing_mcp::{ServerConfig, Services, SelfHealingMcpServer, SqliteStore};
//!
//! let config = ServerConfig::load()?;
//! let store = SqliteStore::open(&config.database_path())?;
//! let server = SelfHealingMcpServer::new(Services::build(&config, store)?);
//! // Serve via stdio or an in-memory transport
//! ```
//!
//! - Persists audit records and queued error signals in SQLite
//!   (~/.binks/self-healing.db by default)
//! - Reads subsystem status snapshots from a directory of JSON files
//! - Sends emergency and rollback alerts to the inbox-mcp markdown inbox

pub mod config;
pub mod handlers;
pub mod inbox;
pub mod params;
pub mod providers;
pub mod respond;
pub mod server;
pub mod services;
pub mod store;
pub mod telemetry;

pub use config::ServerConfig;
pub use server::SelfHealingMcpServer;
pub use services::Services;
pub use store::SqliteStore;

// Re-export parameter types for direct API usage
pub use params::*;
