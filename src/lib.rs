//! mdsctl - administrative client for a sharded metadata-server cluster.
//!
//! The crate turns logical metadata operations ("list this directory of
//! filesystem 3", "sum the usage under /data") into calls against the right
//! MDS node, with connection reuse, retries and shard-aware routing, and it
//! walks directory trees with bounded concurrency.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  CLI: mds list | fs info/route/usage/rm | quota get/set     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  MdsClient: fs info cache | RouterRegistry | TreeWalker     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RpcDispatcher: ordering | retries | merge | leader probe   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ConnectionPool | framed TCP transport (MdsChannel)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use mdsctl::client::MdsClient;
//! use mdsctl::config::ClientConfig;
//!
//! #[tokio::main]
//! async fn main() -> mdsctl::Result<()> {
//!     let client = MdsClient::new(ClientConfig::default())?;
//!     let info = client.fs_info(1).await?;
//!     let usage = client.usage(info.fs_id, "/", false).await?;
//!     println!("{} bytes in {} entries", usage.length, usage.entries);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod messages;
pub mod observability;
pub mod pool;
pub mod probe;
pub mod resilience;
pub mod router;
pub mod rpc;
pub mod status;
pub mod transport;
pub mod types;
pub mod walker;

pub mod cli;
pub mod client;
pub mod output;

pub use error::{CmdError, Result};
