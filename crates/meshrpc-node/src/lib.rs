//! meshrpc Node
//!
//! Everything a process needs to serve and call functions in a meshrpc mesh.
//! Each process is both a server and a client: it hosts services, listens on
//! TCP, UDP and HTTP, and routes its own calls to whichever peer serves the
//! function, failing over between connections.
//!
//! # Components
//!
//! - **[`service`]**: explicit service registration and the local dispatcher
//! - **[`registry`]**: function ids, known nodes and live connections
//! - **[`connection`]**: one physical link per peer and transport
//! - **[`correlation`]**: waiters for outstanding calls on a connection
//! - **[`router`]**: local-first routing, failover and directory re-query
//! - **[`directory`]**: discovery client, in-memory or watcher-backed
//! - **[`server`]**: the three listeners
//! - **[`node`]**: bootstrap tying the pieces together
//!
//! # Example
//!
//! ```no_run
//! use meshrpc_node::config::NodeConfig;
//! use meshrpc_node::node::Node;
//! use meshrpc_node::service::ServiceBuilder;
//!
//! struct Arith;
//!
//! # async fn run() -> meshrpc_common::protocol::Result<()> {
//! let arith = ServiceBuilder::new("Arith", Arith)
//!     .call("Double", |_: &Arith, n: i64| Ok::<_, String>(n * 2))
//!     .build()?;
//! let node = Node::builder(NodeConfig::named("worker-1"))
//!     .service(arith)
//!     .start()
//!     .await?;
//!
//! let doubled: i64 = node.router().call("Arith.Double", &21i64).await?;
//! assert_eq!(doubled, 42);
//! # Ok(())
//! # }
//! ```

pub mod builtin;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod directory;
pub mod maintenance;
pub mod node;
pub mod registry;
pub mod router;
pub mod server;
pub mod service;

pub use config::{NodeConfig, PortSetting};
pub use connection::{Connection, Network};
pub use directory::{Directory, StaticDirectory, WatcherDirectory};
pub use node::{Node, NodeBuilder};
pub use router::{Reply, Router};
pub use service::{Dispatcher, ServiceBuilder, ServiceDescriptor};
