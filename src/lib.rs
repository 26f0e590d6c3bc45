//! # Conclave
//! Group-membership-aware RPC for clusters, in pure Rust.
//!
//! This crate lets every node of a cluster execute named commands on all
//! nodes, or on the cluster coordinator only, with per-call timeouts and
//! per-member failure isolation, plus an integrated coordinator-election
//! and topology-change notification protocol.
//!
//! # Goals
//! - Easy to understand code
//! - Leverage best in class libraries such as [Tokio](https://tokio.rs/)
//! - No consensus machinery: the coordinator is a structural property of
//!   the membership view (first member by arrival), which is all the
//!   coordination the command layer needs
//! - Be a building block for cluster-aware services (cache invalidation,
//!   cluster-wide maintenance commands, coordinator-only jobs)
//!
//! # Architecture
//!
//! ```text
//!  ┌─────────────────────────────────────────────────────────────┐
//!  │                        RpcService                           │
//!  │                                                             │
//!  │  ┌───────────────┐  ┌────────────────┐  ┌───────────────┐   │
//!  │  │    Command    │  │   Execution    │  │   Topology    │   │
//!  │  │   Registry    │◄─┤     Engine     │  │   Listeners   │   │
//!  │  └───────────────┘  └───────┬────────┘  └───────▲───────┘   │
//!  │                             │                   │           │
//!  │                     ┌───────▼────────┐  ┌───────┴───────┐   │
//!  │                     │   Transport    │◄─┤    Cluster    │   │
//!  │                     │  (framed TCP)  │  │  (membership) │   │
//!  │                     └────────────────┘  └───────────────┘   │
//!  └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Getting started
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use conclave::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> conclave::error::Result<()> {
//!     let service = RpcService::new(RpcConfig::default())?;
//!     service.register_command(Arc::new(FnCommand::new("ping", |_args| {
//!         Ok(serde_json::json!("pong"))
//!     })));
//!     service.start().await?;
//!
//!     let ping = service.registered("ping").expect("registered above");
//!     let outcomes = service
//!         .execute_on_all(&*ping, TimeoutSpec::Sync, vec![])
//!         .await?;
//!     println!("{outcomes:?}");
//!
//!     service.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Semantics in one paragraph
//!
//! A broadcast call snapshots the membership view at dispatch time and
//! returns one outcome per member, in view order: the returned value
//! (including `null`), or the captured failure of that member — unknown
//! command, handler error, handler panic, replication timeout or member
//! departure. One member's failure never aborts the others. A
//! coordinator-only call unwraps the single outcome, raising failures as
//! the call's own error, and can transparently retry on the next
//! coordinator when the current one leaves mid-call.

mod cluster;

pub mod command;
pub mod config;
pub mod constants;
pub mod error;
pub mod service;
pub mod telemetry;
pub mod topology;
pub mod transport;
pub mod types;

pub mod prelude {
    //! Main exports for building cluster-aware services.
    pub use crate::command::{CallCommand, CallSpec, FnCommand, RemoteCommand};
    pub use crate::config::RpcConfig;
    pub use crate::error::{CommandError, MemberFailure, Result, RpcError};
    pub use crate::service::{Outcome, RpcService};
    pub use crate::telemetry::{init_logging, LogFormat};
    pub use crate::topology::{TopologyChangeEvent, TopologyChangeListener};
    pub use crate::types::{Member, MembershipView, NodeId, ServiceState, TimeoutSpec, ViewId};

    pub use serde_json::Value;
}
