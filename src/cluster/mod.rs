//! Cluster membership: views, joins, heartbeats and coordinator election.
//!
//! # Architecture
//!
//! ```text
//!        ┌──────────────┐   Join / Leave / Heartbeat   ┌──────────────┐
//!        │   Member B   │ ───────────────────────────► │  Member A    │
//!        │              │ ◄─────────────────────────── │ (coordinator)│
//!        └──────────────┘        InstallView           └──────┬───────┘
//!               ▲                                             │
//!               │                InstallView                  │
//!               └────────────────────┬────────────────────────┘
//!                                    │
//!                             ┌──────┴───────┐
//!                             │   Member C   │
//!                             └──────────────┘
//! ```
//!
//! The coordinator is not elected by consensus; it is a structural
//! property of the view: the first member in arrival order. Every
//! membership transition is decided by the current coordinator, which
//! installs a new view (with a bumped generation) and pushes it to all
//! members. When the coordinator itself disappears, the first survivor
//! promotes itself, continues the view generation sequence, and pushes
//! the new view; members that hear from nobody within the failover window
//! rejoin through their seeds, which is also how partitioned minorities
//! merge back in.
//!
//! Each node fires one topology change event per view it installs,
//! delivered in listener registration order from the install path, so a
//! node's own event stream is strictly ordered and never coalesced.

mod failure;
mod handler;
mod node;

pub(crate) use node::{ClusterNode, ClusterState};
