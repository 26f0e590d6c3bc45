//! TCP transport for membership and command traffic.
//!
//! Every node runs one [`TransportServer`]; peers reach it with one
//! short-lived connection per call. A call is a single length-prefixed
//! bincode frame carrying an [`Envelope`](wire::Envelope), answered by a
//! single frame carrying a [`Reply`](wire::Reply).
//!
//! The transport knows nothing about membership semantics; it moves typed
//! frames and enforces timeouts. What a message *means* is decided by the
//! [`InboundHandler`](server::InboundHandler) the server is spawned with.

pub mod client;
pub mod server;
pub mod wire;

pub use client::{call, send_only, CallError};
pub use server::{InboundHandler, TransportServer};
pub use wire::{Envelope, Reply};
