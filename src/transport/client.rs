//! Outbound calls to other members.
//!
//! One call is one short-lived TCP connection: connect, write the request
//! frame, read the reply frame, done. The per-call deadline is a hard
//! bound on the whole exchange; a remote that replies after the deadline
//! talks to a closed socket and its reply is dropped, which is exactly the
//! late-reply semantics the execution engine wants.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error as ThisError;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use super::wire::{read_frame, write_frame, Envelope, Reply};
use crate::constants::CONNECT_TIMEOUT;

/// Why an outbound call failed at the transport level.
///
/// The distinction matters to the execution engine: an unreachable peer is
/// reported as a departed member, an elapsed deadline as a replication
/// timeout.
#[derive(Debug, Clone, ThisError)]
pub enum CallError {
    /// The peer refused, reset or closed the connection: it is gone.
    #[error("member unreachable: {0}")]
    Unreachable(String),

    /// The deadline elapsed before the reply arrived.
    #[error("call timed out")]
    Elapsed,

    /// The peer answered with something that is not a valid frame.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Send `envelope` to `addr` and await the reply, bounded by `deadline`.
pub async fn call(
    addr: SocketAddr,
    envelope: &Envelope,
    deadline: Duration,
) -> Result<Reply, CallError> {
    match timeout(deadline, exchange(addr, envelope)).await {
        Ok(result) => result,
        Err(_) => Err(CallError::Elapsed),
    }
}

/// Send `envelope` to `addr` without waiting for the reply.
///
/// Used for fire-and-forget dispatch; delivery failures are invisible to
/// the caller by design.
pub async fn send_only(addr: SocketAddr, envelope: &Envelope) -> Result<(), CallError> {
    let mut stream = connect(addr).await?;
    write_frame(&mut stream, envelope)
        .await
        .map_err(|e| CallError::Unreachable(e.to_string()))?;
    Ok(())
}

async fn exchange(addr: SocketAddr, envelope: &Envelope) -> Result<Reply, CallError> {
    let mut stream = connect(addr).await?;

    write_frame(&mut stream, envelope)
        .await
        .map_err(|e| CallError::Unreachable(e.to_string()))?;

    match read_frame::<Reply, _>(&mut stream).await {
        Ok(reply) => {
            trace!(%addr, "call completed");
            Ok(reply)
        }
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            Err(CallError::Protocol(e.to_string()))
        }
        // EOF or reset mid-reply: the peer died while we were waiting.
        Err(e) => Err(CallError::Unreachable(e.to_string())),
    }
}

async fn connect(addr: SocketAddr) -> Result<TcpStream, CallError> {
    match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(CallError::Unreachable(e.to_string())),
        Err(_) => Err(CallError::Elapsed),
    }
}
