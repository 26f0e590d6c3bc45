//! Wire messages and framing.
//!
//! Frames are bincode-serialized messages preceded by a u32 big-endian
//! length prefix. Command arguments and return values do not travel as
//! typed fields: they are an opaque serialized array (JSON bytes) inside
//! the frame, so the transport never needs to understand application
//! payloads.

use std::net::SocketAddr;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::MAX_FRAME_SIZE;
use crate::error::{MemberFailure, Result, RpcError};
use crate::types::{Member, MembershipView, ViewId};

/// A request frame sent to a member's transport listener.
///
/// Every envelope names the cluster it belongs to; a listener drops
/// traffic for foreign clusters so two clusters sharing a seed list can
/// never merge by accident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Envelope {
    /// Ask the coordinator to add the sender to the view.
    Join { cluster: String, member: Member },

    /// Tell the coordinator the sender is leaving voluntarily.
    Leave { cluster: String, member: Member },

    /// Periodic liveness signal from a member to the coordinator,
    /// carrying the sender's current view generation so a lagging member
    /// can be caught up in the ack.
    Heartbeat {
        cluster: String,
        member: Member,
        view_id: ViewId,
    },

    /// A new membership view pushed by the coordinator that installed it.
    InstallView {
        cluster: String,
        view: MembershipView,
    },

    /// Execute a registered command and reply with its outcome.
    Execute {
        cluster: String,
        command_id: String,
        /// JSON-encoded argument array, opaque to the transport. `Bytes`
        /// so a broadcast clones a refcount, not the payload.
        args: Bytes,
    },
}

impl Envelope {
    /// The cluster name stamped on this envelope.
    pub fn cluster(&self) -> &str {
        match self {
            Envelope::Join { cluster, .. }
            | Envelope::Leave { cluster, .. }
            | Envelope::Heartbeat { cluster, .. }
            | Envelope::InstallView { cluster, .. }
            | Envelope::Execute { cluster, .. } => cluster,
        }
    }
}

/// The answer to one [`Envelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    /// Join accepted; the returned view already includes the joiner.
    JoinOk { view: MembershipView },

    /// The receiver is not the coordinator; retry against this address.
    JoinRedirect { coordinator: SocketAddr },

    /// Leave acknowledged.
    LeaveOk,

    /// Heartbeat acknowledged. Carries the current view when the sender's
    /// generation was stale, `None` when the sender is up to date.
    HeartbeatOk { view: Option<MembershipView> },

    /// The heartbeat sender is not in the receiver's view; it has been
    /// removed and should rejoin.
    UnknownMember,

    /// View install acknowledged.
    ViewOk,

    /// The outcome of one command execution: JSON-encoded return value or
    /// the captured per-member failure.
    Outcome(std::result::Result<Bytes, MemberFailure>),

    /// The request could not be processed at all (foreign cluster,
    /// undecodable payload).
    Error(String),
}

/// Write one length-prefixed bincode frame.
pub async fn write_frame<T, W>(writer: &mut W, message: &T) -> std::io::Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let data = bincode::serialize(message)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    if data.len() > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds the maximum", data.len()),
        ));
    }
    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await
}

/// Read one length-prefixed bincode frame.
pub async fn read_frame<T, R>(reader: &mut R) -> std::io::Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the maximum"),
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    bincode::deserialize(&buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Encode a command argument array for the wire.
pub fn encode_args(args: &[Value]) -> Result<Bytes> {
    serde_json::to_vec(args)
        .map(Bytes::from)
        .map_err(|e| RpcError::Transport(format!("cannot encode arguments: {e}")))
}

/// Decode a command argument array from the wire.
pub fn decode_args(bytes: &[u8]) -> std::result::Result<Vec<Value>, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Encode a command return value for the wire.
pub fn encode_value(value: &Value) -> std::result::Result<Bytes, serde_json::Error> {
    serde_json::to_vec(value).map(Bytes::from)
}

/// Decode a command return value from the wire.
pub fn decode_value(bytes: &[u8]) -> std::result::Result<Value, serde_json::Error> {
    serde_json::from_slice(bytes)
}
