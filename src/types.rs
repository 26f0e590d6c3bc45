//! Type-safe wrappers for cluster identities and membership views.
//!
//! These newtypes prevent mixing up the different identifiers that share an
//! underlying representation but carry different semantic meanings: node
//! identities, view generations and the view itself.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Opaque identity of one service instance.
///
/// A fresh id is drawn when a node joins the transport group; the id dies
/// with the instance. Ids are compared for equality only; the cluster-wide
/// total order of members is their arrival order in the view, not their id
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Draw a random node id.
    pub fn random() -> Self {
        NodeId(fastrand::u64(1..))
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// One member of the cluster: a node identity plus the address its
/// transport listener is reachable at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    pub id: NodeId,
    pub addr: SocketAddr,
}

impl Member {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Member { id, addr }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

/// Monotonically increasing generation of a membership view.
///
/// Assigned by the coordinator that installs the view; a new coordinator
/// continues the sequence from the last view it observed. Members ignore
/// installs whose id is not greater than their current view's.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ViewId(pub u64);

impl ViewId {
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The id the next installed view will carry.
    #[inline]
    pub const fn next(self) -> Self {
        ViewId(self.0 + 1)
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ordered snapshot of the live cluster members.
///
/// Members appear in arrival order and the first member is always the
/// current coordinator. Views are immutable once built; every membership
/// transition produces a new view with a bumped [`ViewId`], so readers
/// always observe either the previous complete view or the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipView {
    id: ViewId,
    members: Vec<Member>,
}

impl MembershipView {
    /// An empty view, the state of a node before it has joined anything.
    pub fn empty() -> Self {
        MembershipView {
            id: ViewId(0),
            members: Vec::new(),
        }
    }

    /// The first view of a brand new cluster: the founder alone.
    pub fn bootstrap(founder: Member) -> Self {
        MembershipView {
            id: ViewId(1),
            members: vec![founder],
        }
    }

    /// Rebuild a view from raw parts (used when deserializing from peers).
    pub fn from_parts(id: ViewId, members: Vec<Member>) -> Self {
        MembershipView { id, members }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The current coordinator: the first member of the view.
    pub fn coordinator(&self) -> Option<&Member> {
        self.members.first()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    /// The next view after `member` joins: appended at the tail, id bumped.
    pub fn with_member(&self, member: Member) -> Self {
        let mut members = self.members.clone();
        if !members.iter().any(|m| m.id == member.id) {
            members.push(member);
        }
        MembershipView {
            id: self.id.next(),
            members,
        }
    }

    /// The next view after the member with `id` departs.
    pub fn without_member(&self, id: NodeId) -> Self {
        let members = self
            .members
            .iter()
            .copied()
            .filter(|m| m.id != id)
            .collect();
        MembershipView {
            id: self.id.next(),
            members,
        }
    }
}

impl fmt::Display for MembershipView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view {} [", self.id)?;
        for (i, m) in self.members.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{m}")?;
        }
        write!(f, "]")
    }
}

/// Lifecycle state of the service.
///
/// `start()` is only valid from `Init` and `stop()` only transitions out
/// of `Started`; all execution operations are rejected outside `Started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Init,
    Started,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Init => write!(f, "INIT"),
            ServiceState::Started => write!(f, "STARTED"),
            ServiceState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// How long a call waits for replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutSpec {
    /// Wait for every targeted member, bounded by the configured default
    /// call timeout.
    Sync,
    /// Wait up to the given bound; members that have not replied by then
    /// get a timeout outcome and late replies are dropped.
    Bounded(std::time::Duration),
    /// Dispatch without waiting; the call returns an empty outcome list.
    FireAndForget,
}
