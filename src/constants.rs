//! Centralized protocol and configuration constants.
//!
//! This module consolidates the magic numbers used throughout the
//! coordination service. Having them in one place makes it easier to:
//!
//! - Understand the protocol constraints
//! - Update values consistently
//! - Document the rationale for each constant
//!
//! # Categories
//!
//! - **Wire Constants**: frame sizes and limits
//! - **Network Constants**: connection and call timeouts
//! - **Membership Constants**: heartbeat and failure detection defaults

use std::time::Duration;

// =============================================================================
// Wire Constants
// =============================================================================

/// Size of the length prefix preceding every frame (u32, big-endian).
pub const FRAME_HEADER_SIZE: usize = 4;

/// Maximum allowed frame size (16 MB).
///
/// This prevents memory exhaustion from malicious or malformed frames.
/// Command arguments travel as an opaque serialized array inside the frame,
/// so the bound also caps the argument payload of a single call.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

// =============================================================================
// Network Constants
// =============================================================================

/// Timeout for establishing a connection to another member.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of join redirects to follow before giving up.
///
/// A join request sent to a non-coordinator seed is redirected to the
/// coordinator known by that seed. The bound prevents redirect loops while
/// the cluster is electing a new coordinator.
pub const MAX_JOIN_REDIRECTS: u8 = 3;

// =============================================================================
// Membership Constants
// =============================================================================

/// Default name of the cluster a service joins when none is configured.
pub const DEFAULT_CLUSTER_NAME: &str = "conclave-cluster";

/// Default bound for synchronous calls that would otherwise wait forever.
///
/// A member that vanishes without a leave notification would leave a
/// synchronous call pending until the failure detector catches up; the
/// stop-gap bound converts that into a per-member timeout outcome.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default time a coordinator-only call waits for a topology change before
/// retrying against the new coordinator.
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(20);

/// Default interval between heartbeats sent to the coordinator.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Default number of missed heartbeats before a member is declared failed.
///
/// 5 missed 500ms heartbeats detects a crashed member within ~2.5 seconds.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default grace period after a member joins before heartbeats are enforced.
///
/// Prevents declaring slow-starting members failed before their heartbeat
/// loop has run once.
pub const DEFAULT_STARTUP_GRACE_PERIOD: Duration = Duration::from_secs(5);
