//! # Core Types
//!
//! Identifiers, priority tiers, and drop reasons shared by all four engines.

use serde::Serialize;
use std::fmt;

// ─── Device Identity ────────────────────────────────────────────────────────

/// Opaque per-device key. All engine state is keyed by it; the value carries
/// no structure beyond what the radio stack assigned (typically a MAC-like
/// address string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the identifier is usable as a key (non-empty).
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        DeviceId(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        DeviceId(s)
    }
}

// ─── Priority Tiers ─────────────────────────────────────────────────────────

/// Scheduling tier. The derived order puts `High < Medium < Low`, so sorting
/// a queue ascending services High entries first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// All tiers, highest first.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Scan-slot allocation weight (4:2:1).
    pub fn weight(self) -> u32 {
        match self {
            Priority::High => 4,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(name)
    }
}

// ─── Drop Reasons ───────────────────────────────────────────────────────────

/// Why a link went down, as reported by the radio stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DropReason {
    /// Peer stayed silent past the supervision timeout.
    SupervisionTimeout,
    /// Peer closed the link cleanly.
    PeerTerminated,
    /// Local host closed the link.
    HostTerminated,
    /// Anything the radio stack could not attribute.
    Unknown,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DropReason::SupervisionTimeout => "supervision_timeout",
            DropReason::PeerTerminated => "peer_terminated",
            DropReason::HostTerminated => "host_terminated",
            DropReason::Unknown => "unknown",
        };
        f.write_str(name)
    }
}
