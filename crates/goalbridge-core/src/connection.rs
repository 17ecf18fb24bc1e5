//! Per-agent connection state and the edge-triggered connect request flag.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// `Disconnected → Connecting → Connected → Faulted`.
///
/// `Faulted` resumes like `Disconnected` but is only entered from `Connected`
/// on a detected IO failure, and is only left through an explicit connect.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Faulted => "faulted",
        }
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// State after an IO failure was detected. Only a live connection faults.
    #[must_use]
    pub fn on_io_failure(self) -> Self {
        match self {
            Self::Connected => Self::Faulted,
            other => other,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge-triggered one-shot request consumed by an agent's next tick.
///
/// Clones share the flag, so the operator side and the agent hold the same
/// request. Setting it while pending is a no-op.
#[derive(Debug, Clone, Default)]
pub struct RequestFlag(Arc<AtomicBool>);

/// Manual (re)connect request for one agent.
pub type ConnectRequest = RequestFlag;

impl RequestFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `false` if a request was already pending.
    pub fn request(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Consume the flag. Returns whether a request was pending.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}
