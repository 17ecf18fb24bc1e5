//! Error taxonomy shared by both agents.

use thiserror::Error;

use crate::ids::{Category, LocalId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// External process is not running. While connecting the agent just stays
    /// disconnected; on a live connection it is a fault.
    #[error("process not found: {name}")]
    ProcessNotFound { name: String },

    /// The process was found but the state-block marker was not.
    #[error("state-block marker not found in process {pid}")]
    MarkerNotFound { pid: u32 },

    #[error("memory read fault at {address:#x}: {detail}")]
    MemoryReadFault { address: u64, detail: String },

    #[error("socket io fault: {0}")]
    SocketIoFault(String),

    #[error("handshake rejected at {command:?}: {reply:?}")]
    HandshakeRejected { command: String, reply: String },

    #[error("unknown identifier: global id {0} is outside every category range")]
    UnknownIdentifier(u64),

    #[error("unknown identifier: {category} local id {local_id} is outside its range")]
    UnknownLocalIdentifier { category: Category, local_id: LocalId },

    #[error("category {0} is not enabled in this configuration")]
    CategoryDisabled(Category),
}

impl SyncError {
    /// Faults that mean a live connection has been lost (`Connected → Faulted`).
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Self::ProcessNotFound { .. } | Self::MemoryReadFault { .. } | Self::SocketIoFault(_)
        )
    }

    /// Errors that must stop a delivery from being retried automatically.
    pub fn is_fatal_for_delivery(&self) -> bool {
        matches!(
            self,
            Self::UnknownIdentifier(_)
                | Self::UnknownLocalIdentifier { .. }
                | Self::CategoryDisabled(_)
        )
    }
}
