//! Error types for the process backend.

use goalbridge_core::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("process not found: {0}")]
    NotFound(String),

    #[error("process {pid} has no loaded module")]
    NoModule { pid: u32 },

    #[error("failed to parse maps line {line_num}: {detail}")]
    ParseError { line_num: usize, detail: String },

    #[error("read of {len} bytes at {address:#x} in process {pid} failed: {source}")]
    MemoryRead {
        pid: u32,
        address: u64,
        len: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("process io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// The engine's view of this failure.
    pub fn into_sync_error(self, address: u64) -> SyncError {
        let detail = self.to_string();
        match self {
            Self::NotFound(name) => SyncError::ProcessNotFound { name },
            Self::MemoryRead { address, .. } => SyncError::MemoryReadFault { address, detail },
            _ => SyncError::MemoryReadFault { address, detail },
        }
    }
}
