//! ProcessInspector trait: the seam between the agents and a live process.
//! Enables fake injection for agent tests.

use goalbridge_core::{MemorySource, SyncError};

use crate::error::ProcessError;

/// Address range of a loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRegion {
    pub start: u64,
    pub end: u64,
    pub path: String,
}

impl ModuleRegion {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait ProcessInspector: Send + Sync {
    /// Pid of a running process with this name, if any.
    fn find_process(&self, name: &str) -> Result<Option<u32>, ProcessError>;

    /// The process's first loaded module (its main executable image).
    fn first_module(&self, pid: u32) -> Result<ModuleRegion, ProcessError>;

    /// Fill `buf` from `address` in the process's address space.
    fn read_memory(&self, pid: u32, address: u64, buf: &mut [u8]) -> Result<(), ProcessError>;

    /// Lightweight liveness check: one byte from the module base.
    fn ping(&self, pid: u32) -> Result<(), ProcessError> {
        let module = self.first_module(pid)?;
        let mut byte = [0u8; 1];
        self.read_memory(pid, module.start, &mut byte)
    }
}

impl<T: ProcessInspector + ?Sized> ProcessInspector for &T {
    fn find_process(&self, name: &str) -> Result<Option<u32>, ProcessError> {
        (**self).find_process(name)
    }

    fn first_module(&self, pid: u32) -> Result<ModuleRegion, ProcessError> {
        (**self).first_module(pid)
    }

    fn read_memory(&self, pid: u32, address: u64, buf: &mut [u8]) -> Result<(), ProcessError> {
        (**self).read_memory(pid, address, buf)
    }

    fn ping(&self, pid: u32) -> Result<(), ProcessError> {
        (**self).ping(pid)
    }
}

/// A process's memory viewed as a [`MemorySource`].
pub struct ProcessMemory<'a, I: ?Sized> {
    inspector: &'a I,
    pid: u32,
}

impl<'a, I: ProcessInspector + ?Sized> ProcessMemory<'a, I> {
    pub fn new(inspector: &'a I, pid: u32) -> Self {
        Self { inspector, pid }
    }
}

impl<I: ProcessInspector + ?Sized> MemorySource for ProcessMemory<'_, I> {
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> Result<(), SyncError> {
        self.inspector
            .read_memory(self.pid, address, buf)
            .map_err(|e| e.into_sync_error(address))
    }
}
