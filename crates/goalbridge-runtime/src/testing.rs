//! In-memory process table shared by agent tests.

use std::collections::HashMap;
use std::sync::Mutex;

use goalbridge_core::LayoutSnapshot;
use goalbridge_process::{ModuleRegion, ProcessError, ProcessInspector};

pub const MODULE_BASE: u64 = 0x40_0000;
pub const BLOCK_ADDR: u64 = 0x7f00_0000;
pub const MARKER: &[u8] = b"UnLiStEdStRaTs_JaK1\0";
const MODULE_SIZE: usize = 4096;
const MARKER_AT: usize = 512;

#[derive(Default)]
struct Procs {
    by_name: HashMap<String, u32>,
    /// pid -> mapped (address, bytes) regions; the first is the module.
    regions: HashMap<u32, Vec<(u64, Vec<u8>)>>,
}

#[derive(Default)]
pub struct FakeInspector {
    procs: Mutex<Procs>,
}

impl FakeInspector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A process with a blank module and no state block.
    pub fn spawn_process(&self, name: &str, pid: u32) {
        let mut p = self.procs.lock().expect("lock");
        p.by_name.insert(name.to_string(), pid);
        p.regions
            .insert(pid, vec![(MODULE_BASE, vec![0u8; MODULE_SIZE])]);
    }

    /// A game process whose module carries the marker pointing at a state block.
    pub fn spawn_game(&self, name: &str, pid: u32, snapshot: &LayoutSnapshot) {
        let mut module = vec![0u8; MODULE_SIZE];
        module[MARKER_AT..MARKER_AT + MARKER.len()].copy_from_slice(MARKER);
        let ptr = MARKER_AT + MARKER.len() + 4;
        module[ptr..ptr + 8].copy_from_slice(&BLOCK_ADDR.to_le_bytes());

        let mut p = self.procs.lock().expect("lock");
        p.by_name.insert(name.to_string(), pid);
        p.regions.insert(
            pid,
            vec![(MODULE_BASE, module), (BLOCK_ADDR, snapshot.to_block_image())],
        );
    }

    /// Overwrite the state block of a running game.
    pub fn set_block(&self, pid: u32, snapshot: &LayoutSnapshot) {
        let mut p = self.procs.lock().expect("lock");
        if let Some(regions) = p.regions.get_mut(&pid) {
            for (addr, bytes) in regions.iter_mut() {
                if *addr == BLOCK_ADDR {
                    *bytes = snapshot.to_block_image();
                }
            }
        }
    }

    pub fn kill(&self, name: &str) {
        let mut p = self.procs.lock().expect("lock");
        if let Some(pid) = p.by_name.remove(name) {
            p.regions.remove(&pid);
        }
    }
}

fn read_error(pid: u32, address: u64, len: usize) -> ProcessError {
    ProcessError::MemoryRead {
        pid,
        address,
        len,
        source: std::io::Error::from_raw_os_error(3),
    }
}

impl ProcessInspector for FakeInspector {
    fn find_process(&self, name: &str) -> Result<Option<u32>, ProcessError> {
        Ok(self.procs.lock().expect("lock").by_name.get(name).copied())
    }

    fn first_module(&self, pid: u32) -> Result<ModuleRegion, ProcessError> {
        let p = self.procs.lock().expect("lock");
        let (start, bytes) = p
            .regions
            .get(&pid)
            .and_then(|r| r.first())
            .ok_or_else(|| ProcessError::NotFound(pid.to_string()))?;
        Ok(ModuleRegion {
            start: *start,
            end: *start + bytes.len() as u64,
            path: "/opt/opengoal/fake".into(),
        })
    }

    fn read_memory(&self, pid: u32, address: u64, buf: &mut [u8]) -> Result<(), ProcessError> {
        let p = self.procs.lock().expect("lock");
        let regions = p
            .regions
            .get(&pid)
            .ok_or_else(|| read_error(pid, address, buf.len()))?;
        for (start, bytes) in regions {
            let Some(offset) = address.checked_sub(*start) else {
                continue;
            };
            let offset = offset as usize;
            if let Some(src) = bytes.get(offset..offset + buf.len()) {
                buf.copy_from_slice(src);
                return Ok(());
            }
        }
        Err(read_error(pid, address, buf.len()))
    }
}
