//! Real inspector over procfs (`comm`, `maps`, `mem`).

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::ProcessError;
use crate::inspector::{ModuleRegion, ProcessInspector};
use crate::maps::{first_module, parse_maps_output};

/// Kernel truncates `comm` to 15 bytes.
const COMM_MAX: usize = 15;

pub struct ProcfsInspector {
    root: PathBuf,
}

impl ProcfsInspector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn pid_dir(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string())
    }
}

impl Default for ProcfsInspector {
    fn default() -> Self {
        Self::new("/proc")
    }
}

/// Compare a configured process name against a `comm` value.
/// `gk.exe` and `gk` both match a `comm` of `gk`.
fn comm_matches(comm: &str, name: &str) -> bool {
    let name = name.strip_suffix(".exe").unwrap_or(name);
    let truncated = name.get(..COMM_MAX).unwrap_or(name);
    let comm = comm.strip_suffix(".exe").unwrap_or(comm);
    comm == name || comm == truncated
}

fn read_comm(dir: &Path) -> Option<String> {
    std::fs::read_to_string(dir.join("comm"))
        .ok()
        .map(|s| s.trim_end().to_string())
}

impl ProcessInspector for ProcfsInspector {
    fn find_process(&self, name: &str) -> Result<Option<u32>, ProcessError> {
        let mut found: Option<u32> = None;
        for entry in std::fs::read_dir(&self.root)? {
            let Ok(entry) = entry else { continue };
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            // Processes can exit between read_dir and read; treat as absent.
            let Some(comm) = read_comm(&entry.path()) else {
                continue;
            };
            if comm_matches(&comm, name) {
                found = Some(found.map_or(pid, |p| p.min(pid)));
            }
        }
        Ok(found)
    }

    fn first_module(&self, pid: u32) -> Result<ModuleRegion, ProcessError> {
        let maps = std::fs::read_to_string(self.pid_dir(pid).join("maps")).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::NotFound(pid.to_string())
            } else {
                ProcessError::Io(e)
            }
        })?;
        let entries = parse_maps_output(&maps)?;
        first_module(&entries).ok_or(ProcessError::NoModule { pid })
    }

    fn read_memory(&self, pid: u32, address: u64, buf: &mut [u8]) -> Result<(), ProcessError> {
        let len = buf.len();
        let wrap = |source: std::io::Error| ProcessError::MemoryRead {
            pid,
            address,
            len,
            source,
        };
        let file = File::open(self.pid_dir(pid).join("mem")).map_err(wrap)?;
        file.read_exact_at(buf, address).map_err(wrap)
    }
}
