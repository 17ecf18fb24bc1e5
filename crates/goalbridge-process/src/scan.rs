//! Marker scan over a module and state-block pointer resolution.

use crate::error::ProcessError;
use crate::inspector::{ModuleRegion, ProcessInspector};

/// Bytes read per scan step.
const SCAN_CHUNK: usize = 1 << 20;

/// Padding between the end of the marker and the state-block pointer.
pub const MARKER_POINTER_PADDING: u64 = 4;

/// Offset of the first occurrence of `marker` in `haystack`.
pub fn find_marker(haystack: &[u8], marker: &[u8]) -> Option<usize> {
    if marker.is_empty() || marker.len() > haystack.len() {
        return None;
    }
    haystack.windows(marker.len()).position(|w| w == marker)
}

/// Scan a module chunk by chunk for `marker`. Unreadable chunks are skipped.
pub fn scan_module(
    inspector: &impl ProcessInspector,
    pid: u32,
    module: &ModuleRegion,
    marker: &[u8],
) -> Option<u64> {
    if marker.is_empty() {
        return None;
    }
    let overlap = marker.len() as u64 - 1;
    let mut address = module.start;
    let mut buf = Vec::new();
    while address < module.end {
        let remaining = module.end - address;
        let len = usize::try_from(remaining).map_or(SCAN_CHUNK, |r| r.min(SCAN_CHUNK));
        buf.resize(len, 0);
        match inspector.read_memory(pid, address, &mut buf) {
            Ok(()) => {
                if let Some(pos) = find_marker(&buf, marker) {
                    return Some(address + pos as u64);
                }
            }
            Err(e) => tracing::debug!(pid, address, "skipping unreadable chunk: {e}"),
        }
        let step = len as u64;
        if step <= overlap || address + step >= module.end {
            break;
        }
        // Step back so a marker straddling two chunks is still found.
        address += step - overlap;
    }
    None
}

/// Locate the game's state block: find `marker` in the first module, then
/// follow the u64 pointer stored right after it (plus padding).
///
/// `Ok(None)` means the process is up but the marker is absent.
pub fn locate_state_block(
    inspector: &impl ProcessInspector,
    pid: u32,
    marker: &[u8],
) -> Result<Option<u64>, ProcessError> {
    let module = inspector.first_module(pid)?;
    let Some(marker_address) = scan_module(inspector, pid, &module, marker) else {
        return Ok(None);
    };
    let pointer = marker_address + marker.len() as u64 + MARKER_POINTER_PADDING;
    let mut raw = [0u8; 8];
    inspector.read_memory(pid, pointer, &mut raw)?;
    Ok(Some(u64::from_le_bytes(raw)))
}
