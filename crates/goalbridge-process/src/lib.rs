//! goalbridge-process: external process IO boundary.
//! Finds processes by name, locates their first loaded module, scans it for
//! the state-block marker and reads raw memory. No sync logic lives here.

pub mod error;
pub mod inspector;
pub mod maps;
#[cfg(unix)]
pub mod procfs;
pub mod scan;

pub use error::ProcessError;
pub use inspector::{ModuleRegion, ProcessInspector, ProcessMemory};
pub use maps::{MapsEntry, first_module, parse_maps_output};
#[cfg(unix)]
pub use procfs::ProcfsInspector;
pub use scan::{find_marker, locate_state_block};
