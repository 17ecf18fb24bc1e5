//! `/proc/<pid>/maps` parser and first-module lookup.

use crate::error::ProcessError;
use crate::inspector::ModuleRegion;

/// One mapping line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapsEntry {
    pub start: u64,
    pub end: u64,
    pub perms: String,
    /// Backing file, or a pseudo path like `[heap]`. `None` for anonymous maps.
    pub path: Option<String>,
}

impl MapsEntry {
    fn is_file_backed(&self) -> bool {
        self.path.as_deref().is_some_and(|p| p.starts_with('/'))
    }
}

/// Parse the full contents of a maps file.
pub fn parse_maps_output(output: &str) -> Result<Vec<MapsEntry>, ProcessError> {
    let mut entries = Vec::new();
    for (idx, line) in output.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        entries.push(parse_line(trimmed, idx + 1)?);
    }
    Ok(entries)
}

fn parse_line(line: &str, line_num: usize) -> Result<MapsEntry, ProcessError> {
    let err = |detail: String| ProcessError::ParseError { line_num, detail };

    // address perms offset dev inode [path]; path may contain spaces.
    let mut fields = line.splitn(6, char::is_whitespace);
    let range = fields.next().ok_or_else(|| err("missing range".into()))?;
    let perms = fields.next().ok_or_else(|| err("missing perms".into()))?;
    let (start, end) = range
        .split_once('-')
        .ok_or_else(|| err(format!("bad range {range:?}")))?;
    let start = u64::from_str_radix(start, 16).map_err(|e| err(format!("bad start: {e}")))?;
    let end = u64::from_str_radix(end, 16).map_err(|e| err(format!("bad end: {e}")))?;
    if end < start {
        return Err(err(format!("range end before start: {range}")));
    }
    // Skip offset, dev and inode; whatever remains is the path.
    let path = fields
        .nth(3)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    Ok(MapsEntry {
        start,
        end,
        perms: perms.to_string(),
        path,
    })
}

/// The first file-backed mapping and every adjacent mapping of the same file.
pub fn first_module(entries: &[MapsEntry]) -> Option<ModuleRegion> {
    let first_idx = entries.iter().position(MapsEntry::is_file_backed)?;
    let first = &entries[first_idx];
    let path = first.path.clone()?;
    let end = entries[first_idx..]
        .iter()
        .take_while(|e| e.path.as_deref() == Some(path.as_str()))
        .map(|e| e.end)
        .last()
        .unwrap_or(first.end);
    Some(ModuleRegion {
        start: first.start,
        end,
        path,
    })
}
