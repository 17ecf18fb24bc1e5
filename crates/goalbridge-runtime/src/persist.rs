//! Queue state carried across engine restarts.
//!
//! Only queue contents and cursors are stored; settings are not.

use std::path::Path;

use serde::{Deserialize, Serialize};

use goalbridge_core::{GlobalId, Outbox};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    /// Outbox cursor: entries already handed to the session.
    #[serde(default)]
    pub outbox_index: usize,
    #[serde(default)]
    pub location_outbox: Vec<GlobalId>,
    /// Next inbox index to apply.
    #[serde(default)]
    pub inbox_index: u64,
    #[serde(default)]
    pub finished_game: bool,
}

impl QueueState {
    pub fn outbox(&self) -> Outbox {
        Outbox::restore(self.location_outbox.iter().copied(), self.outbox_index)
    }
}

/// Load state from `path`. A missing file is an empty state.
pub fn load(path: &Path) -> anyhow::Result<QueueState> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(QueueState::default()),
        Err(e) => return Err(anyhow::anyhow!("failed to read {}: {e}", path.display())),
    };
    serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("invalid queue state in {}: {e}", path.display()))
}

/// Write state to `path` through a sibling temp file and a rename.
pub fn save(path: &Path, state: &QueueState) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = load(&dir.path().join("absent.json")).expect("load");
        assert_eq!(state, QueueState::default());
    }

    #[test]
    fn save_then_load_restores_queue_and_cursors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("state.json");
        let state = QueueState {
            outbox_index: 1,
            location_outbox: vec![GlobalId(741_000_039), GlobalId(741_000_041)],
            inbox_index: 7,
            finished_game: true,
        };
        save(&path, &state).expect("save");

        let loaded = load(&path).expect("load");
        assert_eq!(loaded, state);
        let restored = loaded.outbox();
        assert_eq!(restored.entries(), state.location_outbox.as_slice());
        assert_eq!(restored.cursor(), 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn reads_documents_with_missing_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"outbox_index": 1, "location_outbox": [741000001, 741000001, 741000002]}"#)
            .expect("write");
        let loaded = load(&path).expect("load");
        assert_eq!(loaded.inbox_index, 0);
        assert!(!loaded.finished_game);
        // Duplicates collapse on restore.
        assert_eq!(loaded.outbox().len(), 2);
    }

    #[test]
    fn cursor_past_end_is_clamped_on_restore() {
        let state = QueueState {
            outbox_index: 9,
            location_outbox: vec![GlobalId(741_000_001)],
            ..Default::default()
        };
        assert_eq!(state.outbox().cursor(), 1);
    }

    #[test]
    fn garbage_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").expect("write");
        assert!(load(&path).is_err());
    }
}
