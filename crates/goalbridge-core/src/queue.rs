//! Outbox (game → coordination service) and Inbox (coordination service → game).
//!
//! Both queues keep their contents and cursors for the life of the process.
//! Reconnecting an agent never touches them.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::ids::GlobalId;

// ─── Outbox ───────────────────────────────────────────────────────

/// Append-only, deduplicated sequence of discovered ids plus a delivery cursor.
///
/// Invariant: `0 <= cursor <= entries.len()`, cursor never decreases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outbox {
    entries: Vec<GlobalId>,
    seen: HashSet<GlobalId>,
    cursor: usize,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an outbox from persisted state. Duplicates are dropped and the
    /// cursor is clamped to the restored length.
    pub fn restore(entries: impl IntoIterator<Item = GlobalId>, cursor: usize) -> Self {
        let mut outbox = Self::new();
        for id in entries {
            outbox.push(id);
        }
        outbox.cursor = cursor.min(outbox.entries.len());
        outbox
    }

    /// Append `id` unless already present. Returns whether it was appended.
    pub fn push(&mut self, id: GlobalId) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.entries.push(id);
        true
    }

    pub fn contains(&self, id: GlobalId) -> bool {
        self.seen.contains(&id)
    }

    pub fn entries(&self) -> &[GlobalId] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Entry at the cursor, if the cursor is behind the tail.
    pub fn next_undelivered(&self) -> Option<GlobalId> {
        self.entries.get(self.cursor).copied()
    }

    /// Move the cursor past exactly one entry and return it.
    pub fn advance(&mut self) -> Option<GlobalId> {
        let id = self.next_undelivered()?;
        self.cursor += 1;
        Some(id)
    }

    pub fn last_delivered(&self) -> Option<GlobalId> {
        self.cursor
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .copied()
    }
}

// ─── Inbox ────────────────────────────────────────────────────────

/// An item handed to this game by the coordination service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRecord {
    pub global_id: GlobalId,
    /// Slot of the player who found the item.
    pub source_player: i64,
}

/// Index-addressed deliveries plus the index of the next one to apply.
///
/// Invariant: the cursor only advances after a successful apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inbox {
    items: BTreeMap<u64, ItemRecord>,
    cursor: u64,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a persisted cursor. Deliveries below it count as applied.
    pub fn with_cursor(cursor: u64) -> Self {
        Self {
            items: BTreeMap::new(),
            cursor,
        }
    }

    /// Record a delivery. Returns `false` for indices that were already applied
    /// or already recorded; the first record for an index wins.
    pub fn insert(&mut self, index: u64, record: ItemRecord) -> bool {
        if index < self.cursor || self.items.contains_key(&index) {
            return false;
        }
        self.items.insert(index, record);
        true
    }

    /// The delivery at the cursor, if it has arrived.
    pub fn pending(&self) -> Option<(u64, ItemRecord)> {
        self.items.get(&self.cursor).map(|r| (self.cursor, *r))
    }

    /// Mark the pending delivery applied. No-op when nothing is pending.
    pub fn advance(&mut self) -> bool {
        if self.items.contains_key(&self.cursor) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn last_applied(&self) -> Option<(u64, ItemRecord)> {
        let index = self.cursor.checked_sub(1)?;
        self.items.get(&index).map(|r| (index, *r))
    }
}
