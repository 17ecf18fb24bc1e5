//! Coordination-link boundary: what the engine emits to the multiworld
//! session and what it accepts from it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use goalbridge_core::{GlobalId, ItemRecord};

/// Engine → coordination service.
pub trait CoordinationLink: Send {
    fn on_discovered(&mut self, ids: &[GlobalId]);
    fn on_completed(&mut self);
}

/// Coordination service → engine: one inbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxDelivery {
    pub index: u64,
    pub record: ItemRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkEvent {
    Discovered { ids: Vec<GlobalId> },
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LinkEvent,
}

/// Oldest entries are dropped past this many.
pub(crate) const JOURNAL_CAPACITY: usize = 4096;

/// Sequenced record of link events, read by the session through `events`.
#[derive(Debug, Default)]
pub struct LinkJournal {
    entries: VecDeque<JournalEntry>,
    next_seq: u64,
}

impl LinkJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: LinkEvent, at: DateTime<Utc>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if self.entries.len() == JOURNAL_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(JournalEntry { seq, at, event });
        seq
    }

    /// Entries with `seq >= since`.
    pub fn since(&self, since: u64) -> Vec<JournalEntry> {
        self.entries
            .iter()
            .filter(|e| e.seq >= since)
            .cloned()
            .collect()
    }

    /// Sequence number the next entry will get.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Lowest sequence number still retained. Readers asking for anything
    /// older have missed events and must resync from the outbox.
    pub fn oldest_seq(&self) -> u64 {
        self.entries.front().map_or(self.next_seq, |e| e.seq)
    }
}

/// Link that logs every event and journals it for the session to pull.
#[derive(Clone)]
pub struct JournalLink {
    journal: Arc<Mutex<LinkJournal>>,
}

impl JournalLink {
    pub fn new(journal: Arc<Mutex<LinkJournal>>) -> Self {
        Self { journal }
    }

    fn record(&self, event: LinkEvent) {
        match self.journal.lock() {
            Ok(mut j) => {
                j.record(event, Utc::now());
            }
            Err(e) => tracing::error!("link journal poisoned: {e}"),
        }
    }
}

impl CoordinationLink for JournalLink {
    fn on_discovered(&mut self, ids: &[GlobalId]) {
        tracing::info!(?ids, "location checked");
        self.record(LinkEvent::Discovered { ids: ids.to_vec() });
    }

    fn on_completed(&mut self) {
        tracing::info!("goal reached, reporting completion");
        self.record(LinkEvent::Completed);
    }
}
