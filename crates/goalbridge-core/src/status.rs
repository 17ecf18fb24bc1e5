//! Status snapshots each agent publishes after every tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionState;
use crate::ids::GlobalId;
use crate::queue::ItemRecord;

/// Memory-side agent status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollStatus {
    pub state: ConnectionState,
    pub game_pid: Option<u32>,
    pub state_address: Option<u64>,
    pub outbox_len: usize,
    pub outbox_cursor: usize,
    pub last_forwarded: Option<GlobalId>,
    pub finished_game: bool,
    pub last_tick_at: Option<DateTime<Utc>>,
}

/// A delivery the command agent refuses to retry without operator action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalledDelivery {
    pub index: u64,
    pub record: ItemRecord,
    pub reason: String,
}

/// Command-side agent status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStatus {
    pub state: ConnectionState,
    pub game_pid: Option<u32>,
    pub compiler_pid: Option<u32>,
    pub repl_addr: String,
    pub inbox_len: usize,
    pub inbox_cursor: u64,
    pub last_applied: Option<ItemRecord>,
    pub stalled: Option<StalledDelivery>,
    pub last_tick_at: Option<DateTime<Utc>>,
}
