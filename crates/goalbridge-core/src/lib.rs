//! goalbridge-core: pure synchronization model.
//! Identifier space, state-block layout, outbox/inbox queues and the agent
//! connection state machine. No IO, no async.

pub mod connection;
pub mod error;
pub mod ids;
pub mod layout;
pub mod queue;
pub mod status;

pub use connection::{ConnectRequest, ConnectionState, RequestFlag};
pub use error::SyncError;
pub use ids::{Category, GAME_ID_BASE, GlobalId, LocalId};
#[cfg(any(test, feature = "test-util"))]
pub use layout::BufferSource;
pub use layout::{LayoutSnapshot, MemorySource, StateLayout};
pub use queue::{Inbox, ItemRecord, Outbox};
pub use status::{CommandStatus, PollStatus, StalledDelivery};
