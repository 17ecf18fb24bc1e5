//! Poll agent: reads the game's state block every tick and turns newly
//! checked locations into outbox entries.
//!
//! Connection is only ever (re)established on request. A process that dies
//! mid-session leaves the agent `Faulted` with its outbox intact.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use goalbridge_core::ids::{self, Category, LocalId};
use goalbridge_core::layout::{COMPLETION_SENTINEL, CheckedArray};
use goalbridge_core::{
    ConnectRequest, ConnectionState, LayoutSnapshot, Outbox, PollStatus, StateLayout, SyncError,
};
use goalbridge_process::{ProcessInspector, ProcessMemory, locate_state_block};

use crate::blocking::run_blocking;
use crate::link::CoordinationLink;

#[derive(Debug, Clone)]
pub struct PollAgentConfig {
    pub process_name: String,
    pub marker: Vec<u8>,
    pub io_timeout: Duration,
}

pub struct PollAgent<I> {
    inspector: Arc<I>,
    config: PollAgentConfig,
    state: ConnectionState,
    connect_request: ConnectRequest,
    game_pid: Option<u32>,
    layout: Option<StateLayout>,
    outbox: Outbox,
    finished_game: bool,
    /// `on_completed` goes out once per engine run.
    completion_reported: bool,
    /// Untranslatable ids already logged, so a bad entry warns once.
    reported_unknown: HashSet<(Category, LocalId)>,
    last_tick_at: Option<DateTime<Utc>>,
}

impl<I: ProcessInspector + 'static> PollAgent<I> {
    pub fn new(inspector: Arc<I>, config: PollAgentConfig) -> Self {
        Self {
            inspector,
            config,
            state: ConnectionState::Disconnected,
            connect_request: ConnectRequest::new(),
            game_pid: None,
            layout: None,
            outbox: Outbox::new(),
            finished_game: false,
            completion_reported: false,
            reported_unknown: HashSet::new(),
            last_tick_at: None,
        }
    }

    /// Resume from persisted queue state.
    #[must_use]
    pub fn with_restored(mut self, outbox: Outbox, finished_game: bool) -> Self {
        self.outbox = outbox;
        self.finished_game = finished_game;
        self
    }

    /// Shared handle to this agent's connect flag.
    pub fn connect_request(&self) -> ConnectRequest {
        self.connect_request.clone()
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn finished_game(&self) -> bool {
        self.finished_game
    }

    pub fn status(&self) -> PollStatus {
        PollStatus {
            state: self.state,
            game_pid: self.game_pid,
            state_address: self.layout.map(|l| l.base()),
            outbox_len: self.outbox.len(),
            outbox_cursor: self.outbox.cursor(),
            last_forwarded: self.outbox.last_delivered(),
            finished_game: self.finished_game,
            last_tick_at: self.last_tick_at,
        }
    }

    /// One synchronization step.
    ///
    /// Returns `true` when the outbox, its cursor, or the completion flag
    /// changed, i.e. when persisted state is stale.
    pub async fn tick(&mut self, link: &mut dyn CoordinationLink) -> bool {
        let before = self.queue_fingerprint();

        if self.connect_request.take() {
            self.connect().await;
        }

        if self.state.is_connected() {
            match self.poll_once().await {
                Ok(()) => {}
                Err(e) if e.is_connection_fault() => self.fault(&e),
                Err(e) => tracing::warn!(error = %e, "memory poll failed, retrying next tick"),
            }
        }

        // Delivery runs even while disconnected: entries found before a
        // fault still drain one per tick.
        if let Some(id) = self.outbox.advance() {
            link.on_discovered(&[id]);
        }

        if self.finished_game && !self.completion_reported {
            link.on_completed();
            self.completion_reported = true;
        }

        self.last_tick_at = Some(Utc::now());
        before != self.queue_fingerprint()
    }

    fn queue_fingerprint(&self) -> (usize, usize, bool) {
        (self.outbox.len(), self.outbox.cursor(), self.finished_game)
    }

    // ─── Connect ────────────────────────────────────────────────────

    async fn connect(&mut self) {
        self.state = ConnectionState::Connecting;
        self.game_pid = None;
        self.layout = None;

        let name = self.config.process_name.clone();
        let marker = self.config.marker.clone();
        let found = run_blocking(&self.inspector, self.config.io_timeout, move |i| {
            let Some(pid) = i.find_process(&name).map_err(|e| e.into_sync_error(0))? else {
                return Err(SyncError::ProcessNotFound { name });
            };
            match locate_state_block(i, pid, &marker) {
                Ok(Some(address)) => Ok((pid, address)),
                Ok(None) => Err(SyncError::MarkerNotFound { pid }),
                Err(e) => Err(e.into_sync_error(0)),
            }
        })
        .await;

        match found {
            Ok((pid, address)) => {
                self.game_pid = Some(pid);
                self.layout = Some(StateLayout::new(address));
                self.state = ConnectionState::Connected;
                tracing::info!(
                    pid,
                    address = format_args!("{address:#x}"),
                    outbox_len = self.outbox.len(),
                    "memory reader connected"
                );
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                tracing::warn!(
                    process = %self.config.process_name,
                    error = %e,
                    "memory reader could not connect; request a connect to retry"
                );
            }
        }
    }

    // ─── Poll ───────────────────────────────────────────────────────

    async fn poll_once(&mut self) -> Result<(), SyncError> {
        let (Some(pid), Some(layout)) = (self.game_pid, self.layout) else {
            return Ok(());
        };

        run_blocking(&self.inspector, self.config.io_timeout, move |i| {
            i.ping(pid).map_err(|e| e.into_sync_error(0))
        })
        .await?;

        let snapshot = run_blocking(&self.inspector, self.config.io_timeout, move |i| {
            layout.scan(&ProcessMemory::new(i, pid))
        })
        .await?;

        self.apply(&snapshot);
        Ok(())
    }

    /// Merge a complete snapshot into the outbox in scan order.
    fn apply(&mut self, snapshot: &LayoutSnapshot) {
        for array in CheckedArray::ALL {
            let category = array.category();
            for &local in snapshot.get(array) {
                if array == CheckedArray::Milestones && local == COMPLETION_SENTINEL {
                    if !self.finished_game {
                        tracing::info!("completion milestone observed");
                        self.finished_game = true;
                    }
                    continue;
                }
                match ids::to_global(category, local) {
                    Ok(id) => {
                        if self.outbox.push(id) {
                            tracing::debug!(%category, local, global = %id, "new location checked");
                        }
                    }
                    Err(e) => {
                        if self.reported_unknown.insert((category, local)) {
                            tracing::warn!(error = %e, "skipping untranslatable id in game memory");
                        }
                    }
                }
            }
        }
    }

    fn fault(&mut self, error: &SyncError) {
        self.state = self.state.on_io_failure();
        tracing::warn!(
            pid = self.game_pid,
            address = self.layout.map(|l| l.base()),
            last_index = self.outbox.cursor(),
            outbox_len = self.outbox.len(),
            error = %error,
            "game memory unreadable; memory reader faulted, waiting for a connect request"
        );
    }
}
