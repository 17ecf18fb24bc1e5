//! Command agent: applies items received from the session by sending unlock
//! forms to the game's REPL, one per tick, in inbox order.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use goalbridge_core::{
    CommandStatus, ConnectRequest, ConnectionState, Inbox, ItemRecord, RequestFlag,
    StalledDelivery, SyncError,
};
use goalbridge_process::ProcessInspector;

use crate::blocking::run_blocking;
use crate::link::InboxDelivery;
use crate::repl::{self, COMPILE_FORM, HANDSHAKE_FORMS, ReplSession, SUCCESS_CUE_FORM};

#[derive(Debug, Clone)]
pub struct CommandAgentConfig {
    pub game_process: String,
    pub compiler_process: String,
    pub repl_addr: String,
    pub io_timeout: Duration,
    /// Budget for `(mi)`, which recompiles the game.
    pub compile_timeout: Duration,
    /// Orbs granted per orb bundle. `None` disables orb bundle delivery.
    pub orb_bundle_size: Option<u32>,
}

pub struct CommandAgent<I> {
    inspector: Arc<I>,
    config: CommandAgentConfig,
    state: ConnectionState,
    connect_request: ConnectRequest,
    clear_stall: RequestFlag,
    status_cue: RequestFlag,
    deliveries: mpsc::UnboundedReceiver<InboxDelivery>,
    inbox: Inbox,
    session: Option<ReplSession>,
    game_pid: Option<u32>,
    compiler_pid: Option<u32>,
    stalled: Option<StalledDelivery>,
    last_tick_at: Option<DateTime<Utc>>,
}

impl<I: ProcessInspector + 'static> CommandAgent<I> {
    pub fn new(
        inspector: Arc<I>,
        config: CommandAgentConfig,
        deliveries: mpsc::UnboundedReceiver<InboxDelivery>,
    ) -> Self {
        Self {
            inspector,
            config,
            state: ConnectionState::Disconnected,
            connect_request: ConnectRequest::new(),
            clear_stall: RequestFlag::new(),
            status_cue: RequestFlag::new(),
            deliveries,
            inbox: Inbox::new(),
            session: None,
            game_pid: None,
            compiler_pid: None,
            stalled: None,
            last_tick_at: None,
        }
    }

    /// Resume from a persisted inbox cursor.
    #[must_use]
    pub fn with_inbox_cursor(mut self, cursor: u64) -> Self {
        self.inbox = Inbox::with_cursor(cursor);
        self
    }

    pub fn connect_request(&self) -> ConnectRequest {
        self.connect_request.clone()
    }

    pub fn clear_stall_request(&self) -> RequestFlag {
        self.clear_stall.clone()
    }

    pub fn status_cue_request(&self) -> RequestFlag {
        self.status_cue.clone()
    }

    pub fn status(&self) -> CommandStatus {
        CommandStatus {
            state: self.state,
            game_pid: self.game_pid,
            compiler_pid: self.compiler_pid,
            repl_addr: self.config.repl_addr.clone(),
            inbox_len: self.inbox.len(),
            inbox_cursor: self.inbox.cursor(),
            last_applied: self.inbox.last_applied().map(|(_, r)| r),
            stalled: self.stalled.clone(),
            last_tick_at: self.last_tick_at,
        }
    }

    /// One synchronization step. Returns `true` when the inbox cursor moved.
    pub async fn tick(&mut self) -> bool {
        let cursor_before = self.inbox.cursor();

        self.drain_deliveries();

        if self.connect_request.take() {
            self.connect().await;
        }

        if self.clear_stall.take() {
            if let Some(stalled) = self.stalled.take() {
                tracing::info!(index = stalled.index, "stall cleared, delivery will be retried");
            }
        }

        if self.state.is_connected() {
            match self.check_liveness().await {
                Ok(()) => {
                    if self.status_cue.take() {
                        self.play_status_cue().await;
                    }
                    if self.state.is_connected() {
                        self.dispatch_one().await;
                    }
                }
                Err(e) if e.is_connection_fault() => self.fault(&e),
                Err(e) => tracing::warn!(error = %e, "liveness check failed, retrying next tick"),
            }
        }

        self.last_tick_at = Some(Utc::now());
        cursor_before != self.inbox.cursor()
    }

    fn drain_deliveries(&mut self) {
        while let Ok(d) = self.deliveries.try_recv() {
            if self.inbox.insert(d.index, d.record) {
                tracing::debug!(index = d.index, global = %d.record.global_id, "delivery queued");
            } else {
                tracing::debug!(index = d.index, "ignoring already applied or duplicate delivery");
            }
        }
    }

    // ─── Connect ────────────────────────────────────────────────────

    async fn connect(&mut self) {
        self.state = ConnectionState::Connecting;
        self.session = None;
        self.game_pid = None;
        self.compiler_pid = None;

        match self.handshake().await {
            Ok((game_pid, compiler_pid, session)) => {
                tracing::info!(
                    game_pid,
                    compiler_pid,
                    addr = session.peer(),
                    inbox_cursor = self.inbox.cursor(),
                    "REPL connected"
                );
                self.game_pid = Some(game_pid);
                self.compiler_pid = Some(compiler_pid);
                self.session = Some(session);
                self.state = ConnectionState::Connected;
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                tracing::warn!(
                    addr = %self.config.repl_addr,
                    error = %e,
                    "REPL connect failed; request a connect to retry"
                );
            }
        }
    }

    /// Both processes, then the socket, then the welcome, then all six forms.
    async fn handshake(&self) -> Result<(u32, u32, ReplSession), SyncError> {
        let game = self.config.game_process.clone();
        let compiler = self.config.compiler_process.clone();
        let (game_pid, compiler_pid) =
            run_blocking(&self.inspector, self.config.io_timeout, move |i| {
                let find = |name: String| match i.find_process(&name) {
                    Ok(Some(pid)) => Ok(pid),
                    Ok(None) => Err(SyncError::ProcessNotFound { name }),
                    Err(e) => Err(e.into_sync_error(0)),
                };
                Ok((find(game)?, find(compiler)?))
            })
            .await?;

        let timeout = self.config.io_timeout;
        let mut session = ReplSession::connect(&self.config.repl_addr, timeout).await?;

        match session.read_reply(timeout).await? {
            Some(welcome) if repl::welcome_ok(&welcome) => {
                tracing::debug!(welcome = welcome.trim(), "REPL welcome");
            }
            Some(welcome) => {
                tracing::warn!(welcome = welcome.trim(), "unexpected REPL welcome, continuing");
            }
            None => tracing::warn!("REPL sent no welcome, continuing"),
        }

        for form in HANDSHAKE_FORMS {
            let budget = if form == COMPILE_FORM {
                self.config.compile_timeout
            } else {
                timeout
            };
            let reply = session.send_form(form, budget).await?;
            if !repl::is_ack(&reply) {
                return Err(SyncError::HandshakeRejected {
                    command: form.to_string(),
                    reply: reply.trim().to_string(),
                });
            }
        }

        Ok((game_pid, compiler_pid, session))
    }

    // ─── Tick work ──────────────────────────────────────────────────

    async fn check_liveness(&self) -> Result<(), SyncError> {
        let (Some(game), Some(compiler)) = (self.game_pid, self.compiler_pid) else {
            return Ok(());
        };
        run_blocking(&self.inspector, self.config.io_timeout, move |i| {
            for pid in [game, compiler] {
                i.ping(pid).map_err(|e| e.into_sync_error(0))?;
            }
            Ok(())
        })
        .await
    }

    async fn play_status_cue(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.send_form(SUCCESS_CUE_FORM, self.config.io_timeout).await {
            Ok(reply) if repl::is_ack(&reply) => tracing::debug!("status cue played"),
            Ok(reply) => tracing::debug!(reply = reply.trim(), "status cue not acknowledged"),
            Err(e) if e.is_connection_fault() => self.fault(&e),
            Err(e) => tracing::debug!(error = %e, "status cue failed"),
        }
    }

    /// Apply the delivery at the cursor, if any. The cursor moves only on `OK!`.
    async fn dispatch_one(&mut self) {
        if self.stalled.is_some() {
            return;
        }
        let Some((index, record)) = self.inbox.pending() else {
            return;
        };

        let form = match repl::unlock_form(record.global_id, self.config.orb_bundle_size) {
            Ok(form) => form,
            Err(e) if e.is_fatal_for_delivery() => {
                self.stall(index, record, &e);
                return;
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "unlock form unavailable, retrying next tick");
                return;
            }
        };

        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.send_form(&form, self.config.io_timeout).await {
            Ok(reply) if repl::is_ack(&reply) => {
                self.inbox.advance();
                tracing::info!(
                    index,
                    global = %record.global_id,
                    source_player = record.source_player,
                    "item applied"
                );
            }
            Ok(reply) => {
                tracing::warn!(
                    index,
                    global = %record.global_id,
                    reply = reply.trim(),
                    "unlock not acknowledged, retrying next tick"
                );
            }
            Err(e) if e.is_connection_fault() => self.fault(&e),
            Err(e) => {
                tracing::warn!(index, error = %e, "unlock failed, retrying next tick");
            }
        }
    }

    fn stall(&mut self, index: u64, record: ItemRecord, error: &SyncError) {
        tracing::error!(
            index,
            global = %record.global_id,
            source_player = record.source_player,
            error = %error,
            "delivery cannot be applied; inbox stalled until cleared"
        );
        self.stalled = Some(StalledDelivery {
            index,
            record,
            reason: error.to_string(),
        });
    }

    fn fault(&mut self, error: &SyncError) {
        self.state = self.state.on_io_failure();
        self.session = None;
        tracing::warn!(
            game_pid = self.game_pid,
            compiler_pid = self.compiler_pid,
            addr = %self.config.repl_addr,
            last_index = self.inbox.cursor(),
            error = %error,
            "REPL connection lost; command agent faulted, waiting for a connect request"
        );
    }
}
