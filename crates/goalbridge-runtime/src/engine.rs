//! Synchronization context: runs both agents on their own tickers, wires the
//! poll agent to the link and the link to the command agent's inbox, and
//! serves the operator socket until shutdown.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, MissedTickBehavior, interval};

use goalbridge_core::{CommandStatus, ConnectRequest, GlobalId, PollStatus, RequestFlag};
use goalbridge_process::{ProcessInspector, ProcfsInspector};

use crate::config::EngineConfig;
use crate::link::{InboxDelivery, JournalLink, LinkJournal};
use crate::memory_agent::PollAgent;
use crate::persist::{self, QueueState};
use crate::repl_agent::CommandAgent;
use crate::server;

/// Outbox contents as last published by the poll agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxView {
    pub entries: Vec<GlobalId>,
    pub cursor: usize,
    pub finished_game: bool,
}

impl OutboxView {
    fn of<I: ProcessInspector + 'static>(agent: &PollAgent<I>) -> Self {
        Self {
            entries: agent.outbox().entries().to_vec(),
            cursor: agent.outbox().cursor(),
            finished_game: agent.finished_game(),
        }
    }
}

/// Everything outside the agent tasks may touch. Agents are never locked:
/// reads go through latest-value channels, requests through flags.
#[derive(Clone)]
pub struct SyncContext {
    pub poll_status: watch::Receiver<PollStatus>,
    pub command_status: watch::Receiver<CommandStatus>,
    pub outbox: watch::Receiver<OutboxView>,
    pub memory_connect: ConnectRequest,
    pub repl_connect: ConnectRequest,
    pub clear_stall: RequestFlag,
    pub status_cue: RequestFlag,
    pub deliveries: mpsc::UnboundedSender<InboxDelivery>,
    pub journal: Arc<Mutex<LinkJournal>>,
}

impl SyncContext {
    /// Queue state as it would be persisted right now.
    pub fn queue_state(&self) -> QueueState {
        let outbox = self.outbox.borrow();
        QueueState {
            outbox_index: outbox.cursor,
            location_outbox: outbox.entries.clone(),
            inbox_index: self.command_status.borrow().inbox_cursor,
            finished_game: outbox.finished_game,
        }
    }
}

/// Running agent tasks plus the context that reaches them.
pub struct Engine {
    pub context: SyncContext,
    shutdown: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Engine {
    /// Build both agents from `config` and `restored`, and start ticking.
    pub fn start<I: ProcessInspector + 'static>(
        inspector: Arc<I>,
        config: &EngineConfig,
        restored: &QueueState,
    ) -> Self {
        let journal = Arc::new(Mutex::new(LinkJournal::new()));
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();

        let poll_agent = PollAgent::new(Arc::clone(&inspector), config.poll.clone())
            .with_restored(restored.outbox(), restored.finished_game);
        let command_agent = CommandAgent::new(inspector, config.command.clone(), delivery_rx)
            .with_inbox_cursor(restored.inbox_index);

        let (poll_status_tx, poll_status_rx) = watch::channel(poll_agent.status());
        let (outbox_tx, outbox_rx) = watch::channel(OutboxView::of(&poll_agent));
        let (command_status_tx, command_status_rx) = watch::channel(command_agent.status());

        let context = SyncContext {
            poll_status: poll_status_rx,
            command_status: command_status_rx,
            outbox: outbox_rx,
            memory_connect: poll_agent.connect_request(),
            repl_connect: command_agent.connect_request(),
            clear_stall: command_agent.clear_stall_request(),
            status_cue: command_agent.status_cue_request(),
            deliveries: delivery_tx,
            journal: Arc::clone(&journal),
        };

        if config.connect_on_start {
            context.memory_connect.request();
            context.repl_connect.request();
        }

        let tick = config.tick;
        let link = JournalLink::new(journal);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(run_poll_loop(
                poll_agent,
                link,
                tick,
                shutdown_rx.clone(),
                poll_status_tx,
                outbox_tx,
            )),
            tokio::spawn(run_command_loop(command_agent, tick, shutdown_rx, command_status_tx)),
        ];

        Self {
            context,
            shutdown,
            tasks,
        }
    }

    /// Stop ticking and wait for both agents. A tick already running is
    /// awaited to completion, so its final state is published before this
    /// returns.
    pub async fn stop(self) -> SyncContext {
        self.shutdown.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("agent task failed: {e}");
            }
        }
        self.context
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Wait for the next tick. `false` once shutdown has been requested.
///
/// Shutdown only races the ticker, never an agent tick.
async fn next_tick(ticker: &mut tokio::time::Interval, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.wait_for(|stop| *stop) => false,
        _ = ticker.tick() => true,
    }
}

async fn run_poll_loop<I: ProcessInspector + 'static>(
    mut agent: PollAgent<I>,
    mut link: JournalLink,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    status: watch::Sender<PollStatus>,
    outbox: watch::Sender<OutboxView>,
) {
    let mut ticker = ticker(period);
    while next_tick(&mut ticker, &mut shutdown).await {
        if agent.tick(&mut link).await {
            outbox.send_replace(OutboxView::of(&agent));
        }
        status.send_replace(agent.status());
    }
}

async fn run_command_loop<I: ProcessInspector + 'static>(
    mut agent: CommandAgent<I>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    status: watch::Sender<CommandStatus>,
) {
    let mut ticker = ticker(period);
    while next_tick(&mut ticker, &mut shutdown).await {
        agent.tick().await;
        status.send_replace(agent.status());
    }
}

/// Save whenever the persisted fields change.
async fn run_persister(path: PathBuf, context: SyncContext) {
    let mut outbox = context.outbox.clone();
    let mut command = context.command_status.clone();
    let mut last_saved = context.queue_state();
    loop {
        tokio::select! {
            r = outbox.changed() => if r.is_err() { return },
            r = command.changed() => if r.is_err() { return },
        }
        let state = context.queue_state();
        if state == last_saved {
            continue;
        }
        match persist::save(&path, &state) {
            Ok(()) => last_saved = state,
            Err(e) => tracing::warn!("failed to save queue state to {}: {e}", path.display()),
        }
    }
}

/// Run the engine: both agents, the UDS server, and persistence, until
/// ctrl-c or SIGTERM.
pub async fn run_engine(config: EngineConfig, socket_path: &str) -> anyhow::Result<()> {
    let restored = match &config.state_file {
        Some(path) => {
            let state = persist::load(path)?;
            tracing::info!(
                path = %path.display(),
                outbox_len = state.location_outbox.len(),
                outbox_index = state.outbox_index,
                inbox_index = state.inbox_index,
                "queue state restored"
            );
            state
        }
        None => QueueState::default(),
    };

    let inspector = Arc::new(ProcfsInspector::default());
    let engine = Engine::start(inspector, &config, &restored);

    let server_context = engine.context.clone();
    let server_socket = socket_path.to_string();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(&server_socket, server_context).await {
            tracing::error!("UDS server error: {e}");
        }
    });

    let persister = config.state_file.clone().map(|path| {
        let context = engine.context.clone();
        tokio::spawn(run_persister(path, context))
    });

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        _ = server_handle => {
            tracing::warn!("server exited unexpectedly");
        }
    }

    let context = engine.stop().await;
    if let Some(handle) = persister {
        handle.abort();
    }
    if let Some(path) = &config.state_file {
        save_final(path, &context.queue_state());
    }

    // Cleanup socket
    let _ = std::fs::remove_file(socket_path);
    tracing::info!("engine stopped");
    Ok(())
}

fn save_final(path: &Path, state: &QueueState) {
    match persist::save(path, state) {
        Ok(()) => tracing::info!(path = %path.display(), "queue state saved"),
        Err(e) => tracing::error!("failed to save queue state to {}: {e}", path.display()),
    }
}
