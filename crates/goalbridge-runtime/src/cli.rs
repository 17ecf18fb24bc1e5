//! CLI definition using clap derive.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(
    name = "goalbridge",
    about = "Keeps a multiworld session and a running OpenGOAL game in sync"
)]
pub struct Cli {
    /// UDS socket path (default: $XDG_RUNTIME_DIR/goalbridge/goalbridge.sock)
    #[arg(long, short = 's', global = true)]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the sync engine (both agents + UDS server)
    Run(RunOpts),
    /// Show both agents' status
    Status,
    /// Request a (re)connect on the next tick
    Connect(ConnectOpts),
    /// Queue an item for the game
    Deliver(DeliverOpts),
    /// Show discovered locations and how many were forwarded
    Outbox,
    /// Show link events recorded since a sequence number
    Events(EventsOpts),
    /// Let a stalled delivery be retried
    ClearStall,
}

#[derive(clap::Args)]
pub struct RunOpts {
    /// Tick interval for both agents, in milliseconds
    #[arg(long, default_value = "100")]
    pub tick_ms: u64,

    /// Budget for one memory read or REPL exchange, in milliseconds
    #[arg(long, default_value = "2000")]
    pub io_timeout_ms: u64,

    /// Budget for the compile step of the REPL handshake, in seconds
    #[arg(long, default_value = "60")]
    pub compile_timeout_secs: u64,

    /// REPL address [env: GOALBRIDGE_REPL_ADDR] (default: 127.0.0.1:8181)
    #[arg(long)]
    pub repl_addr: Option<String>,

    /// Game process name [env: GOALBRIDGE_GAME_PROCESS] (default: gk)
    #[arg(long)]
    pub game_process: Option<String>,

    /// Compiler process name [env: GOALBRIDGE_COMPILER_PROCESS] (default: goalc)
    #[arg(long)]
    pub compiler_process: Option<String>,

    /// State-block marker text; a trailing NUL is added
    #[arg(long)]
    pub marker: Option<String>,

    /// Orbs granted per orb bundle; orb bundles are refused when unset
    #[arg(long)]
    pub orb_bundle_size: Option<u32>,

    /// JSON file the queue state is restored from and saved to
    #[arg(long)]
    pub state_file: Option<String>,

    /// Do not request a connect at startup
    #[arg(long)]
    pub no_connect: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectTarget {
    /// Memory reader
    Memory,
    /// REPL command agent
    Repl,
    All,
}

#[derive(clap::Args)]
pub struct ConnectOpts {
    #[arg(value_enum, default_value = "all")]
    pub target: ConnectTarget,
}

#[derive(clap::Args)]
pub struct DeliverOpts {
    /// Delivery index (the session's item counter)
    pub index: u64,
    pub global_id: u64,
    /// Slot of the player who found the item
    #[arg(default_value = "0")]
    pub source_player: i64,
}

#[derive(clap::Args)]
pub struct EventsOpts {
    #[arg(long, default_value = "0")]
    pub since: u64,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/goalbridge/goalbridge.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/goalbridge-{user}/goalbridge.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults() {
        let cli = Cli::parse_from(["goalbridge", "run"]);
        let Command::Run(opts) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(opts.tick_ms, 100);
        assert_eq!(opts.io_timeout_ms, 2000);
        assert_eq!(opts.compile_timeout_secs, 60);
        assert!(opts.repl_addr.is_none());
        assert!(!opts.no_connect);
    }

    #[test]
    fn connect_target_parses() {
        let cli = Cli::parse_from(["goalbridge", "connect", "repl"]);
        let Command::Connect(opts) = cli.command else {
            panic!("expected connect");
        };
        assert_eq!(opts.target, ConnectTarget::Repl);

        let cli = Cli::parse_from(["goalbridge", "-s", "/tmp/x.sock", "connect"]);
        assert_eq!(cli.socket_path.as_deref(), Some("/tmp/x.sock"));
        let Command::Connect(opts) = cli.command else {
            panic!("expected connect");
        };
        assert_eq!(opts.target, ConnectTarget::All);
    }

    #[test]
    fn deliver_positional_args() {
        let cli = Cli::parse_from(["goalbridge", "deliver", "3", "741000039", "2"]);
        let Command::Deliver(opts) = cli.command else {
            panic!("expected deliver");
        };
        assert_eq!((opts.index, opts.global_id, opts.source_player), (3, 741_000_039, 2));
    }
}
