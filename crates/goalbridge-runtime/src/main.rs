//! goalbridge: keeps a multiworld coordination session and a running
//! OpenGOAL game in sync.
//!
//! One process runs both agents (memory reader, REPL command agent) and a
//! UDS server; every other subcommand is a thin client of that server.

use clap::Parser;

mod blocking;
mod cli;
mod client;
mod config;
mod engine;
mod link;
mod memory_agent;
mod persist;
mod repl;
mod repl_agent;
mod server;
#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Run(opts) => {
            let filter = std::env::var("GOALBRIDGE_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            let config = config::EngineConfig::from_opts(&opts)?;
            tracing::info!(
                repl_addr = %config.command.repl_addr,
                game = %config.poll.process_name,
                compiler = %config.command.compiler_process,
                "goalbridge engine starting"
            );
            engine::run_engine(config, &socket_path).await?;
        }
        cli::Command::Status => client::cmd_status(&socket_path).await?,
        cli::Command::Connect(opts) => client::cmd_connect(&socket_path, opts.target).await?,
        cli::Command::Deliver(opts) => client::cmd_deliver(&socket_path, &opts).await?,
        cli::Command::Outbox => client::cmd_outbox(&socket_path).await?,
        cli::Command::Events(opts) => client::cmd_events(&socket_path, opts.since).await?,
        cli::Command::ClearStall => client::cmd_clear_stall(&socket_path).await?,
    }

    Ok(())
}
