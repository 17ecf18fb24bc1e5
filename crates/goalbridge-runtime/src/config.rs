//! Engine configuration resolved from `run` flags and the environment.
//!
//! Precedence per setting: flag > environment > default.

use std::path::PathBuf;
use std::time::Duration;

use crate::cli::RunOpts;
use crate::memory_agent::PollAgentConfig;
use crate::repl_agent::CommandAgentConfig;

pub const DEFAULT_REPL_ADDR: &str = "127.0.0.1:8181";
pub const DEFAULT_GAME_PROCESS: &str = "gk";
pub const DEFAULT_COMPILER_PROCESS: &str = "goalc";
pub const DEFAULT_MARKER: &str = "UnLiStEdStRaTs_JaK1";

pub const ENV_REPL_ADDR: &str = "GOALBRIDGE_REPL_ADDR";
pub const ENV_GAME_PROCESS: &str = "GOALBRIDGE_GAME_PROCESS";
pub const ENV_COMPILER_PROCESS: &str = "GOALBRIDGE_COMPILER_PROCESS";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick: Duration,
    pub poll: PollAgentConfig,
    pub command: CommandAgentConfig,
    pub state_file: Option<PathBuf>,
    pub connect_on_start: bool,
}

impl EngineConfig {
    pub fn from_opts(opts: &RunOpts) -> anyhow::Result<Self> {
        Self::resolve(opts, |key| std::env::var(key).ok())
    }

    fn resolve(opts: &RunOpts, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        if opts.tick_ms == 0 {
            anyhow::bail!("--tick-ms must be greater than zero");
        }
        if opts.io_timeout_ms == 0 {
            anyhow::bail!("--io-timeout-ms must be greater than zero");
        }

        let pick = |flag: &Option<String>, key: &str, default: &str| {
            flag.clone()
                .or_else(|| env(key).filter(|v| !v.is_empty()))
                .unwrap_or_else(|| default.to_string())
        };
        let game_process = pick(&opts.game_process, ENV_GAME_PROCESS, DEFAULT_GAME_PROCESS);
        let compiler_process = pick(
            &opts.compiler_process,
            ENV_COMPILER_PROCESS,
            DEFAULT_COMPILER_PROCESS,
        );
        let repl_addr = pick(&opts.repl_addr, ENV_REPL_ADDR, DEFAULT_REPL_ADDR);

        let marker_text = opts.marker.as_deref().unwrap_or(DEFAULT_MARKER);
        if marker_text.is_empty() {
            anyhow::bail!("--marker must not be empty");
        }
        let mut marker = marker_text.as_bytes().to_vec();
        marker.push(0);

        let io_timeout = Duration::from_millis(opts.io_timeout_ms);

        Ok(Self {
            tick: Duration::from_millis(opts.tick_ms),
            poll: PollAgentConfig {
                process_name: game_process.clone(),
                marker,
                io_timeout,
            },
            command: CommandAgentConfig {
                game_process,
                compiler_process,
                repl_addr,
                io_timeout,
                compile_timeout: Duration::from_secs(opts.compile_timeout_secs),
                orb_bundle_size: opts.orb_bundle_size,
            },
            state_file: opts.state_file.as_ref().map(PathBuf::from),
            connect_on_start: !opts.no_connect,
        })
    }
}
