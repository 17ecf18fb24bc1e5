//! UDS JSON-RPC client for CLI subcommands.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::cli::{ConnectTarget, DeliverOpts};

pub(crate) async fn rpc_call(
    socket_path: &str,
    method: &str,
    params: serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to engine at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: serde_json::Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        anyhow::bail!("RPC error: {error}");
    }

    Ok(response["result"].clone())
}

/// `goalbridge status`: one line per agent.
pub async fn cmd_status(socket_path: &str) -> anyhow::Result<()> {
    let status = rpc_call(socket_path, "status", serde_json::json!({})).await?;
    println!("{}", format_status(&status));
    Ok(())
}

pub async fn cmd_connect(socket_path: &str, target: ConnectTarget) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "connect", serde_json::json!({ "target": target })).await?;
    for agent in ["memory", "repl"] {
        match result[agent].as_bool() {
            Some(true) => println!("{agent}: connect requested"),
            Some(false) if matches_target(target, agent) => {
                println!("{agent}: connect already pending");
            }
            _ => {}
        }
    }
    Ok(())
}

fn matches_target(target: ConnectTarget, agent: &str) -> bool {
    match target {
        ConnectTarget::All => true,
        ConnectTarget::Memory => agent == "memory",
        ConnectTarget::Repl => agent == "repl",
    }
}

pub async fn cmd_deliver(socket_path: &str, opts: &DeliverOpts) -> anyhow::Result<()> {
    rpc_call(
        socket_path,
        "deliver",
        serde_json::json!({
            "index": opts.index,
            "global_id": opts.global_id,
            "source_player": opts.source_player,
        }),
    )
    .await?;
    println!("queued delivery {} ({})", opts.index, opts.global_id);
    Ok(())
}

pub async fn cmd_outbox(socket_path: &str) -> anyhow::Result<()> {
    let outbox = rpc_call(socket_path, "outbox", serde_json::json!({})).await?;
    println!("{}", serde_json::to_string_pretty(&outbox)?);
    Ok(())
}

pub async fn cmd_events(socket_path: &str, since: u64) -> anyhow::Result<()> {
    let events = rpc_call(socket_path, "events", serde_json::json!({ "since": since })).await?;
    if events["truncated"].as_bool() == Some(true) {
        eprintln!(
            "warning: events before {} were dropped; resync from `goalbridge outbox`",
            events["oldest_seq"]
        );
    }
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}

pub async fn cmd_clear_stall(socket_path: &str) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "clear_stall", serde_json::json!({})).await?;
    if result["requested"].as_bool() == Some(true) {
        println!(
            "stall cleared; delivery {} will be retried",
            result["stalled"]["index"]
        );
    } else {
        println!("nothing stalled");
    }
    Ok(())
}

/// Pure formatting logic for status output, separated for testability.
pub(crate) fn format_status(status: &serde_json::Value) -> String {
    let memory = &status["memory"];
    let repl = &status["repl"];
    let text = |v: &serde_json::Value| v.as_str().unwrap_or("?").to_string();
    let num = |v: &serde_json::Value| v.as_u64().map_or_else(|| "-".to_string(), |n| n.to_string());

    let mut memory_line = format!(
        "memory  {:<12} pid {:<7} outbox {}/{}",
        text(&memory["state"]),
        num(&memory["game_pid"]),
        num(&memory["outbox_cursor"]),
        num(&memory["outbox_len"]),
    );
    if memory["finished_game"].as_bool() == Some(true) {
        memory_line.push_str("  finished");
    }

    let mut repl_line = format!(
        "repl    {:<12} pid {:<7} inbox {}/{}  {}",
        text(&repl["state"]),
        num(&repl["game_pid"]),
        num(&repl["inbox_cursor"]),
        num(&repl["inbox_len"]),
        text(&repl["repl_addr"]),
    );
    if let Some(reason) = repl["stalled"]["reason"].as_str() {
        repl_line.push_str(&format!(
            "\n        stalled at {}: {reason}",
            num(&repl["stalled"]["index"])
        ));
    }

    format!("{memory_line}\n{repl_line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_status_connected() {
        let status = serde_json::json!({
            "memory": {
                "state": "connected",
                "game_pid": 4242,
                "outbox_len": 5,
                "outbox_cursor": 3,
                "finished_game": true,
            },
            "repl": {
                "state": "faulted",
                "game_pid": 4242,
                "inbox_len": 2,
                "inbox_cursor": 1,
                "repl_addr": "127.0.0.1:8181",
                "stalled": null,
            },
        });
        let out = format_status(&status);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("memory  connected"));
        assert!(lines[0].contains("outbox 3/5"));
        assert!(lines[0].ends_with("finished"));
        assert!(lines[1].contains("faulted"));
        assert!(lines[1].contains("inbox 1/2"));
    }

    #[test]
    fn format_status_shows_stall() {
        let status = serde_json::json!({
            "memory": {"state": "disconnected"},
            "repl": {
                "state": "connected",
                "stalled": {"index": 7, "reason": "unknown identifier: global id 12"},
            },
        });
        let out = format_status(&status);
        assert!(out.contains("pid -"));
        assert!(out.contains("stalled at 7: unknown identifier"));
    }

    #[tokio::test]
    async fn rpc_call_reports_unreachable_engine() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("none.sock");
        let err = rpc_call(&socket.to_string_lossy(), "status", serde_json::json!({}))
            .await
            .expect_err("no server");
        assert!(err.to_string().contains("cannot connect to engine"));
    }
}
